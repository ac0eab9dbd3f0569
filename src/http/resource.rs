//! # Recursos Estáticos
//! src/http/resource.rs
//!
//! Resuelve el target de un request contra el directorio raíz y mapea el
//! archivo resultante.
//!
//! | Situación                         | Resultado        |
//! |-----------------------------------|------------------|
//! | target con componentes `..`       | `Forbidden`      |
//! | no existe                         | `NoSuchResource` |
//! | sin permiso de lectura para otros | `Forbidden`      |
//! | directorio sin `dir_index`        | `Malformed`      |
//! | directorio con `dir_index`        | su documento por defecto |
//! | archivo regular                   | `Ok` + mapeo     |

use super::mapped::MappedFile;
use super::request::Method;
use super::HttpCode;
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Hook para reescribir el target según la lógica de la aplicación
/// (por ejemplo, redirigir login/registro según el body del POST)
pub trait TargetRewriter: Send + Sync {
    /// Retorna el nuevo target, o `None` para dejarlo igual
    fn rewrite(&self, method: Method, target: &str, body: &[u8]) -> Option<String>;
}

/// Rewriter que no cambia nada
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRewrite;

impl TargetRewriter for NoRewrite {
    fn rewrite(&self, _method: Method, _target: &str, _body: &[u8]) -> Option<String> {
        None
    }
}

/// Archivo resuelto y listo para enviarse
#[derive(Debug)]
pub struct StaticFile {
    pub mapped: MappedFile,
    pub content_type: String,
}

/// Resolución de targets contra un directorio raíz
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    default_doc: String,
    dir_index: bool,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>, default_doc: &str, dir_index: bool) -> Self {
        Self {
            root: root.into(),
            default_doc: default_doc.trim_start_matches('/').to_string(),
            dir_index,
        }
    }

    /// Directorio raíz
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resuelve `target` (empieza con `/`) a un archivo mapeado
    pub fn resolve(&self, target: &str) -> Result<StaticFile, HttpCode> {
        let relative = Path::new(target.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            debug!(target, "rejecting target outside the document root");
            return Err(HttpCode::Forbidden);
        }

        let mut path = self.root.join(relative);
        let mut meta = Self::stat(&path)?;

        if meta.is_dir() {
            if !self.dir_index {
                return Err(HttpCode::Malformed);
            }
            path.push(&self.default_doc);
            meta = Self::stat(&path)?;
            if meta.is_dir() {
                return Err(HttpCode::Malformed);
            }
        }

        if meta.permissions().mode() & 0o004 == 0 || !meta.is_file() {
            return Err(HttpCode::Forbidden);
        }

        let mapped = MappedFile::open(&path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "failed to map file");
            HttpCode::InternalError
        })?;

        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(StaticFile { mapped, content_type })
    }

    fn stat(path: &Path) -> Result<Metadata, HttpCode> {
        fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => HttpCode::Forbidden,
            _ => HttpCode::NoSuchResource,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::Permissions;

    fn docroot() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>index</h1>").unwrap();
        fs::write(dir.path().join("style.css"), "body {}").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/index.html"), "<h1>docs</h1>").unwrap();

        let secret = dir.path().join("secret");
        fs::write(&secret, "top secret").unwrap();
        fs::set_permissions(&secret, Permissions::from_mode(0o600)).unwrap();
        dir
    }

    #[test]
    fn test_resolves_regular_file() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);

        let file = files.resolve("/index.html").unwrap();
        assert_eq!(&file.mapped[..], b"<h1>index</h1>");
        assert_eq!(file.content_type, "text/html");
    }

    #[test]
    fn test_content_type_from_extension() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);

        assert_eq!(files.resolve("/style.css").unwrap().content_type, "text/css");
    }

    #[test]
    fn test_missing_file() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);

        assert_eq!(files.resolve("/missing").unwrap_err(), HttpCode::NoSuchResource);
    }

    #[test]
    fn test_not_world_readable() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);

        assert_eq!(files.resolve("/secret").unwrap_err(), HttpCode::Forbidden);
    }

    #[test]
    fn test_parent_components_are_forbidden() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path().join("docs"), "index.html", false);

        assert_eq!(files.resolve("/../index.html").unwrap_err(), HttpCode::Forbidden);
    }

    #[test]
    fn test_directory_without_index() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);

        assert_eq!(files.resolve("/docs").unwrap_err(), HttpCode::Malformed);
    }

    #[test]
    fn test_directory_with_index() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", true);

        let file = files.resolve("/docs").unwrap();
        assert_eq!(&file.mapped[..], b"<h1>docs</h1>");
    }

    #[test]
    fn test_no_rewrite() {
        assert_eq!(NoRewrite.rewrite(Method::POST, "/login", b"user=a"), None);
    }
}
