//! # Módulo HTTP
//! src/http/mod.rs
//!
//! Subconjunto de HTTP/1.1 que habla el servidor:
//!
//! - Parsing incremental de requests sobre un buffer fijo
//! - Resolución de archivos estáticos y mapeo en memoria
//! - Construcción de respuestas con headers ordenados
//!
//! ### Formato de Request
//!
//! ```text
//! GET /index.html HTTP/1.1\r\n
//! Host: localhost\r\n
//! Connection: keep-alive\r\n
//! \r\n
//! ```
//!
//! Solo se interpretan `Host`, `Connection` y `Content-Length`; no hay
//! chunked transfer-encoding.

pub mod mapped;
pub mod request;
pub mod resource;
pub mod response;
pub mod status;

pub use mapped::MappedFile;
pub use request::{Method, ParseError, ParseStatus, Request, RequestParser};
pub use resource::{NoRewrite, StaticFile, StaticFiles, TargetRewriter};
pub use response::{RenderError, Response};
pub use status::StatusCode;

/// Clasificación del resultado de procesar un request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// Faltan bytes
    Incomplete,

    /// Request malformado (400)
    Malformed,

    /// El archivo no existe (404)
    NoSuchResource,

    /// Sin permiso de lectura (403)
    Forbidden,

    /// Recurso resuelto y mapeado (200)
    Ok,

    /// Fallo interno (500)
    InternalError,
}

impl HttpCode {
    /// Código de estado a responder (`None` si aún faltan bytes)
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpCode::Incomplete => None,
            HttpCode::Malformed => Some(StatusCode::BadRequest),
            HttpCode::NoSuchResource => Some(StatusCode::NotFound),
            HttpCode::Forbidden => Some(StatusCode::Forbidden),
            HttpCode::Ok => Some(StatusCode::Ok),
            HttpCode::InternalError => Some(StatusCode::InternalServerError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_code_status() {
        assert_eq!(HttpCode::Incomplete.status(), None);
        assert_eq!(HttpCode::Malformed.status(), Some(StatusCode::BadRequest));
        assert_eq!(HttpCode::Forbidden.status(), Some(StatusCode::Forbidden));
        assert_eq!(HttpCode::NoSuchResource.status(), Some(StatusCode::NotFound));
        assert_eq!(HttpCode::InternalError.status(), Some(StatusCode::InternalServerError));
    }
}
