//! # Archivo Mapeado en Memoria
//! src/http/mapped.rs
//!
//! Mapeo de solo lectura de un archivo regular sobre `memmap2`. El mapeo se
//! libera en `Drop`, así que cualquier salida de la ruta de escritura (éxito,
//! error o cierre por timeout) lo suelta exactamente una vez.

use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;

/// Archivo mapeado en modo solo lectura
///
/// Un archivo vacío no se mapea: `map` queda en `None` y los bytes son `&[]`.
pub struct MappedFile {
    map: Option<Mmap>,
}

impl MappedFile {
    /// Mapea el archivo completo en `path`
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self { map: None });
        }

        // SAFETY: el servidor sólo lee el mapeo; si otro proceso trunca el
        // archivo mientras se envía, el contenido servido es indefinido.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    /// Bytes mapeados
    pub fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_none()
    }
}

impl Deref for MappedFile {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile").field("len", &self.len()).finish()
    }
}
