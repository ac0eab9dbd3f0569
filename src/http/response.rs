//! # Construcción de Respuestas HTTP
//! src/http/response.rs
//!
//! Builder de respuestas con headers en orden. La respuesta se renderiza en
//! una sola pasada dentro del buffer de escritura fijo de la conexión; si no
//! cabe se reporta `RenderError` en vez de truncar.
//!
//! ## Formato
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Length: 1024\r\n
//! Content-Type: text/html\r\n
//! Connection: keep-alive\r\n
//! \r\n
//! <cuerpo inline de error, o nada: el archivo va en el segundo segmento>
//! ```

use super::StatusCode;
use std::io::{self, Cursor, Write};
use thiserror::Error;

/// La respuesta no cabe en el buffer de escritura
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response does not fit in {capacity} bytes")]
pub struct RenderError {
    pub capacity: usize,
}

/// Respuesta HTTP/1.1 (status line, headers ordenados y body inline)
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,

    /// Headers en el orden en que se envían
    headers: Vec<(String, String)>,

    /// Cuerpo inline (solo respuestas de error); un archivo se envía aparte
    body: Vec<u8>,
}

impl Response {
    /// Crea una respuesta sin headers ni body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Agrega un header, o reemplaza su valor si ya existe
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Versión mutable de `with_header`
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Establece el body inline y su `Content-Length`
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        let len = self.body.len().to_string();
        self.set_header("Content-Length", &len);
        self
    }

    /// Respuesta de error con su cuerpo fijo
    pub fn error(status: StatusCode, keep_alive: bool) -> Self {
        Self::new(status)
            .with_body(status.error_body().unwrap_or_default())
            .with_header("Content-Type", "text/html")
            .with_header("Connection", connection_value(keep_alive))
    }

    /// Encabezado de un 200 cuyo body (`len` bytes) viaja en otro segmento
    pub fn file(len: usize, content_type: &str, keep_alive: bool) -> Self {
        Self::new(StatusCode::Ok)
            .with_header("Content-Length", &len.to_string())
            .with_header("Content-Type", content_type)
            .with_header("Connection", connection_value(keep_alive))
    }

    /// Renderiza status line, headers, línea vacía y body inline en `out`
    ///
    /// Retorna los bytes escritos.
    pub fn render(&self, out: &mut [u8]) -> Result<usize, RenderError> {
        let capacity = out.len();
        let mut cursor = Cursor::new(out);

        self.write_to(&mut cursor)
            .map_err(|_| RenderError { capacity })?;

        Ok(cursor.position() as usize)
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write!(w, "HTTP/1.1 {}\r\n", self.status)?;
        for (name, value) in &self.headers {
            write!(w, "{}: {}\r\n", name, value)?;
        }
        w.write_all(b"\r\n")?;
        w.write_all(&self.body)
    }

    /// Convierte la respuesta a bytes (sin límite de tamaño)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(128 + self.body.len());
        // Escribir en un Vec no falla
        let _ = self.write_to(&mut result);
        result
    }

    /// Código de estado de la respuesta
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Valor de un header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Headers en orden
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Body inline
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

fn connection_value(keep_alive: bool) -> &'static str {
    if keep_alive {
        "keep-alive"
    } else {
        "close"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_response() {
        let response = Response::new(StatusCode::Ok);
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(response.headers().is_empty());
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_with_header_keeps_order_and_replaces() {
        let response = Response::new(StatusCode::Ok)
            .with_header("Content-Length", "1")
            .with_header("Content-Type", "text/plain")
            .with_header("content-length", "2");

        assert_eq!(response.headers()[0], ("Content-Length".to_string(), "2".to_string()));
        assert_eq!(response.headers()[1].0, "Content-Type");
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(StatusCode::NotFound, false);
        let text = String::from_utf8(response.to_bytes()).unwrap();

        let body = "The requested file was not found on this server.\n";
        assert_eq!(
            text,
            format!(
                "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
        );
    }

    #[test]
    fn test_file_header() {
        let response = Response::file(1024, "image/png", true);

        assert_eq!(response.header("Content-Length"), Some("1024"));
        assert_eq!(response.header("Content-Type"), Some("image/png"));
        assert_eq!(response.header("Connection"), Some("keep-alive"));
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_render_into_buffer() {
        let response = Response::file(3, "text/plain", false);
        let mut buf = [0u8; 256];

        let n = response.render(&mut buf).unwrap();
        assert_eq!(&buf[..n], &response.to_bytes()[..]);
        assert!(buf[..n].ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_render_overflow() {
        let response = Response::error(StatusCode::BadRequest, true);
        let mut buf = [0u8; 32];

        assert_eq!(response.render(&mut buf), Err(RenderError { capacity: 32 }));
    }
}
