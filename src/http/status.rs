//! # Códigos de Estado HTTP
//! src/http/status.rs
//!
//! Códigos que emite el servidor. Cada error lleva un cuerpo de texto fijo
//! que se envía inline, sin archivo mapeado.
//!
//! - **2xx**: 200 OK (archivo estático)
//! - **4xx**: 400, 403, 404
//! - **5xx**: 500

/// Códigos de estado HTTP que emite el servidor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 200 OK - Recurso resuelto y mapeado
    Ok = 200,

    /// 400 Bad Request - Request line o headers malformados
    BadRequest = 400,

    /// 403 Forbidden - El archivo no es legible por todos
    Forbidden = 403,

    /// 404 Not Found - El archivo no existe
    NotFound = 404,

    /// 500 Internal Server Error - Fallo al armar la respuesta
    InternalServerError = 500,
}

impl StatusCode {
    /// Convierte el código a su valor numérico
    ///
    /// # Ejemplo
    /// ```
    /// use reactor_httpd::http::StatusCode;
    /// assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    /// ```
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Texto de razón de la status line
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Error",
        }
    }

    /// Cuerpo fijo de las respuestas de error (`None` para 200)
    pub fn error_body(&self) -> Option<&'static str> {
        match self {
            StatusCode::Ok => None,
            StatusCode::BadRequest => {
                Some("Your request has bad syntax or is inherently impossible to satisfy.\n")
            }
            StatusCode::Forbidden => {
                Some("You do not have permission to get file from this server.\n")
            }
            StatusCode::NotFound => Some("The requested file was not found on this server.\n"),
            StatusCode::InternalServerError => {
                Some("There was an unusual problem serving the requested file.\n")
            }
        }
    }

    /// Verifica si el código indica éxito (2xx)
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl std::fmt::Display for StatusCode {
    /// Formato: "200 OK"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_values() {
        assert_eq!(StatusCode::Ok.as_u16(), 200);
        assert_eq!(StatusCode::BadRequest.as_u16(), 400);
        assert_eq!(StatusCode::Forbidden.as_u16(), 403);
        assert_eq!(StatusCode::NotFound.as_u16(), 404);
        assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
    }

    #[test]
    fn test_error_bodies() {
        assert!(StatusCode::Ok.error_body().is_none());
        assert_eq!(
            StatusCode::NotFound.error_body(),
            Some("The requested file was not found on this server.\n")
        );
        assert!(StatusCode::Forbidden.error_body().unwrap().contains("permission"));
    }

    #[test]
    fn test_is_success() {
        assert!(StatusCode::Ok.is_success());
        assert!(!StatusCode::BadRequest.is_success());
        assert!(!StatusCode::InternalServerError.is_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::Ok.to_string(), "200 OK");
        assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
        assert_eq!(StatusCode::InternalServerError.to_string(), "500 Internal Error");
    }
}
