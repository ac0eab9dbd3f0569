//! # Errores del Servidor
//! src/error.rs
//!
//! Error de nivel de proceso: arranque, configuración, señales y logging.
//! Los errores por conexión (parsing, I/O del socket) no llegan hasta aquí,
//! se resuelven localmente en cada conexión.

use thiserror::Error;

/// Alias de resultado usado por el arranque del servidor
pub type Result<T> = std::result::Result<T, Error>;

/// Errores fatales del servidor
#[derive(Debug, Error)]
pub enum Error {
    /// Error de I/O (bind, epoll, socketpair, ...)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuración inválida
    #[error("Configuration error: {0}")]
    Config(String),

    /// Archivo JSON de configuración del backend inválido
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Falló la instalación de un manejador de señal
    #[error("Signal error: {0}")]
    Signal(#[from] nix::errno::Errno),

    /// No se pudo inicializar el subscriber de logging
    #[error("Logging error: {0}")]
    Logging(String),
}
