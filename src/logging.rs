//! # Logging
//! src/logging.rs
//!
//! Subscriber de `tracing` para todo el proceso.
//!
//! - Sin `--log-file`: líneas a stderr.
//! - Con `--log-file`: modo asíncrono sobre `tracing_appender::non_blocking`.
//!   Cada evento formateado pasa a un buffer acotado (`log_queue_capacity`
//!   líneas) y el thread `log-flush` lo escribe al archivo. Con el buffer
//!   lleno la línea se descarta; loguear nunca bloquea al reactor.
//!
//! `RUST_LOG` tiene prioridad sobre `--log-level`.

use crate::config::Config;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Mantiene vivo el thread de escritura; al soltarse vacía las líneas pendientes
#[must_use = "dropping the guard stops asynchronous logging"]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// Writer no bloqueante sobre `file`; descarta líneas con el buffer lleno
pub fn file_writer(file: File, capacity: usize) -> (NonBlocking, WorkerGuard) {
    NonBlockingBuilder::default()
        .buffered_lines_limit(capacity.max(1))
        .lossy(true)
        .thread_name("log-flush")
        .finish(file)
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::from)
}

/// Instala el subscriber global
pub fn init(config: &Config) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::Logging(e.to_string()))?;

    let Some(path) = &config.log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_thread_names(true).with_writer(io::stderr))
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?;
        return Ok(LogGuard { _worker: None });
    };

    let (writer, worker) = file_writer(open_log_file(path)?, config.log_queue_capacity);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(LogGuard {
        _worker: Some(worker),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tracing::info;

    fn read_file(path: &Path) -> String {
        let mut contents = String::new();
        File::open(path).unwrap().read_to_string(&mut contents).unwrap();
        contents
    }

    #[test]
    fn test_file_writer_flushes_on_guard_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let (writer, worker) = file_writer(open_log_file(&path).unwrap(), 16);

        let subscriber = fmt().with_ansi(false).with_writer(writer).finish();
        tracing::subscriber::with_default(subscriber, || {
            info!(fd = 7, "connection opened");
            info!("second line");
        });
        drop(worker);

        let contents = read_file(&path);
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("connection opened"));
        assert!(contents.contains("fd=7"));
    }

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let (writer, worker) = file_writer(open_log_file(&path).unwrap(), 16);
        let subscriber = fmt().with_ansi(false).with_writer(writer).finish();
        tracing::subscriber::with_default(subscriber, || info!("restarted"));
        drop(worker);

        let contents = read_file(&path);
        assert!(contents.starts_with("previous run\n"));
        assert!(contents.contains("restarted"));
    }

    #[test]
    fn test_log_file_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_log_file(&dir.path().join("nope").join("server.log")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
