//! # reactor_httpd - Entry Point
//! src/main.rs
//!
//! Punto de entrada del servidor HTTP/1.1.
//!
//! Parsea la configuración (CLI + variables de entorno), inicia el logging,
//! instala los handlers de SIGTERM/SIGINT y corre el reactor hasta recibir
//! una señal de término.

use reactor_httpd::config::Config;
use reactor_httpd::logging;
use reactor_httpd::server::{install_handlers, Server};
use tracing::{error, info};

fn main() {
    let config = Config::new();

    if let Err(e) = config.validate() {
        eprintln!("💥 Configuración inválida: {}", e);
        std::process::exit(1);
    }

    // El guard vacía el log asíncrono al soltarse
    let log_guard = match logging::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("💥 Error fatal: {}", e);
            std::process::exit(1);
        }
    };

    config.print_summary();

    let result = run(config);
    if let Err(e) = &result {
        error!(error = %e, "server stopped with error");
    } else {
        info!("bye");
    }

    drop(log_guard);
    if result.is_err() {
        std::process::exit(1);
    }
}

fn run(config: Config) -> reactor_httpd::Result<()> {
    let server = Server::bind(config)?;
    let _signals = install_handlers(server.signal_pipe())?;
    server.run()
}
