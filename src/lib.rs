//! # reactor_httpd
//! src/lib.rs
//!
//! Servidor HTTP/1.1 de un solo proceso construido alrededor de un reactor
//! epoll: un thread espera eventos, un pool fijo de workers ejecuta el
//! trabajo de cada conexión y una lista ordenada de timers cierra a los
//! clientes inactivos.
//!
//! ## Arquitectura
//!
//! El servidor está dividido en módulos especializados:
//! - `server`: reactor epoll, estado por conexión, señales y estadísticas
//! - `http`: parsing incremental, archivos estáticos mapeados y respuestas
//! - `workers`: pool fijo de threads con cola acotada
//! - `timer`: lista de timers ordenada por vencimiento
//! - `sync`: cola bloqueante acotada (tareas y logging asíncrono)
//! - `resource`: pool genérico de recursos costosos
//! - `backend`: conexiones al backend sobre el pool genérico
//! - `config`, `error`, `logging`: configuración CLI, errores y tracing
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use reactor_httpd::config::Config;
//! use reactor_httpd::server::Server;
//!
//! let config = Config::default();
//! let server = Server::bind(config).expect("bind failed");
//! server.run().expect("server error");
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod resource;
pub mod server;
pub mod sync;
pub mod timer;
pub mod workers;

pub use error::{Error, Result};
