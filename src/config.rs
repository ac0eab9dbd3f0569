//! # Configuración del Servidor
//! src/config.rs
//!
//! Configuración del servidor con soporte para argumentos CLI y variables de
//! entorno, más la descripción opcional (JSON) del pool de conexiones al
//! backend.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./reactor_httpd --port 9006 \
//!   --doc-root ./www \
//!   --workers 8 \
//!   --timeslot 5
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORT=9006 HTTP_HOST=0.0.0.0 DOC_ROOT=/srv/www ./reactor_httpd
//! ```

use crate::error::{Error, Result};
use crate::resource::PoolConfig;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tamaño mínimo de los buffers de lectura y escritura
const MIN_BUFFER_SIZE: usize = 64;

/// Configuración del servidor HTTP/1.1
#[derive(Debug, Clone, Parser)]
#[command(name = "reactor_httpd")]
#[command(about = "Servidor HTTP/1.1 basado en epoll con pool de workers")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value = "8080", env = "HTTP_PORT")]
    pub port: u16,

    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "HTTP_HOST")]
    pub host: String,

    /// Directorio raíz de los archivos estáticos
    #[arg(long = "doc-root", default_value = "./www", env = "DOC_ROOT")]
    pub doc_root: PathBuf,

    /// Documento servido para `/` (y para directorios con --dir-index)
    #[arg(long = "default-doc", default_value = "index.html", env = "DEFAULT_DOC")]
    pub default_doc: String,

    /// Servir el documento por defecto de un directorio en vez de 400
    #[arg(long = "dir-index", env = "DIR_INDEX")]
    pub dir_index: bool,

    // === Workers ===

    /// Número de threads del pool de workers
    #[arg(short, long, default_value = "8", env = "WORKERS")]
    pub workers: usize,

    /// Capacidad de la cola de tareas de los workers
    #[arg(long = "queue-capacity", default_value = "10000", env = "QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    // === Conexiones ===

    /// Máximo de conexiones simultáneas
    #[arg(long = "max-connections", default_value = "65535", env = "MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Máximo de eventos por llamada a epoll_wait
    #[arg(long = "max-events", default_value = "10000", env = "MAX_EVENTS")]
    pub max_events: usize,

    // === Timers ===

    /// Periodo del barrido de conexiones ociosas, en segundos
    #[arg(long = "timeslot", default_value = "5", env = "TIMESLOT")]
    pub timeslot_secs: u64,

    /// Periodos sin actividad antes de cerrar una conexión
    #[arg(long = "idle-slots", default_value = "3", env = "IDLE_SLOTS")]
    pub idle_slots: u32,

    // === Buffers ===

    /// Tamaño del buffer de lectura por conexión
    #[arg(long = "read-buffer", default_value = "2048", env = "READ_BUFFER_SIZE")]
    pub read_buffer_size: usize,

    /// Tamaño del buffer de escritura (headers) por conexión
    #[arg(long = "write-buffer", default_value = "1024", env = "WRITE_BUFFER_SIZE")]
    pub write_buffer_size: usize,

    // === Logging ===

    /// Nivel de log (RUST_LOG tiene prioridad)
    #[arg(long = "log-level", default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Archivo de log; activa el logging asíncrono
    #[arg(long = "log-file", env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Líneas de log en espera antes de descartar
    #[arg(long = "log-queue", default_value = "1000", env = "LOG_QUEUE_CAPACITY")]
    pub log_queue_capacity: usize,

    // === Backend ===

    /// JSON con la configuración del pool de conexiones al backend
    #[arg(long = "backend-config", env = "BACKEND_CONFIG")]
    pub backend_config: Option<PathBuf>,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse()
    }

    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use reactor_httpd::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "127.0.0.1:8080");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Periodo del barrido de timers
    pub fn timeslot(&self) -> Duration {
        Duration::from_secs(self.timeslot_secs)
    }

    /// Tiempo ocioso máximo de una conexión
    pub fn idle_budget(&self) -> Duration {
        self.timeslot() * self.idle_slots
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be >= 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue capacity must be >= 1".to_string());
        }
        if self.max_connections == 0 {
            return Err("max connections must be >= 1".to_string());
        }
        if self.max_events == 0 {
            return Err("max events must be >= 1".to_string());
        }
        if self.timeslot_secs == 0 {
            return Err("timeslot must be >= 1 second".to_string());
        }
        if self.idle_slots == 0 {
            return Err("idle slots must be >= 1".to_string());
        }
        if self.read_buffer_size < MIN_BUFFER_SIZE {
            return Err(format!("read buffer must be >= {} bytes", MIN_BUFFER_SIZE));
        }
        if self.write_buffer_size < MIN_BUFFER_SIZE {
            return Err(format!("write buffer must be >= {} bytes", MIN_BUFFER_SIZE));
        }
        if self.default_doc.trim_start_matches('/').is_empty() {
            return Err("default document must not be empty".to_string());
        }
        if self.log_queue_capacity == 0 {
            return Err("log queue capacity must be >= 1".to_string());
        }

        Ok(())
    }

    /// Imprime un resumen de la configuración
    pub fn print_summary(&self) {
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║              reactor_httpd Server Configuration              ║");
        println!("╚══════════════════════════════════════════════════════════════╝");
        println!();
        println!("🌐 Network:");
        println!("   Address:      {}", self.address());
        println!("   Doc root:     {}", self.doc_root.display());
        println!("   Default doc:  {} (dir index: {})", self.default_doc, self.dir_index);
        println!("   Max conns:    {}", self.max_connections);
        println!();
        println!("👷 Workers:");
        println!("   Threads:      {}", self.workers);
        println!("   Queue cap:    {}", self.queue_capacity);
        println!();
        println!("⏱  Idle timers:");
        println!(
            "   Sweep every {} s, close after {} s idle",
            self.timeslot_secs,
            self.idle_budget().as_secs()
        );
        println!();
        match &self.log_file {
            Some(path) => println!("📝 Logging:      async → {}", path.display()),
            None => println!("📝 Logging:      stderr"),
        }
        match &self.backend_config {
            Some(path) => println!("🗄  Backend pool: {}", path.display()),
            None => println!("🗄  Backend pool: disabled"),
        }
        println!();
        println!("═══════════════════════════════════════════════════════════════");
        println!();
    }
}

impl Default for Config {
    /// Configuración por defecto (igual a los defaults del CLI)
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            doc_root: PathBuf::from("./www"),
            default_doc: "index.html".to_string(),
            dir_index: false,
            workers: 8,
            queue_capacity: 10_000,
            max_connections: 65_535,
            max_events: 10_000,
            timeslot_secs: 5,
            idle_slots: 3,
            read_buffer_size: 2048,
            write_buffer_size: 1024,
            log_level: "info".to_string(),
            log_file: None,
            log_queue_capacity: 1000,
            backend_config: None,
        }
    }
}

/// Configuración del pool de conexiones al backend (base de datos)
///
/// Acepta también las claves camelCase del archivo de configuración clásico
/// (`initSize`, `maxSize`, `maxIdleTime`, `connectionTimeout`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    pub ip: String,

    #[serde(default = "default_backend_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: String,

    pub dbname: String,

    #[serde(alias = "initSize")]
    pub init_size: usize,

    #[serde(alias = "maxSize")]
    pub max_size: usize,

    /// Segundos
    #[serde(alias = "maxIdleTime")]
    pub max_idle_time_secs: u64,

    /// Timeout del `connect` TCP, en milisegundos (0 = sin tope)
    #[serde(alias = "connectionTimeout")]
    pub connection_timeout_ms: u64,

    /// Espera máxima de `acquire` con el pool agotado, en milisegundos
    /// (0 = espera indefinida)
    #[serde(default, alias = "acquireTimeout")]
    pub acquire_timeout_ms: u64,
}

fn default_backend_port() -> u16 {
    3306
}

impl BackendConfig {
    /// Lee y valida la configuración desde un archivo JSON
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: BackendConfig = serde_json::from_str(&text)?;
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    /// Valida límites del pool
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_size == 0 {
            return Err("backend max_size must be >= 1".to_string());
        }
        if self.init_size > self.max_size {
            return Err("backend init_size must be <= max_size".to_string());
        }
        if self.max_idle_time_secs == 0 {
            return Err("backend max_idle_time_secs must be >= 1".to_string());
        }
        Ok(())
    }

    /// `ip:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Timeout de conexión
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Tope de espera al pedir una conexión; `None` bloquea hasta obtenerla
    pub fn acquire_timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }

    /// Límites para el pool genérico
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            init_size: self.init_size,
            max_size: self.max_size,
            max_idle: Duration::from_secs(self.max_idle_time_secs),
        }
    }
}
