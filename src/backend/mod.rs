//! # Backend
//! src/backend/mod.rs
//!
//! Conexiones TCP al servidor de base de datos, administradas con el
//! `ResourcePool` genérico. El protocolo de consultas queda fuera del
//! servidor: el pool solo mantiene sockets abiertos y los presta.
//!
//! Dos timeouts distintos salen de `BackendConfig`: `connection_timeout_ms`
//! acota el `connect` de cada socket nuevo y `acquire_timeout_ms` acota la
//! espera de `Backend::acquire` con el pool agotado.

use crate::config::BackendConfig;
use crate::resource::{PooledResource, ResourceFactory, ResourcePool};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

/// Pool de conexiones al backend
pub type BackendPool = ResourcePool<BackendConnection>;

/// Conexión abierta al backend
#[derive(Debug)]
pub struct BackendConnection {
    stream: TcpStream,
    username: String,
    dbname: String,
}

impl BackendConnection {
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

/// Fábrica de conexiones TCP con timeout
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    timeout: Duration,
    username: String,
    dbname: String,
}

impl TcpConnector {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            address: config.address(),
            timeout: config.connection_timeout(),
            username: config.username.clone(),
            dbname: config.dbname.clone(),
        }
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        self.address.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no address for {}", self.address),
            )
        })
    }
}

impl ResourceFactory<BackendConnection> for TcpConnector {
    fn create(&self) -> io::Result<BackendConnection> {
        let addr = self.resolve()?;
        let stream = if self.timeout.is_zero() {
            TcpStream::connect(addr)?
        } else {
            TcpStream::connect_timeout(&addr, self.timeout)?
        };
        stream.set_nodelay(true)?;

        debug!(backend = %addr, db = %self.dbname, "backend connection opened");
        Ok(BackendConnection {
            stream,
            username: self.username.clone(),
            dbname: self.dbname.clone(),
        })
    }
}

/// Crea el pool de conexiones descrito por `config`
pub fn connect_pool(config: &BackendConfig) -> io::Result<BackendPool> {
    ResourcePool::new(config.pool_config(), TcpConnector::new(config))
}

/// Pool del backend junto con su tope de espera configurado
pub struct Backend {
    pool: BackendPool,
    acquire_timeout: Option<Duration>,
}

impl Backend {
    pub fn connect(config: &BackendConfig) -> io::Result<Self> {
        Ok(Self {
            pool: connect_pool(config)?,
            acquire_timeout: config.acquire_timeout(),
        })
    }

    /// Presta una conexión; `None` si venció `acquire_timeout_ms`
    pub fn acquire(&self) -> Option<PooledResource<BackendConnection>> {
        match self.acquire_timeout {
            Some(timeout) => {
                let conn = self.pool.acquire_timeout(timeout);
                if conn.is_none() {
                    warn!(timeout_ms = timeout.as_millis() as u64, "backend pool exhausted");
                }
                conn
            }
            None => Some(self.pool.acquire()),
        }
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn backend_config(port: u16) -> BackendConfig {
        BackendConfig {
            ip: "127.0.0.1".to_string(),
            port,
            username: "root".to_string(),
            password: String::new(),
            dbname: "webdb".to_string(),
            init_size: 2,
            max_size: 4,
            max_idle_time_secs: 60,
            connection_timeout_ms: 500,
            acquire_timeout_ms: 0,
        }
    }

    #[test]
    fn test_connector_opens_tcp_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = backend_config(listener.local_addr().unwrap().port());

        let conn = TcpConnector::new(&config).create().unwrap();

        assert_eq!(conn.peer_addr().unwrap(), listener.local_addr().unwrap());
        assert_eq!(conn.username(), "root");
        assert_eq!(conn.dbname(), "webdb");
    }

    #[test]
    fn test_connector_reports_refused() {
        // Reservar un puerto y liberarlo para que nadie escuche
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        assert!(TcpConnector::new(&backend_config(port)).create().is_err());
    }

    #[test]
    fn test_pool_starts_with_initial_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = connect_pool(&backend_config(listener.local_addr().unwrap().port())).unwrap();

        assert_eq!(pool.size(), 2);

        let conn = pool.acquire();
        assert_eq!(conn.dbname(), "webdb");
    }

    #[test]
    fn test_acquire_gives_up_after_configured_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = backend_config(listener.local_addr().unwrap().port());
        config.init_size = 1;
        config.max_size = 1;
        config.acquire_timeout_ms = 50;
        let backend = Backend::connect(&config).unwrap();

        let held = backend.acquire().unwrap();
        let start = std::time::Instant::now();
        assert!(backend.acquire().is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));

        drop(held);
        assert!(backend.acquire().is_some());
        assert_eq!(backend.pool().size(), 1);
    }
}
