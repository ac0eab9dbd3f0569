//! # Estadísticas del Servidor
//! src/server/stats.rs
//!
//! Contadores atómicos compartidos entre el reactor y los workers. El
//! contador de conexiones vivas es el que limita el accept.

use crate::http::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

const STATUSES: [StatusCode; 5] = [
    StatusCode::Ok,
    StatusCode::BadRequest,
    StatusCode::Forbidden,
    StatusCode::NotFound,
    StatusCode::InternalServerError,
];

/// Contadores del servidor
#[derive(Debug)]
pub struct ServerStats {
    live: AtomicUsize,
    accepted: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    queue_full: AtomicU64,
    responses: [AtomicU64; STATUSES.len()],
    start_time: Instant,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            live: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            queue_full: AtomicU64::new(0),
            responses: Default::default(),
            start_time: Instant::now(),
        }
    }

    /// Registra una conexión aceptada; retorna las conexiones vivas
    pub fn connection_opened(&self) -> usize {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Registra el cierre de una conexión
    pub fn connection_closed(&self) {
        // Nunca por debajo de cero
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Conexiones vivas
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Conexión rechazada por el límite de conexiones
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Conexión cerrada por inactividad
    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Tarea rechazada por la cola de workers llena
    pub fn record_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Respuesta armada con `status`
    pub fn record_response(&self, status: StatusCode) {
        if let Some(i) = STATUSES.iter().position(|s| *s == status) {
            self.responses[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Obtiene un snapshot de los contadores
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            live_connections: self.live(),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_over_limit: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            responses: STATUSES
                .iter()
                .zip(&self.responses)
                .map(|(status, count)| (status.as_u16(), count.load(Ordering::Relaxed)))
                .filter(|(_, count)| *count > 0)
                .collect(),
        }
    }

    /// Snapshot serializado como JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot de estadísticas (para logs y uso externo)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub live_connections: usize,
    pub accepted: u64,
    pub rejected_over_limit: u64,
    pub timed_out: u64,
    pub queue_full: u64,
    /// Respuestas por código de estado
    pub responses: BTreeMap<u16, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_connections_tracking() {
        let stats = ServerStats::new();

        assert_eq!(stats.connection_opened(), 1);
        assert_eq!(stats.connection_opened(), 2);
        stats.connection_closed();
        assert_eq!(stats.live(), 1);
        assert_eq!(stats.snapshot().accepted, 2);
    }

    #[test]
    fn test_live_never_negative() {
        let stats = ServerStats::new();

        stats.connection_closed();
        stats.connection_closed();

        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn test_responses_per_status() {
        let stats = ServerStats::new();

        stats.record_response(StatusCode::Ok);
        stats.record_response(StatusCode::Ok);
        stats.record_response(StatusCode::NotFound);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.responses.get(&200), Some(&2));
        assert_eq!(snapshot.responses.get(&404), Some(&1));
        assert_eq!(snapshot.responses.get(&500), None);
    }

    #[test]
    fn test_json_format() {
        let stats = ServerStats::new();
        stats.record_timeout();
        stats.record_rejected();
        stats.record_queue_full();
        stats.record_response(StatusCode::Forbidden);

        let value: serde_json::Value = serde_json::from_str(&stats.to_json()).unwrap();
        assert_eq!(value["timed_out"], 1);
        assert_eq!(value["rejected_over_limit"], 1);
        assert_eq!(value["queue_full"], 1);
        assert_eq!(value["responses"]["403"], 1);
    }
}
