//! # Pool de Workers
//! src/workers/pool.rs
//!
//! Conjunto fijo de threads que consumen tareas de una cola acotada.
//!
//! ```text
//! reactor ──submit──▶ [ BlockingQueue<T> ] ──pop──▶ worker-0 ─▶ handler(task)
//!                                            ├────▶ worker-1 ─▶ handler(task)
//!                                            └────▶ worker-N ─▶ handler(task)
//! ```
//!
//! - `submit` nunca bloquea: con la cola llena retorna `SubmitError::QueueFull`
//!   y el llamador decide (backpressure).
//! - Cada tarea se ejecuta una sola vez, sin reintentos; los errores son
//!   responsabilidad de la tarea (cerrar su conexión).
//! - El apagado cierra la cola: los workers terminan las tareas pendientes,
//!   salen de la espera y se hace `join` de todos.

use crate::sync::{BlockingQueue, PushError};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info};

/// Motivo por el que una tarea no fue aceptada
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// La cola de tareas está llena
    #[error("worker queue is full")]
    QueueFull,

    /// El pool ya fue apagado
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Pool de threads con cola de tareas acotada
pub struct WorkerPool<T: Send + 'static> {
    queue: Arc<BlockingQueue<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Crea el pool e inicia `threads` workers
    ///
    /// `handler` es el punto de entrada que cada worker invoca por tarea.
    pub fn new<F>(threads: usize, queue_capacity: usize, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let queue = Arc::new(BlockingQueue::new(queue_capacity));
        let handler = Arc::new(handler);
        let mut workers = Vec::with_capacity(threads);

        for id in 0..threads.max(1) {
            let worker_queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);

            let spawned = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || Self::worker_loop(id, &worker_queue, handler.as_ref()));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Liberar los workers ya creados antes de reportar
                    queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        info!(threads = workers.len(), capacity = queue.capacity(), "worker pool started");

        Ok(Self { queue, workers })
    }

    /// Loop principal del worker
    fn worker_loop(id: usize, queue: &BlockingQueue<T>, handler: &(dyn Fn(T) + Send + Sync)) {
        debug!(worker = id, "worker started");

        while let Some(task) = queue.pop() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(task)));
            if outcome.is_err() {
                error!(worker = id, "task panicked; worker keeps running");
            }
        }

        debug!(worker = id, "worker stopped");
    }

    /// Encola una tarea sin bloquear
    pub fn submit(&self, task: T) -> Result<(), SubmitError> {
        self.queue.try_push(task).map_err(|e| match e {
            PushError::Full(_) => SubmitError::QueueFull,
            PushError::Closed(_) => SubmitError::ShutDown,
        })
    }

    /// Número de workers
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Tareas esperando en la cola
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Apaga el pool: cierra la cola y espera a todos los workers
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.queue.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }

        info!("worker pool stopped");
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
