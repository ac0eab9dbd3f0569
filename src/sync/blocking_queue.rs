//! # Cola Bloqueante Acotada
//! src/sync/blocking_queue.rs
//!
//! Cola FIFO thread-safe de capacidad fija, protegida por un `Mutex` y una
//! `Condvar`. Es la base de la cola de tareas del pool de workers.
//!
//! - `try_push` nunca bloquea: si la cola está llena devuelve el elemento.
//! - `pop` bloquea hasta que haya un elemento o la cola se cierre.
//! - `close` despierta a todos los consumidores; los elementos pendientes
//!   se siguen entregando hasta vaciar la cola.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Motivo por el que `try_push` rechazó un elemento
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// La cola alcanzó su capacidad máxima
    Full(T),

    /// La cola fue cerrada
    Closed(T),
}

impl<T> std::fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "queue is full"),
            PushError::Closed(_) => write!(f, "queue is closed"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for PushError<T> {}

impl<T> PushError<T> {
    /// Recupera el elemento rechazado
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Cola FIFO acotada con espera bloqueante
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    /// Notifica a los consumidores que hay elementos (o que se cerró)
    available: Condvar,
    capacity: usize,
}

impl<T> BlockingQueue<T> {
    /// Crea una cola con capacidad máxima `capacity` (mínimo 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encola sin bloquear
    ///
    /// Retorna `Err(PushError::Full)` si la cola está llena; el llamador
    /// decide qué hacer con el elemento (backpressure).
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();

        if state.closed {
            return Err(PushError::Closed(item));
        }
        if state.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }

        state.items.push_back(item);
        drop(state);

        // Un elemento nuevo despierta exactamente a un consumidor
        self.available.notify_one();
        Ok(())
    }

    /// Desencola, bloqueando mientras la cola esté vacía
    ///
    /// Retorna `None` solo cuando la cola está cerrada y vacía.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Cierra la cola y despierta a todos los consumidores
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Verifica si la cola fue cerrada
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Número de elementos encolados
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Verifica si la cola está vacía
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verifica si la cola está llena
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Capacidad máxima
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = BlockingQueue::new(10);
        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();
        queue.try_push(3).unwrap();

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_capacity() {
        let queue = BlockingQueue::new(2);

        assert!(queue.try_push("a").is_ok());
        assert!(queue.try_push("b").is_ok());
        assert!(queue.is_full());
        // Cola llena: se devuelve el elemento sin bloquear
        assert_eq!(queue.try_push("c"), Err(PushError::Full("c")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(BlockingQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        queue.try_push(42).unwrap();

        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_close_wakes_consumers() {
        let queue: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new(4));
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        queue.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_close_drains_pending_items() {
        let queue = BlockingQueue::new(4);
        queue.try_push(7).unwrap();
        queue.close();

        assert!(matches!(queue.try_push(8), Err(PushError::Closed(8))));
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = BlockingQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.try_push(()).is_ok());
        assert!(queue.try_push(()).is_err());
    }

    #[test]
    fn test_into_inner() {
        assert_eq!(PushError::Full(5).into_inner(), 5);
        assert_eq!(PushError::Closed(6).into_inner(), 6);
    }
}
