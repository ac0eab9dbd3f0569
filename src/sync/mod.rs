//! # Primitivas de Sincronización
//! src/sync/mod.rs
//!
//! Estructuras compartidas entre threads productores y consumidores.

pub mod blocking_queue;

pub use blocking_queue::{BlockingQueue, PushError};
