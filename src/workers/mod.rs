//! # Workers
//! src/workers/mod.rs
//!
//! Pool fijo de threads que ejecuta el trabajo de las conexiones fuera del
//! thread del reactor.

pub mod pool;

pub use pool::{SubmitError, WorkerPool};
