//! # Servidor
//! src/server/mod.rs
//!
//! Reactor epoll, estado por conexión y el puente de señales.
//!
//! ```text
//! accept ─▶ HttpConn + timer ─▶ epoll (Read, ONESHOT)
//!                                  │
//!            reactor: read_once ◀──┘
//!                 │
//!                 ▼
//!          WorkerPool ─▶ process / write_once ─▶ rearm(Read|Write) o close
//! ```

pub mod conn;
pub mod context;
pub mod epoll;
pub mod reactor;
pub mod signal;
pub mod stats;

pub use conn::{HttpConn, ProcessOutcome, WriteOutcome};
pub use reactor::Server;
pub use signal::{install_handlers, ShutdownHandle, SignalGuard, SignalPipe};
pub use stats::{ServerStats, StatsSnapshot};
