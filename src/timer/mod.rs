//! # Timers de Inactividad
//! src/timer/mod.rs
//!
//! Cada conexión aceptada tiene a lo sumo un timer. Cada lectura o escritura
//! exitosa lo empuja hacia adelante; el barrido periódico cierra las
//! conexiones cuyo timer venció.

pub mod list;

pub use list::{TimerId, TimerList};
