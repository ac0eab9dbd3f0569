//! # Pool de Recursos
//! src/resource/mod.rs

pub mod pool;

pub use pool::{PoolConfig, PooledResource, ResourceFactory, ResourcePool};
