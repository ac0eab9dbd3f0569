//! # Pool Genérico de Recursos
//! src/resource/pool.rs
//!
//! Mantiene un número acotado de recursos caros (conexiones a un backend)
//! listos para reutilizarse.
//!
//! ```text
//!            ┌──────── producer: crea uno si la cola está vacía y count < max
//!            ▼
//!   [ idle: VecDeque<(R, last_seen)> ] ◀── release (Drop del handle)
//!            │          ▲
//!  acquire ◀─┘          └── reaper: cada max_idle, expulsa la cabeza
//!                           mientras esté ociosa y count > init/2 + 1
//! ```
//!
//! `count` incluye los recursos prestados y los que el productor está
//! creando en ese momento, así que nunca supera `max_size`.
//!
//! El reaper solo mira la cabeza de la cola: el tiempo ocioso de un recurso
//! es "tiempo desde que volvió al pool", medido en orden FIFO. No es un LRU
//! exacto.

use std::collections::VecDeque;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Espera del productor después de un fallo al crear un recurso
const CREATE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Fábrica de recursos del pool
pub trait ResourceFactory<R>: Send + Sync + 'static {
    /// Crea un recurso nuevo; puede bloquear (conexión de red)
    fn create(&self) -> io::Result<R>;
}

impl<R, F> ResourceFactory<R> for F
where
    F: Fn() -> io::Result<R> + Send + Sync + 'static,
{
    fn create(&self) -> io::Result<R> {
        self()
    }
}

/// Límites del pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Recursos creados al construir el pool
    pub init_size: usize,

    /// Máximo de recursos vivos (ociosos + prestados)
    pub max_size: usize,

    /// Periodo del reaper y tiempo ocioso máximo de la cabeza de la cola
    pub max_idle: Duration,
}

impl PoolConfig {
    /// Piso bajo el cual el reaper no expulsa recursos
    pub fn floor(&self) -> usize {
        self.init_size / 2 + 1
    }
}

struct Idle<R> {
    resource: R,
    last_seen: Instant,
}

struct State<R> {
    idle: VecDeque<Idle<R>>,
    count: usize,
    stopped: bool,
}

struct Shared<R> {
    state: Mutex<State<R>>,
    /// Despierta a acquirers, productor y reaper (siempre broadcast)
    changed: Condvar,
    factory: Box<dyn ResourceFactory<R>>,
    config: PoolConfig,
}

impl<R> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State<R>>) -> MutexGuard<'a, State<R>> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, resource: R) {
        let mut state = self.lock();
        state.idle.push_back(Idle {
            resource,
            last_seen: Instant::now(),
        });
        drop(state);
        self.changed.notify_all();
    }

    fn discard(&self) {
        let mut state = self.lock();
        state.count = state.count.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }
}

/// Pool acotado de recursos con productor y reaper en segundo plano
pub struct ResourcePool<R: Send + 'static> {
    shared: Arc<Shared<R>>,
    producer: Option<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
}

impl<R: Send + 'static> ResourcePool<R> {
    /// Crea el pool, produce `init_size` recursos e inicia los threads
    ///
    /// Un fallo al crear un recurso inicial no es fatal: el productor lo
    /// reintentará cuando la cola quede vacía.
    pub fn new<F>(config: PoolConfig, factory: F) -> io::Result<Self>
    where
        F: ResourceFactory<R>,
    {
        let config = PoolConfig {
            max_size: config.max_size.max(1),
            init_size: config.init_size.min(config.max_size.max(1)),
            max_idle: config.max_idle,
        };

        let mut idle = VecDeque::with_capacity(config.max_size);
        for _ in 0..config.init_size {
            match factory.create() {
                Ok(resource) => idle.push_back(Idle {
                    resource,
                    last_seen: Instant::now(),
                }),
                Err(e) => warn!(error = %e, "failed to create initial pooled resource"),
            }
        }
        let count = idle.len();

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                idle,
                count,
                stopped: false,
            }),
            changed: Condvar::new(),
            factory: Box::new(factory),
            config,
        });

        let producer = {
            let producer_shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("pool-producer".to_string())
                .spawn(move || produce_loop(&producer_shared))?
        };

        let reaper = {
            let reaper_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name("pool-reaper".to_string())
                .spawn(move || reap_loop(&reaper_shared));
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    shared.lock().stopped = true;
                    shared.changed.notify_all();
                    let _ = producer.join();
                    return Err(e);
                }
            }
        };

        info!(
            initial = count,
            max = config.max_size,
            max_idle_ms = config.max_idle.as_millis() as u64,
            "resource pool started"
        );

        Ok(Self {
            shared,
            producer: Some(producer),
            reaper: Some(reaper),
        })
    }

    /// Obtiene un recurso, bloqueando mientras el pool esté vacío
    ///
    /// Nunca crea recursos en el thread del llamador: espera a que otro
    /// los devuelva o a que el productor agregue uno.
    pub fn acquire(&self) -> PooledResource<R> {
        let mut state = self.shared.lock();
        loop {
            if let Some(idle) = state.idle.pop_front() {
                drop(state);
                // El productor necesita ver la cola vacía
                self.shared.changed.notify_all();
                return self.handle(idle.resource);
            }
            state = self.shared.wait(state);
        }
    }

    /// Como `acquire`, pero se rinde después de `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PooledResource<R>> {
        let state = self.shared.lock();
        let (mut state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, timeout, |s| s.idle.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let idle = state.idle.pop_front()?;
        drop(state);
        self.shared.changed.notify_all();
        Some(self.handle(idle.resource))
    }

    fn handle(&self, resource: R) -> PooledResource<R> {
        PooledResource {
            resource: Some(resource),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Recursos vivos (ociosos + prestados)
    pub fn size(&self) -> usize {
        self.shared.lock().count
    }

    /// Recursos disponibles en la cola
    pub fn idle(&self) -> usize {
        self.shared.lock().idle.len()
    }

    /// Límites efectivos
    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }
}

impl<R: Send + 'static> Drop for ResourcePool<R> {
    fn drop(&mut self) {
        self.shared.lock().stopped = true;
        self.shared.changed.notify_all();

        for handle in [self.producer.take(), self.reaper.take()].into_iter().flatten() {
            let _ = handle.join();
        }

        debug!("resource pool stopped");
    }
}

/// Thread productor: agrega un recurso cada vez que la cola se vacía
fn produce_loop<R: Send + 'static>(shared: &Shared<R>) {
    loop {
        let mut state = shared.lock();
        while !state.stopped && (!state.idle.is_empty() || state.count >= shared.config.max_size) {
            state = shared.wait(state);
        }
        if state.stopped {
            return;
        }

        // Reservar el lugar antes de soltar el lock
        state.count += 1;
        drop(state);

        match shared.factory.create() {
            Ok(resource) => {
                debug!("pooled resource created");
                shared.release(resource);
            }
            Err(e) => {
                warn!(error = %e, "failed to create pooled resource");
                let mut state = shared.lock();
                state.count -= 1;
                let _ = shared
                    .changed
                    .wait_timeout_while(state, CREATE_RETRY_DELAY, |s| !s.stopped)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

/// Thread reaper: recorta recursos ociosos desde la cabeza de la cola
fn reap_loop<R: Send + 'static>(shared: &Shared<R>) {
    let config = shared.config;
    let floor = config.floor();

    loop {
        let state = shared.lock();
        let (mut state, _) = shared
            .changed
            .wait_timeout_while(state, config.max_idle, |s| !s.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        if state.stopped {
            return;
        }

        let mut evicted = Vec::new();
        while state.count > floor {
            match state.idle.front() {
                Some(head) if head.last_seen.elapsed() >= config.max_idle => {
                    if let Some(head) = state.idle.pop_front() {
                        evicted.push(head.resource);
                    }
                    state.count -= 1;
                }
                _ => break,
            }
        }
        let remaining = state.count;
        drop(state);

        if !evicted.is_empty() {
            info!(evicted = evicted.len(), remaining, "reaped idle pooled resources");
        }
        // Los recursos se cierran fuera del lock
        drop(evicted);
    }
}

/// Recurso prestado; vuelve al pool al salir de scope
pub struct PooledResource<R> {
    resource: Option<R>,
    shared: Arc<Shared<R>>,
}

impl<R> PooledResource<R> {
    /// Descarta el recurso (por ejemplo, una conexión rota) en vez de
    /// devolverlo; el productor podrá reemplazarlo
    pub fn discard(mut self) {
        self.resource = None;
        self.shared.discard();
    }
}

impl<R> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &R {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<R> DerefMut for PooledResource<R> {
    fn deref_mut(&mut self) -> &mut R {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<R> Drop for PooledResource<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.shared.release(resource);
        }
    }
}
