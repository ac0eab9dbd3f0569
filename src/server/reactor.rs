//! # Reactor
//! src/server/reactor.rs
//!
//! Loop de eventos del servidor. Un solo thread espera en epoll y despacha:
//!
//! - listener: acepta todas las conexiones pendientes (hasta el límite)
//! - pipe de señales: `Alarm` marca el barrido de timers, `Terminate` detiene
//! - conexión con hangup: se cierra
//! - conexión legible: se vacía el socket en el reactor y se encola el parseo
//! - conexión escribible: se encola el envío
//!
//! Después de cada pasada se reintentan las tareas que la cola de workers
//! rechazó y, si llegó una alarma, se barren los timers. Mientras haya tareas
//! postergadas la espera en epoll tiene un tope de `RETRY_INTERVAL`: el
//! socket ya se vació y su registro ONESHOT no volverá a disparar.

use crate::backend::Backend;
use crate::config::{BackendConfig, Config};
use crate::error::{Error, Result};
use crate::http::{NoRewrite, TargetRewriter};
use crate::server::context::{ReadDispatch, ServerContext, Task};
use crate::server::epoll::{Events, Interest};
use crate::server::signal::{ShutdownHandle, SignalCode, SignalPipe, Ticker};
use crate::server::stats::ServerStats;
use crate::workers::{SubmitError, WorkerPool};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tope de espera en epoll mientras haya tareas postergadas
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Servidor HTTP/1.1 basado en epoll
pub struct Server {
    config: Config,
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    signals: SignalPipe,
    workers: WorkerPool<Task>,
    /// Tareas que la cola rechazó, en orden de llegada
    deferred: VecDeque<Task>,
    backend: Option<Backend>,
}

impl Server {
    /// Hace bind y prepara el servidor sin reescritura de targets
    pub fn bind(config: Config) -> Result<Self> {
        Self::with_rewriter(config, Box::new(NoRewrite))
    }

    /// Hace bind con un colaborador que reescribe targets
    pub fn with_rewriter(config: Config, rewriter: Box<dyn TargetRewriter>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let listener = TcpListener::bind(config.address())?;
        listener.set_nonblocking(true)?;

        let signals = SignalPipe::new()?;
        let ctx = Arc::new(ServerContext::new(&config, rewriter)?);

        // Listener y pipe: nivel, sin ONESHOT
        ctx.epoll().register(listener.as_raw_fd(), Interest::Read, false)?;
        ctx.epoll().register(signals.reader_fd(), Interest::Read, false)?;

        let worker_ctx = Arc::clone(&ctx);
        let workers = WorkerPool::new(config.workers, config.queue_capacity, move |task| {
            worker_ctx.handle_task(task)
        })?;

        let backend = match &config.backend_config {
            Some(path) => {
                let backend_config = BackendConfig::load(path)?;
                Some(Backend::connect(&backend_config)?)
            }
            None => None,
        };

        info!(
            address = %listener.local_addr()?,
            workers = workers.threads(),
            doc_root = %config.doc_root.display(),
            "server listening"
        );

        Ok(Self {
            config,
            ctx,
            listener,
            signals,
            workers,
            deferred: VecDeque::new(),
            backend,
        })
    }

    /// Dirección real (útil con puerto 0)
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle para detener `run` desde otro thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.signals.sender())
    }

    /// Pipe al que deben escribir los handlers de señales
    pub fn signal_pipe(&self) -> &SignalPipe {
        &self.signals
    }

    /// Pool de conexiones al backend, si se configuró
    pub fn backend(&self) -> Option<&Backend> {
        self.backend.as_ref()
    }

    pub fn stats(&self) -> &ServerStats {
        self.ctx.stats()
    }

    /// Corre el loop de eventos hasta recibir `Terminate`
    pub fn run(mut self) -> Result<()> {
        let ticker = Ticker::spawn(self.signals.sender(), self.config.timeslot())?;
        let mut events = Events::with_capacity(self.config.max_events);
        let listener_fd = self.listener.as_raw_fd();
        let signal_fd = self.signals.reader_fd();

        let result = loop {
            let wait = (!self.deferred.is_empty()).then_some(RETRY_INTERVAL);
            match self.ctx.epoll().wait(&mut events, wait) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "epoll wait failed");
                    break Err(Error::from(e));
                }
            }

            let mut timeout = false;
            let mut stop = false;

            for event in events.iter() {
                let fd = event.fd();

                if fd == listener_fd {
                    self.accept_pending();
                } else if fd == signal_fd {
                    match self.signals.drain() {
                        Ok(codes) => {
                            for code in codes {
                                match code {
                                    SignalCode::Alarm => timeout = true,
                                    SignalCode::Terminate => stop = true,
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to drain signal pipe"),
                    }
                } else if event.is_hangup() {
                    debug!(fd, "peer hung up");
                    self.ctx.close(fd);
                } else if event.is_readable() {
                    self.dispatch_read(fd);
                } else if event.is_writable() {
                    self.dispatch_write(fd);
                }
            }

            self.retry_deferred();

            if timeout {
                let closed = self.ctx.sweep(Instant::now());
                if closed > 0 {
                    debug!(closed, "timer sweep");
                }
            }

            if stop {
                info!("shutdown requested");
                break Ok(());
            }
        };

        drop(ticker);
        self.deferred.clear();
        self.workers.shutdown();
        self.ctx.close_all();
        info!(stats = %self.ctx.stats().to_json(), "server stopped");

        result
    }

    fn accept_pending(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.ctx.stats().live() >= self.config.max_connections {
                        self.ctx.stats().record_rejected();
                        warn!(peer = %addr, "connection limit reached; rejecting");
                        continue;
                    }
                    if let Err(e) = self.ctx.open(stream, addr) {
                        self.ctx.stats().record_rejected();
                        warn!(peer = %addr, error = %e, "failed to open connection");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn dispatch_read(&mut self, fd: RawFd) {
        if let ReadDispatch::Ready(task) = self.ctx.read_ready(fd) {
            self.submit(task);
        }
    }

    fn dispatch_write(&mut self, fd: RawFd) {
        if let Some(task) = self.ctx.write_ready(fd) {
            self.submit(task);
        }
    }

    /// Encola `task`; si la cola está llena queda postergada
    ///
    /// Con tareas ya postergadas la nueva va detrás, para no adelantarlas.
    fn submit(&mut self, task: Task) {
        if self.deferred.is_empty() {
            match self.workers.submit(task) {
                Ok(()) => return,
                Err(SubmitError::QueueFull) => {}
                Err(SubmitError::ShutDown) => {
                    self.ctx.discard(task);
                    return;
                }
            }
        }

        self.ctx.stats().record_queue_full();
        warn!(
            fd = task.fd,
            deferred = self.deferred.len() + 1,
            "worker queue full; deferring task"
        );
        self.deferred.push_back(task);
    }

    /// Reintenta las tareas postergadas hasta que la cola vuelva a llenarse
    fn retry_deferred(&mut self) {
        while let Some(task) = self.deferred.pop_front() {
            match self.workers.submit(task) {
                Ok(()) => debug!(fd = task.fd, "deferred task submitted"),
                Err(SubmitError::QueueFull) => {
                    self.deferred.push_front(task);
                    return;
                }
                Err(SubmitError::ShutDown) => self.ctx.discard(task),
            }
        }
    }
}
