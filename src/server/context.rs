//! # Contexto del Servidor
//! src/server/context.rs
//!
//! Estado compartido entre el reactor y los workers:
//!
//! - tabla de conexiones indexada por fd (un `HttpConn` reutilizado por slot)
//! - lista de timers de inactividad y su índice por fd
//! - instancia de epoll, estadísticas y resolución de archivos
//!
//! Orden de locks: slot y luego timers. Ningún lock se mantiene durante una
//! espera de I/O bloqueante (los sockets son no bloqueantes).
//!
//! Cada evento entregado a una conexión termina en exactamente un `rearm`
//! o un `close`.

use crate::config::Config;
use crate::http::{StaticFiles, TargetRewriter};
use crate::server::conn::{HttpConn, ProcessOutcome, WriteOutcome};
use crate::server::epoll::{Epoll, Interest};
use crate::server::stats::ServerStats;
use crate::timer::{TimerId, TimerList};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// fds reservados para listener, epoll, pipe de señales y archivos de log
const FD_HEADROOM: usize = 64;

/// Tamaño máximo de la tabla de conexiones
const MAX_FD: usize = 65_536;

/// La tabla se indexa por fd: debe cubrir el límite de fds del proceso,
/// no solo `max_connections`
fn fd_table_size(max_connections: usize) -> usize {
    let floor = max_connections.saturating_add(FD_HEADROOM);
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit solo escribe en `limit`
    let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if ret != 0 {
        return floor;
    }
    usize::try_from(limit.rlim_cur)
        .unwrap_or(MAX_FD)
        .min(MAX_FD)
        .max(floor)
}

/// Trabajo encolado para los workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub fd: RawFd,
    /// Generación del slot al despachar; descarta tareas de una conexión
    /// ya cerrada cuyo fd fue reutilizado
    pub generation: u64,
    pub kind: TaskKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Parsear lo leído y armar la respuesta
    Process,

    /// Enviar la respuesta pendiente
    Write,
}

/// Resultado de que el reactor lea un socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDispatch {
    /// Bytes leídos; procesar en un worker
    Ready(Task),

    /// La conexión se cerró (peer cerró o error)
    Closed,

    /// El slot no tiene una conexión abierta
    Vacant,
}

struct Slot {
    conn: Option<Box<HttpConn>>,
    generation: u64,
}

impl Slot {
    fn open_conn(&mut self) -> Option<&mut HttpConn> {
        self.conn.as_deref_mut().filter(|c| c.is_open())
    }
}

/// Datos del cliente asociados a un timer
#[derive(Debug, Clone, Copy)]
struct ClientData {
    fd: RawFd,
    generation: u64,
    addr: SocketAddr,
}

struct TimerState {
    list: TimerList<ClientData>,
    by_fd: HashMap<RawFd, TimerId>,
}

/// Estado compartido del servidor
pub struct ServerContext {
    epoll: Epoll,
    slots: Box<[Mutex<Slot>]>,
    timers: Mutex<TimerState>,
    stats: ServerStats,
    files: StaticFiles,
    rewriter: Box<dyn TargetRewriter>,
    idle_budget: Duration,
    read_buffer_size: usize,
    write_buffer_size: usize,
    default_doc: String,
}

impl ServerContext {
    pub fn new(config: &Config, rewriter: Box<dyn TargetRewriter>) -> io::Result<Self> {
        let slots = (0..fd_table_size(config.max_connections))
            .map(|_| {
                Mutex::new(Slot {
                    conn: None,
                    generation: 0,
                })
            })
            .collect();

        Ok(Self {
            epoll: Epoll::new()?,
            slots,
            timers: Mutex::new(TimerState {
                list: TimerList::with_capacity(config.max_connections),
                by_fd: HashMap::with_capacity(config.max_connections),
            }),
            stats: ServerStats::new(),
            files: StaticFiles::new(&config.doc_root, &config.default_doc, config.dir_index),
            rewriter,
            idle_budget: config.idle_budget(),
            read_buffer_size: config.read_buffer_size,
            write_buffer_size: config.write_buffer_size,
            default_doc: config.default_doc.clone(),
        })
    }

    pub fn epoll(&self) -> &Epoll {
        &self.epoll
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Conexiones con timer activo
    pub fn timers_len(&self) -> usize {
        self.lock_timers().list.len()
    }

    fn lock_slot(&self, fd: RawFd) -> Option<MutexGuard<'_, Slot>> {
        let cell = usize::try_from(fd).ok().and_then(|i| self.slots.get(i))?;
        Some(cell.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn lock_timers(&self) -> MutexGuard<'_, TimerState> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registra una conexión aceptada: slot, timer y epoll (lectura, ONESHOT)
    ///
    /// Si el fd no cabe en la tabla el socket se cierra y se retorna error.
    pub fn open(&self, stream: TcpStream, addr: SocketAddr) -> io::Result<()> {
        stream.set_nonblocking(true)?;
        let fd = stream.as_raw_fd();

        let Some(mut slot) = self.lock_slot(fd) else {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("fd {} exceeds the connection table", fd),
            ));
        };

        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        let (read_size, write_size) = (self.read_buffer_size, self.write_buffer_size);
        let default_doc = &self.default_doc;
        slot.conn
            .get_or_insert_with(|| Box::new(HttpConn::new(read_size, write_size, default_doc)))
            .init(stream, addr);

        {
            let mut timers = self.lock_timers();
            let data = ClientData { fd, generation, addr };
            let id = timers.list.insert(Instant::now() + self.idle_budget, data);
            timers.by_fd.insert(fd, id);
        }

        let live = self.stats.connection_opened();

        if let Err(e) = self.epoll.register(fd, Interest::Read, true) {
            self.close_locked(fd, &mut slot);
            return Err(e);
        }

        debug!(peer = %addr, fd, live, "connection opened");
        Ok(())
    }

    /// Cierra: quita el timer, sale de epoll, cierra el socket y descuenta
    fn close_locked(&self, fd: RawFd, slot: &mut Slot) {
        let Some(conn) = slot.conn.as_deref_mut() else {
            return;
        };
        let peer = conn.peer_addr();

        {
            let mut timers = self.lock_timers();
            if let Some(id) = timers.by_fd.remove(&fd) {
                timers.list.remove(id);
            }
        }

        // El fd sigue abierto hasta soltar el stream
        if let Err(e) = self.epoll.unregister(fd) {
            debug!(fd, error = %e, "unregister failed");
        }

        if conn.close().is_some() {
            self.stats.connection_closed();
            debug!(peer = ?peer, fd, "connection closed");
        }
    }

    /// Cierra la conexión de `fd` si está abierta
    pub fn close(&self, fd: RawFd) {
        if let Some(mut slot) = self.lock_slot(fd) {
            if slot.open_conn().is_some() {
                self.close_locked(fd, &mut slot);
            }
        }
    }

    /// Cierra todas las conexiones abiertas
    pub fn close_all(&self) {
        let fds: Vec<RawFd> = {
            let timers = self.lock_timers();
            timers.by_fd.keys().copied().collect()
        };
        for fd in fds {
            self.close(fd);
        }
    }

    /// Posterga el timer de `fd` un presupuesto de inactividad completo
    fn touch(&self, fd: RawFd) {
        let mut timers = self.lock_timers();
        if let Some(id) = timers.by_fd.get(&fd).copied() {
            timers.list.adjust(id, Instant::now() + self.idle_budget);
        }
    }

    /// Lectura en el thread del reactor: vacía el socket en el buffer
    pub fn read_ready(&self, fd: RawFd) -> ReadDispatch {
        let Some(mut slot) = self.lock_slot(fd) else {
            return ReadDispatch::Vacant;
        };
        let generation = slot.generation;
        let Some(conn) = slot.open_conn() else {
            return ReadDispatch::Vacant;
        };

        match conn.read_once() {
            Ok(n) => {
                debug!(fd, bytes = n, "read");
                self.touch(fd);
                ReadDispatch::Ready(Task {
                    fd,
                    generation,
                    kind: TaskKind::Process,
                })
            }
            Err(e) => {
                debug!(fd, error = %e, "read failed");
                self.close_locked(fd, &mut slot);
                ReadDispatch::Closed
            }
        }
    }

    /// Escritura lista: posterga el timer y arma la tarea
    pub fn write_ready(&self, fd: RawFd) -> Option<Task> {
        let mut slot = self.lock_slot(fd)?;
        let generation = slot.generation;
        slot.open_conn()?;
        self.touch(fd);

        Some(Task {
            fd,
            generation,
            kind: TaskKind::Write,
        })
    }

    /// Cierra la conexión de una tarea que no se va a ejecutar
    ///
    /// Si el fd ya pertenece a otra conexión no hace nada.
    pub fn discard(&self, task: Task) {
        let Some(mut slot) = self.lock_slot(task.fd) else {
            return;
        };
        if slot.generation == task.generation && slot.open_conn().is_some() {
            self.close_locked(task.fd, &mut slot);
        }
    }

    /// Punto de entrada de los workers
    pub fn handle_task(&self, task: Task) {
        let Some(mut slot) = self.lock_slot(task.fd) else {
            return;
        };
        if slot.generation != task.generation {
            debug!(fd = task.fd, "stale task dropped");
            return;
        }
        let Some(conn) = slot.open_conn() else {
            return;
        };

        let next = match task.kind {
            TaskKind::Process => match conn.process(&self.files, self.rewriter.as_ref()) {
                ProcessOutcome::NeedRead => Some(Interest::Read),
                ProcessOutcome::NeedWrite => {
                    if let Some(status) = conn.status() {
                        self.stats.record_response(status);
                    }
                    Some(Interest::Write)
                }
                ProcessOutcome::Close => None,
            },
            TaskKind::Write => match conn.write_once() {
                WriteOutcome::Pending => Some(Interest::Write),
                WriteOutcome::KeepAlive => Some(Interest::Read),
                WriteOutcome::Done | WriteOutcome::Failed => None,
            },
        };

        match next {
            Some(interest) => {
                if let Err(e) = self.epoll.rearm(task.fd, interest) {
                    warn!(fd = task.fd, error = %e, "rearm failed");
                    self.close_locked(task.fd, &mut slot);
                }
            }
            None => self.close_locked(task.fd, &mut slot),
        }
    }

    /// Cierra las conexiones cuyo timer venció antes de `now`
    pub fn sweep(&self, now: Instant) -> usize {
        let expired = {
            let mut timers = self.lock_timers();
            let TimerState { list, by_fd } = &mut *timers;
            let mut expired = Vec::new();
            list.sweep(now, |client| {
                by_fd.remove(&client.fd);
                expired.push(client);
            });
            expired
        };

        let mut closed = 0;
        for client in expired {
            let Some(mut slot) = self.lock_slot(client.fd) else {
                continue;
            };
            if slot.generation != client.generation || slot.open_conn().is_none() {
                continue;
            }
            info!(peer = %client.addr, fd = client.fd, "closing idle connection");
            self.close_locked(client.fd, &mut slot);
            self.stats.record_timeout();
            closed += 1;
        }

        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::NoRewrite;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn context(idle_slots: u32) -> (ServerContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "hola").unwrap();

        let config = Config {
            doc_root: dir.path().to_path_buf(),
            max_connections: 1024,
            timeslot_secs: 1,
            idle_slots,
            ..Config::default()
        };
        (ServerContext::new(&config, Box::new(NoRewrite)).unwrap(), dir)
    }

    fn accept(ctx: &ServerContext, listener: &TcpListener) -> (RawFd, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, addr) = listener.accept().unwrap();
        let fd = stream.as_raw_fd();
        ctx.open(stream, addr).unwrap();
        (fd, client)
    }

    /// Da tiempo a que los bytes del cliente lleguen y los lee
    fn read_after_delay(ctx: &ServerContext, fd: RawFd) -> Task {
        std::thread::sleep(Duration::from_millis(50));
        match ctx.read_ready(fd) {
            ReadDispatch::Ready(task) => task,
            other => panic!("unexpected read outcome {:?}", other),
        }
    }

    #[test]
    fn test_open_tracks_timer_and_stats() {
        let (ctx, _dir) = context(3);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();

        let (fd, _client) = accept(&ctx, &listener);

        assert_eq!(ctx.stats().live(), 1);
        assert_eq!(ctx.timers_len(), 1);

        ctx.close(fd);
        assert_eq!(ctx.stats().live(), 0);
        assert_eq!(ctx.timers_len(), 0);

        // Cerrar dos veces no descuenta dos veces
        ctx.close(fd);
        assert_eq!(ctx.stats().live(), 0);
    }

    #[test]
    fn test_process_and_write_tasks() {
        let (ctx, _dir) = context(3);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (fd, mut client) = accept(&ctx, &listener);

        client.write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
        let task = read_after_delay(&ctx, fd);
        assert_eq!(task.kind, TaskKind::Process);

        // El request quedó completo: el worker arma la respuesta
        ctx.handle_task(task);
        let write = ctx.write_ready(fd).unwrap();
        ctx.handle_task(write);

        let mut text = String::new();
        client.read_to_string(&mut text).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hola"));

        // Sin keep-alive la conexión se cerró
        assert_eq!(ctx.stats().live(), 0);
        assert_eq!(ctx.stats().snapshot().responses.get(&200), Some(&1));
    }

    #[test]
    fn test_stale_task_is_ignored() {
        let (ctx, _dir) = context(3);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (fd, mut client) = accept(&ctx, &listener);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut task = read_after_delay(&ctx, fd);
        task.generation += 1;

        ctx.handle_task(task);

        // Nada se procesó ni se cerró
        assert_eq!(ctx.stats().live(), 1);
        assert!(ctx.stats().snapshot().responses.is_empty());
    }

    #[test]
    fn test_discard_checks_generation() {
        let (ctx, _dir) = context(3);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (fd, mut client) = accept(&ctx, &listener);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let task = read_after_delay(&ctx, fd);

        // Una tarea de otra generación no toca la conexión actual
        ctx.discard(Task {
            generation: task.generation + 1,
            ..task
        });
        assert_eq!(ctx.stats().live(), 1);

        ctx.discard(task);
        assert_eq!(ctx.stats().live(), 0);
        assert_eq!(ctx.timers_len(), 0);
    }

    #[test]
    fn test_read_after_peer_close_closes() {
        let (ctx, _dir) = context(3);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (fd, client) = accept(&ctx, &listener);
        drop(client);

        let mut outcome = ctx.read_ready(fd);
        for _ in 0..200 {
            if !matches!(outcome, ReadDispatch::Ready(_)) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
            outcome = ctx.read_ready(fd);
        }

        assert_eq!(outcome, ReadDispatch::Closed);
        assert_eq!(ctx.read_ready(fd), ReadDispatch::Vacant);
        assert_eq!(ctx.stats().live(), 0);
    }

    #[test]
    fn test_sweep_closes_only_expired() {
        let (ctx, _dir) = context(1);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (_a, _client_a) = accept(&ctx, &listener);
        let (_b, _client_b) = accept(&ctx, &listener);

        assert_eq!(ctx.sweep(Instant::now()), 0);
        assert_eq!(ctx.sweep(Instant::now() + Duration::from_secs(2)), 2);

        assert_eq!(ctx.stats().live(), 0);
        assert_eq!(ctx.stats().snapshot().timed_out, 2);
        assert_eq!(ctx.timers_len(), 0);
    }

    #[test]
    fn test_close_all() {
        let (ctx, _dir) = context(3);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _conns: Vec<_> = (0..3).map(|_| accept(&ctx, &listener)).collect();

        ctx.close_all();

        assert_eq!(ctx.stats().live(), 0);
    }
}
