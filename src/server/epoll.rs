//! # Multiplexor epoll
//! src/server/epoll.rs
//!
//! Envoltura mínima sobre epoll de Linux. El token de cada registro es el
//! propio fd.
//!
//! Disciplina de registro:
//!
//! - listener y pipe de señales: lectura, nivel, sin ONESHOT
//! - conexiones: lectura o escritura con `EPOLLONESHOT`; después de cada
//!   evento entregado hay que llamar `rearm` exactamente una vez (o cerrar)
//!
//! Todo registro incluye `EPOLLRDHUP` para detectar el cierre del peer.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Interés de un registro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn flags(self, oneshot: bool) -> u32 {
        let mut flags = match self {
            Interest::Read => libc::EPOLLIN as u32,
            Interest::Write => libc::EPOLLOUT as u32,
        };
        flags |= libc::EPOLLRDHUP as u32;
        if oneshot {
            flags |= libc::EPOLLONESHOT as u32;
        }
        flags
    }
}

/// Evento listo entregado por `wait`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    fd: RawFd,
    flags: u32,
}

impl Event {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_readable(&self) -> bool {
        self.flags & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & libc::EPOLLOUT as u32 != 0
    }

    /// El peer cerró o el socket tiene un error
    pub fn is_hangup(&self) -> bool {
        self.flags & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

/// Buffer de eventos reutilizable
pub struct Events {
    buf: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.buf[..self.len].iter().map(|ev| {
            // epoll_event es packed: copiar los campos antes de usarlos
            let flags = ev.events;
            let token = ev.u64;
            Event {
                fd: token as RawFd,
                flags,
            }
        })
    }
}

/// Instancia de epoll
#[derive(Debug)]
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: epoll_create1 retornó un fd nuevo que nadie más posee
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, flags: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: flags,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut ev) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Agrega `fd` con el interés dado
    pub fn register(&self, fd: RawFd, interest: Interest, oneshot: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest.flags(oneshot))
    }

    /// Vuelve a habilitar un registro ONESHOT
    pub fn rearm(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest.flags(true))
    }

    /// Quita `fd` del conjunto de interés
    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0)
    }

    /// Espera eventos; `None` bloquea indefinidamente
    ///
    /// Una señal que interrumpe la espera se reporta como
    /// `ErrorKind::Interrupted`; el llamador reintenta.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        let max = events.buf.len().min(libc::c_int::MAX as usize) as libc::c_int;

        let n = unsafe {
            libc::epoll_wait(self.fd.as_raw_fd(), events.buf.as_mut_ptr(), max, timeout_ms)
        };
        if n == -1 {
            events.len = 0;
            return Err(io::Error::last_os_error());
        }

        events.len = n as usize;
        Ok(events.len)
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
