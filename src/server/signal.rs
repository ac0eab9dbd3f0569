//! # Puente de Señales
//! src/server/signal.rs
//!
//! Las señales llegan al reactor como bytes en un par de sockets Unix no
//! bloqueantes (self-pipe). El extremo lector se registra en epoll como una
//! fuente más; el handler de la señal solo escribe un byte.
//!
//! ```text
//! SIGTERM/SIGINT ──handler──┐
//! ticker (cada timeslot) ───┼──▶ writer ══ pipe ══ reader ──▶ epoll ──▶ reactor
//! ShutdownHandle ───────────┘
//! ```
//!
//! La alarma periódica sale de un thread (`Ticker`) y no de `SIGALRM`, así
//! varios servidores pueden convivir en un mismo proceso. SIGTERM y SIGINT
//! se registran con `signal-hook`, que escribe su propio byte en un clon del
//! extremo escritor; cualquier byte que no sea `Alarm` se lee como término.

use crate::error::Result;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::low_level::{pipe, unregister};
use signal_hook::SigId;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Código transportado por el pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignalCode {
    /// Toca barrer los timers
    Alarm = 1,

    /// Detener el servidor
    Terminate = 2,
}

impl SignalCode {
    /// Sólo el ticker escribe `Alarm`; el resto de los bytes piden término
    pub fn from_byte(byte: u8) -> Self {
        if byte == SignalCode::Alarm as u8 {
            SignalCode::Alarm
        } else {
            SignalCode::Terminate
        }
    }
}

/// Extremo escritor compartible
#[derive(Debug, Clone)]
pub struct SignalSender {
    writer: Arc<UnixStream>,
}

impl SignalSender {
    /// Escribe un código; con el pipe lleno el código se descarta
    /// (ya hay otros pendientes que despertarán al reactor)
    pub fn send(&self, code: SignalCode) -> io::Result<()> {
        match (&*self.writer).write(&[code as u8]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Par de sockets del self-pipe
#[derive(Debug)]
pub struct SignalPipe {
    reader: UnixStream,
    sender: SignalSender,
}

impl SignalPipe {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        Ok(Self {
            reader,
            sender: SignalSender {
                writer: Arc::new(writer),
            },
        })
    }

    /// fd del extremo lector (para registrarlo en epoll)
    pub fn reader_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub fn sender(&self) -> SignalSender {
        self.sender.clone()
    }

    /// Lee todos los códigos pendientes
    pub fn drain(&self) -> io::Result<Vec<SignalCode>> {
        let mut codes = Vec::new();
        let mut buf = [0u8; 1024];

        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => codes.extend(buf[..n].iter().map(|b| SignalCode::from_byte(*b))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(codes)
    }
}

/// Registro de SIGTERM/SIGINT; al soltarse deja de escribir en el pipe
#[derive(Debug)]
pub struct SignalGuard {
    ids: Vec<SigId>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            unregister(id);
        }
    }
}

/// Conecta SIGTERM y SIGINT al pipe e ignora SIGPIPE
pub fn install_handlers(signals: &SignalPipe) -> Result<SignalGuard> {
    let mut guard = SignalGuard { ids: Vec::with_capacity(2) };
    for signal in [SIGTERM, SIGINT] {
        // signal-hook se queda con el fd clonado
        let writer = signals.sender.writer.try_clone()?;
        guard.ids.push(pipe::register(signal, writer)?);
    }

    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_IGN no ejecuta código en contexto de señal
    unsafe {
        sigaction(Signal::SIGPIPE, &ignore)?;
    }

    debug!("signal handlers installed");
    Ok(guard)
}

/// Handle para detener el servidor desde otro thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: SignalSender,
}

impl ShutdownHandle {
    pub fn new(sender: SignalSender) -> Self {
        Self { sender }
    }

    /// Pide al reactor que termine su loop
    pub fn shutdown(&self) -> io::Result<()> {
        self.sender.send(SignalCode::Terminate)
    }
}

/// Thread que envía `Alarm` cada `period`
pub struct Ticker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn(sender: SignalSender, period: Duration) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("timer-tick".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = sender.send(SignalCode::Alarm) {
                            warn!(error = %e, "failed to deliver timer tick");
                            return;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        // Soltar el Sender desconecta el canal y despierta al thread
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
