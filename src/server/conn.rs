//! # Conexión HTTP
//! src/server/conn.rs
//!
//! Estado de una conexión: buffers fijos de lectura y escritura, parser,
//! archivo mapeado y contadores de envío. Un `HttpConn` se asigna una vez
//! por slot de la tabla de conexiones y se reinicia con `init` para cada
//! conexión aceptada y con `reset` después de cada intercambio keep-alive.
//!
//! ```text
//!  readable ─▶ read_once (reactor) ─▶ process (worker) ─┬─ Incomplete ─▶ rearm(Read)
//!                                                        ├─ respuesta ──▶ rearm(Write)
//!                                                        └─ fallo ──────▶ close
//!  writable ─▶ write_once (worker) ─┬─ WouldBlock ─────▶ rearm(Write)
//!                                   ├─ keep-alive ─────▶ reset + rearm(Read)
//!                                   └─ close / error ──▶ close
//! ```
//!
//! La respuesta sale en dos segmentos con `writev`: headers (y body de
//! error) desde el buffer de escritura, y el archivo mapeado.

use crate::http::{
    HttpCode, ParseStatus, RequestParser, Response, StaticFile, StaticFiles, StatusCode,
    TargetRewriter,
};
use std::io::{self, IoSlice, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, warn};

/// Qué hacer después de `process`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Faltan bytes: re-armar para lectura
    NeedRead,

    /// Respuesta lista: re-armar para escritura
    NeedWrite,

    /// No se pudo armar ni una respuesta de error: cerrar
    Close,
}

/// Qué hacer después de `write_once`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// El socket no acepta más bytes por ahora: re-armar para escritura
    Pending,

    /// Respuesta enviada y conexión reiniciada: re-armar para lectura
    KeepAlive,

    /// Respuesta enviada con `Connection: close`
    Done,

    /// Error de escritura
    Failed,
}

/// Conexión HTTP con buffers fijos
pub struct HttpConn {
    stream: Option<TcpStream>,
    addr: Option<SocketAddr>,
    parser: RequestParser,

    write_buf: Box<[u8]>,
    /// Bytes válidos en `write_buf` (segmento 0)
    write_len: usize,
    /// Archivo de un 200 (segmento 1)
    file: Option<StaticFile>,

    bytes_sent: usize,
    bytes_to_send: usize,
    linger: bool,
    status: Option<StatusCode>,
}

impl HttpConn {
    pub fn new(read_buffer_size: usize, write_buffer_size: usize, default_doc: &str) -> Self {
        Self {
            stream: None,
            addr: None,
            parser: RequestParser::new(read_buffer_size, default_doc),
            write_buf: vec![0u8; write_buffer_size.max(1)].into_boxed_slice(),
            write_len: 0,
            file: None,
            bytes_sent: 0,
            bytes_to_send: 0,
            linger: false,
            status: None,
        }
    }

    /// Asocia un socket recién aceptado
    pub fn init(&mut self, stream: TcpStream, addr: SocketAddr) {
        self.stream = Some(stream);
        self.addr = Some(addr);
        self.reset();
    }

    /// Deja la conexión lista para el siguiente request
    pub fn reset(&mut self) {
        self.parser.reset();
        self.write_len = 0;
        self.file = None;
        self.bytes_sent = 0;
        self.bytes_to_send = 0;
        self.linger = false;
        self.status = None;
    }

    /// Suelta el socket (cierra el fd) y el mapeo
    pub fn close(&mut self) -> Option<TcpStream> {
        self.file = None;
        self.addr = None;
        self.stream.take()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Código de la última respuesta armada
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Lee lo disponible en el socket hacia el buffer de lectura
    ///
    /// Error si el peer cerró, si el buffer ya estaba lleno o si falló la
    /// lectura; en todos los casos la conexión debe cerrarse.
    pub fn read_once(&mut self) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        self.parser.read_from(stream)
    }

    /// Parsea lo leído y, si el request está completo, arma la respuesta
    pub fn process(&mut self, files: &StaticFiles, rewriter: &dyn TargetRewriter) -> ProcessOutcome {
        let code = self.process_read(files, rewriter);
        if code == HttpCode::Incomplete {
            return ProcessOutcome::NeedRead;
        }

        if self.process_write(code) {
            ProcessOutcome::NeedWrite
        } else {
            ProcessOutcome::Close
        }
    }

    fn process_read(&mut self, files: &StaticFiles, rewriter: &dyn TargetRewriter) -> HttpCode {
        match self.parser.parse() {
            Ok(ParseStatus::Incomplete) => HttpCode::Incomplete,
            Ok(ParseStatus::Complete) => self.do_request(files, rewriter),
            Err(e) => {
                debug!(peer = ?self.addr, error = %e, "malformed request");
                HttpCode::Malformed
            }
        }
    }

    /// Resuelve el target contra el directorio raíz
    fn do_request(&mut self, files: &StaticFiles, rewriter: &dyn TargetRewriter) -> HttpCode {
        let request = self.parser.request();
        let rewritten = rewriter.rewrite(request.method(), request.target(), self.parser.body());
        let target = rewritten.as_deref().unwrap_or(request.target());

        debug!(
            peer = ?self.addr,
            method = request.method().as_str(),
            target,
            query = request.query().unwrap_or_default(),
            "request"
        );

        match files.resolve(target) {
            Ok(file) => {
                self.file = Some(file);
                HttpCode::Ok
            }
            Err(code) => code,
        }
    }

    /// Arma la respuesta para `code` en el buffer de escritura
    fn process_write(&mut self, code: HttpCode) -> bool {
        let status = code.status().unwrap_or(StatusCode::InternalServerError);
        let keep_alive = self.parser.request().keep_alive();

        if status != StatusCode::Ok {
            self.file = None;
        }
        let response = match &self.file {
            Some(file) => Response::file(file.mapped.len(), &file.content_type, keep_alive),
            None => Response::error(status, keep_alive),
        };

        let written = match response.render(&mut self.write_buf) {
            Ok(n) => n,
            Err(e) if status != StatusCode::InternalServerError => {
                warn!(peer = ?self.addr, error = %e, "response does not fit; sending 500");
                self.file = None;
                return self.process_write(HttpCode::InternalError);
            }
            Err(e) => {
                warn!(peer = ?self.addr, error = %e, "error response does not fit");
                return false;
            }
        };

        let body_len = self.file.as_ref().map_or(0, |f| f.mapped.len());
        self.write_len = written;
        self.bytes_sent = 0;
        self.bytes_to_send = written + body_len;
        self.linger = keep_alive;
        self.status = Some(status);
        true
    }

    /// Envía lo pendiente con escrituras scatter/gather
    pub fn write_once(&mut self) -> WriteOutcome {
        if self.stream.is_none() {
            return WriteOutcome::Failed;
        }
        if self.bytes_to_send == 0 {
            self.reset();
            return WriteOutcome::KeepAlive;
        }

        loop {
            let header_start = self.bytes_sent.min(self.write_len);
            let body_start = self.bytes_sent.saturating_sub(self.write_len);
            let body: &[u8] = self.file.as_ref().map_or(&[], |f| &f.mapped[body_start..]);
            let slices = [
                IoSlice::new(&self.write_buf[header_start..self.write_len]),
                IoSlice::new(body),
            ];

            let Some(mut writer) = self.stream.as_ref() else {
                return WriteOutcome::Failed;
            };
            match writer.write_vectored(&slices) {
                Ok(0) => {
                    self.file = None;
                    return WriteOutcome::Failed;
                }
                Ok(n) => {
                    self.bytes_sent += n;
                    if self.bytes_sent >= self.bytes_to_send {
                        self.file = None;
                        if self.linger {
                            self.reset();
                            return WriteOutcome::KeepAlive;
                        }
                        return WriteOutcome::Done;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return WriteOutcome::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(peer = ?self.addr, error = %e, "write failed");
                    self.file = None;
                    return WriteOutcome::Failed;
                }
            }
        }
    }

    /// Bytes de la respuesta aún sin enviar
    pub fn bytes_pending(&self) -> usize {
        self.bytes_to_send - self.bytes_sent.min(self.bytes_to_send)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::NoRewrite;
    use std::fs;
    use std::io::Read;
    use std::net::TcpListener;

    fn connected_pair() -> (HttpConn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, addr) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut conn = HttpConn::new(2048, 1024, "index.html");
        conn.init(server, addr);
        (conn, client)
    }

    fn docroot() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hola</h1>").unwrap();
        dir
    }

    /// Lee del cliente hasta tener `n` bytes
    fn read_exact_from(client: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        client.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_full_exchange_keep_alive() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);
        let (mut conn, mut client) = connected_pair();

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        // Esperar a que los bytes lleguen al socket del servidor
        let mut read = 0;
        while read == 0 {
            read = conn.read_once().unwrap();
        }

        assert_eq!(conn.process(&files, &NoRewrite), ProcessOutcome::NeedWrite);
        assert_eq!(conn.status(), Some(StatusCode::Ok));
        assert_eq!(conn.write_once(), WriteOutcome::KeepAlive);
        assert_eq!(conn.bytes_pending(), 0);

        let expected = "HTTP/1.1 200 OK\r\nContent-Length: 13\r\nContent-Type: text/html\r\nConnection: keep-alive\r\n\r\n<h1>hola</h1>";
        let got = read_exact_from(&mut client, expected.len());
        assert_eq!(String::from_utf8(got).unwrap(), expected);
        assert!(conn.is_open());
    }

    #[test]
    fn test_incomplete_request_needs_more_bytes() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);
        let (mut conn, mut client) = connected_pair();

        client.write_all(b"GET / HTT").unwrap();
        let mut read = 0;
        while read == 0 {
            read = conn.read_once().unwrap();
        }

        assert_eq!(conn.process(&files, &NoRewrite), ProcessOutcome::NeedRead);
    }

    #[test]
    fn test_error_response_then_close() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);
        let (mut conn, mut client) = connected_pair();

        client.write_all(b"GET /missing HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
        let mut read = 0;
        while read == 0 {
            read = conn.read_once().unwrap();
        }

        assert_eq!(conn.process(&files, &NoRewrite), ProcessOutcome::NeedWrite);
        assert_eq!(conn.status(), Some(StatusCode::NotFound));
        assert_eq!(conn.write_once(), WriteOutcome::Done);

        let mut text = String::new();
        drop(conn.close());
        client.read_to_string(&mut text).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("The requested file was not found on this server.\n"));
    }

    #[test]
    fn test_tiny_write_buffer_falls_back() {
        let dir = docroot();
        let files = StaticFiles::new(dir.path(), "index.html", false);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, addr) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        // Ni el 200 ni el 500 caben en 16 bytes
        let mut conn = HttpConn::new(2048, 16, "index.html");
        conn.init(server, addr);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut read = 0;
        while read == 0 {
            read = conn.read_once().unwrap();
        }

        assert_eq!(conn.process(&files, &NoRewrite), ProcessOutcome::Close);
    }

    #[test]
    fn test_read_after_peer_close_fails() {
        let (mut conn, client) = connected_pair();
        drop(client);

        let err = loop {
            match conn.read_once() {
                Ok(_) => std::thread::sleep(std::time::Duration::from_millis(5)),
                Err(e) => break e,
            }
        };
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_closed_conn() {
        let (mut conn, _client) = connected_pair();
        assert!(conn.fd().is_some());

        assert!(conn.close().is_some());
        assert!(!conn.is_open());
        assert_eq!(conn.write_once(), WriteOutcome::Failed);
        assert_eq!(conn.read_once().unwrap_err().kind(), io::ErrorKind::NotConnected);
    }
}
