//! # Parsing Incremental de Requests HTTP/1.1
//! src/http/request.rs
//!
//! Parser por estados que trabaja sobre un buffer fijo por conexión. Los
//! bytes llegan en pedazos arbitrarios (lecturas no bloqueantes); el parser
//! retoma desde `check_idx` cada vez, así que el resultado no depende de
//! cómo se partió el stream.
//!
//! ```text
//!  buf: [ GET / HTTP/1.1\0\0Host: h\0\0\0\0 body... |      libre       ]
//!         ^start_line        ^check_idx            ^read_idx         ^capacity
//! ```
//!
//! ## Estados
//!
//! 1. **RequestLine**: `METHOD SP target SP HTTP/1.1`
//! 2. **Headers**: `Name: value` hasta la línea vacía
//! 3. **Body**: exactamente `Content-Length` bytes (solo si es > 0)
//!
//! Invariante: `0 <= check_idx <= read_idx <= capacity`, y el estado solo
//! avanza hasta `reset()`.

use std::io::{self, Read};
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// Métodos HTTP soportados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// GET - Obtener un recurso
    #[default]
    GET,

    /// POST - Enviar datos (login/registro)
    POST,
}

impl Method {
    /// Parsea un método HTTP (sin distinguir mayúsculas)
    fn parse(s: &str) -> Result<Self, ParseError> {
        if s.eq_ignore_ascii_case("GET") {
            Ok(Method::GET)
        } else if s.eq_ignore_ascii_case("POST") {
            Ok(Method::POST)
        } else {
            Err(ParseError::UnsupportedMethod(s.to_string()))
        }
    }

    /// Convierte el método a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
        }
    }
}

/// Estado principal del parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Headers,
    Body,
}

/// Resultado de extraer una línea
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// Línea completa terminada en CRLF
    Complete,

    /// `\r` o `\n` sueltos
    Malformed,

    /// Falta el terminador
    Incomplete,
}

/// Resultado de un paso de parsing exitoso
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Faltan bytes: re-armar para lectura
    Incomplete,

    /// Request completo
    Complete,
}

/// Errores de parsing (todos terminan en 400)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed line terminator")]
    MalformedLine,

    #[error("invalid request line format")]
    InvalidRequestLine,

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid HTTP version: {0}")]
    InvalidHttpVersion(String),

    #[error("invalid request target: {0}")]
    InvalidTarget(String),

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("request does not fit in {capacity} bytes")]
    TooLarge { capacity: usize },
}

/// Campos de un request parseado
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    method: Method,

    /// Target normalizado, sin esquema ni query
    target: String,

    query: Option<String>,

    version: String,

    host: Option<String>,

    keep_alive: bool,

    content_length: usize,
}

impl Request {
    /// Método HTTP del request
    pub fn method(&self) -> Method {
        self.method
    }

    /// Path del recurso (empieza con `/`)
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Query string sin el `?`, si había
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Versión HTTP tal como llegó
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Header `Host`
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// `Connection: keep-alive`
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// `Content-Length` declarado
    pub fn content_length(&self) -> usize {
        self.content_length
    }
}

/// Parser incremental sobre un buffer de lectura fijo
pub struct RequestParser {
    buf: Box<[u8]>,
    read_idx: usize,
    check_idx: usize,
    start_line: usize,
    state: CheckState,
    request: Request,
    body: Range<usize>,
    default_doc: String,
}

impl RequestParser {
    /// Crea un parser con un buffer de `capacity` bytes
    ///
    /// `default_doc` reemplaza un target igual a `/`.
    pub fn new(capacity: usize, default_doc: &str) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            read_idx: 0,
            check_idx: 0,
            start_line: 0,
            state: CheckState::RequestLine,
            request: Request::default(),
            body: 0..0,
            default_doc: default_doc.trim_start_matches('/').to_string(),
        }
    }

    /// Vuelve al estado inicial para un nuevo request
    ///
    /// Los bytes que sobren del request anterior se descartan.
    pub fn reset(&mut self) {
        self.read_idx = 0;
        self.check_idx = 0;
        self.start_line = 0;
        self.state = CheckState::RequestLine;
        self.request = Request::default();
        self.body = 0..0;
    }

    /// Lee del socket no bloqueante hasta `WouldBlock` o hasta llenar el buffer
    ///
    /// Una lectura de cero bytes (el peer cerró) o un buffer ya lleno se
    /// reportan como error: la conexión debe cerrarse.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.read_idx >= self.buf.len() {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "read buffer full"));
        }

        let mut total = 0;
        while self.read_idx < self.buf.len() {
            match reader.read(&mut self.buf[self.read_idx..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the connection",
                    ))
                }
                Ok(n) => {
                    self.read_idx += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }

    /// Copia bytes al buffer sin socket; retorna cuántos cupieron
    pub fn push_bytes(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.buf.len() - self.read_idx);
        self.buf[self.read_idx..self.read_idx + n].copy_from_slice(&data[..n]);
        self.read_idx += n;
        n
    }

    /// Fin del cuerpo declarado, si cabe en el buffer
    fn body_end(&self) -> Option<usize> {
        self.check_idx
            .checked_add(self.request.content_length)
            .filter(|&end| end <= self.buf.len())
    }

    /// Avanza el parser con los bytes disponibles
    pub fn parse(&mut self) -> Result<ParseStatus, ParseError> {
        loop {
            if self.state == CheckState::Body {
                let Some(end) = self.body_end() else {
                    return Err(ParseError::TooLarge {
                        capacity: self.buf.len(),
                    });
                };
                if self.read_idx >= end {
                    self.body = self.check_idx..end;
                    return Ok(ParseStatus::Complete);
                }
                return Ok(ParseStatus::Incomplete);
            }

            match self.parse_line() {
                LineStatus::Incomplete => {
                    if self.read_idx >= self.buf.len() {
                        return Err(ParseError::TooLarge {
                            capacity: self.buf.len(),
                        });
                    }
                    return Ok(ParseStatus::Incomplete);
                }
                LineStatus::Malformed => return Err(ParseError::MalformedLine),
                LineStatus::Complete => {}
            }

            // La línea quedó en [start_line, check_idx - 2)
            let line = self.start_line..self.check_idx - 2;
            self.start_line = self.check_idx;

            match self.state {
                CheckState::RequestLine => {
                    Self::parse_request_line(&self.buf[line], &mut self.request, &self.default_doc)?;
                    self.state = CheckState::Headers;
                }
                CheckState::Headers if line.is_empty() => {
                    if self.request.content_length == 0 {
                        return Ok(ParseStatus::Complete);
                    }
                    if self.body_end().is_none() {
                        return Err(ParseError::TooLarge {
                            capacity: self.buf.len(),
                        });
                    }
                    self.state = CheckState::Body;
                }
                CheckState::Headers => {
                    Self::parse_header(&self.buf[line], &mut self.request)?;
                }
                CheckState::Body => unreachable!("body state handled before line extraction"),
            }
        }
    }

    /// Extrae una línea terminada en CRLF a partir de `check_idx`
    ///
    /// El CRLF se sobrescribe con ceros y `check_idx` queda después de él.
    fn parse_line(&mut self) -> LineStatus {
        while self.check_idx < self.read_idx {
            match self.buf[self.check_idx] {
                b'\r' => {
                    if self.check_idx + 1 == self.read_idx {
                        return LineStatus::Incomplete;
                    }
                    if self.buf[self.check_idx + 1] == b'\n' {
                        self.buf[self.check_idx] = 0;
                        self.buf[self.check_idx + 1] = 0;
                        self.check_idx += 2;
                        return LineStatus::Complete;
                    }
                    return LineStatus::Malformed;
                }
                b'\n' => return LineStatus::Malformed,
                _ => self.check_idx += 1,
            }
        }
        LineStatus::Incomplete
    }

    /// `METHOD SP target SP HTTP/1.1`
    fn parse_request_line(line: &[u8], request: &mut Request, default_doc: &str) -> Result<(), ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidRequestLine)?;

        let parts: Vec<&str> = line.split(|c: char| c == ' ' || c == '\t').filter(|p| !p.is_empty()).collect();
        let &[method, target, version] = parts.as_slice() else {
            return Err(ParseError::InvalidRequestLine);
        };

        request.method = Method::parse(method)?;

        if !version.eq_ignore_ascii_case("HTTP/1.1") {
            return Err(ParseError::InvalidHttpVersion(version.to_string()));
        }
        request.version = version.to_string();

        let path = Self::normalize_target(target)?;
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path, None),
        };

        request.target = if path == "/" {
            format!("/{}", default_doc)
        } else {
            path.to_string()
        };
        request.query = query;

        Ok(())
    }

    /// Reduce un URI absoluto (`http://host/path`) a su path
    fn normalize_target(target: &str) -> Result<&str, ParseError> {
        let mut path = target;
        for scheme in ["http://", "https://"] {
            if path.get(..scheme.len()).is_some_and(|p| p.eq_ignore_ascii_case(scheme)) {
                let rest = &path[scheme.len()..];
                path = rest.find('/').map(|i| &rest[i..]).unwrap_or("");
                break;
            }
        }

        if !path.starts_with('/') {
            return Err(ParseError::InvalidTarget(target.to_string()));
        }
        Ok(path)
    }

    /// `Name: value`; solo se interpretan Host, Connection y Content-Length
    fn parse_header(line: &[u8], request: &mut Request) -> Result<(), ParseError> {
        let Some((name, value)) = std::str::from_utf8(line).ok().and_then(|l| l.split_once(':')) else {
            debug!(header = %String::from_utf8_lossy(line), "ignoring unparseable header");
            return Ok(());
        };
        let name = name.trim();
        let value = value.trim_matches(|c: char| c == ' ' || c == '\t');

        if name.eq_ignore_ascii_case("Host") {
            request.host = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Connection") {
            request.keep_alive = value.eq_ignore_ascii_case("keep-alive");
        } else if name.eq_ignore_ascii_case("Content-Length") {
            request.content_length = value
                .parse()
                .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?;
        } else {
            debug!(header = name, "ignoring unknown header");
        }

        Ok(())
    }

    // === Acceso al estado ===

    /// Campos parseados hasta ahora
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Body crudo del request (vacío si no había)
    pub fn body(&self) -> &[u8] {
        &self.buf[self.body.clone()]
    }

    /// Estado principal actual
    pub fn state(&self) -> CheckState {
        self.state
    }

    /// Bytes recibidos en el buffer
    pub fn read_idx(&self) -> usize {
        self.read_idx
    }

    /// Posición del cursor de parsing
    pub fn check_idx(&self) -> usize {
        self.check_idx
    }

    /// Capacidad del buffer
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}
