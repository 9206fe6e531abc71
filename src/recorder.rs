//! In-memory response channel for tests.
//!
//! [`Recorder`] keeps everything written to it and can be configured to
//! offer any combination of the optional channel capabilities, so stages can
//! be exercised against transports that do and do not support them.
//!
//! ```rust
//! use relay::{Pipeline, Request};
//! use relay::recorder::Recorder;
//!
//! let pipeline = Pipeline::new().push_handler_fn(|rw, _req| {
//!     rw.write(b"pong")?;
//!     Ok(())
//! });
//!
//! let mut channel = Recorder::new();
//! pipeline.serve(&mut channel, &mut Request::default()).unwrap();
//! assert_eq!(channel.body_str(), "pong");
//! ```

use std::io::{self, Cursor};

use http::{HeaderMap, StatusCode};

use crate::channel::{Capabilities, Channel, CloseNotify, CloseSignal, Connection, close_channel};
use crate::error::{Capability, Error};

/// A [`Channel`] that records status, headers and body in memory.
///
/// Like a real transport it commits the first status it receives; later
/// status writes are counted but otherwise ignored.
#[derive(Debug, Default)]
pub struct Recorder {
    headers: HeaderMap,
    status: Option<StatusCode>,
    status_writes: usize,
    body: Vec<u8>,
    flushes: usize,
    hijacked: bool,
    fail_writes: bool,
    capabilities: Capabilities,
    close: Option<CloseNotify>,
}

impl Recorder {
    /// A recorder with no optional capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flush(mut self) -> Self {
        self.capabilities.flush = true;
        self
    }

    /// Hijacking hands out an in-memory connection.
    pub fn with_hijack(mut self) -> Self {
        self.capabilities.hijack = true;
        self
    }

    /// Returns the recorder together with the signal that closes it.
    pub fn with_close_notify(mut self) -> (Self, CloseSignal) {
        let (signal, notify) = close_channel();
        self.capabilities.close_notify = true;
        self.close = Some(notify);
        (self, signal)
    }

    /// Makes every body write fail with `BrokenPipe`.
    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// The committed status, `200 OK` if none was written.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn written_status(&self) -> Option<StatusCode> {
        self.status
    }

    /// How many times a status write reached the recorder.
    pub fn status_writes(&self) -> usize {
        self.status_writes
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn hijacked(&self) -> bool {
        self.hijacked
    }
}

impl Channel for Recorder {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status_writes += 1;
        self.status.get_or_insert(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn hijack(&mut self) -> Result<Box<dyn Connection>, Error> {
        if !self.capabilities.hijack {
            return Err(Error::Unsupported(Capability::Hijack));
        }
        self.hijacked = true;
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    fn close_notify(&mut self) -> Option<CloseNotify> {
        self.close.clone()
    }
}
