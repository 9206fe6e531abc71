//! Response instrumentation.
//!
//! Every stage writes through a [`ResponseWrapper`] rather than the raw
//! [`Channel`]. The wrapper remembers the status code and how many body
//! bytes went out, lets stages register hooks that run right before the
//! response is committed, and forwards the optional channel operations only
//! when the channel declared them at wrap time.
//!
//! ```rust
//! use relay::ResponseWrapper;
//! use relay::recorder::Recorder;
//!
//! let mut channel = Recorder::new();
//! let mut rw = ResponseWrapper::wrap(&mut channel);
//! rw.before(|res| {
//!     res.headers_mut().insert("x-powered-by", "relay".parse().unwrap());
//! });
//! rw.write(b"hello").unwrap();
//! assert_eq!(rw.status(), 200);
//! assert_eq!(rw.body_length(), 5);
//! ```

use std::fmt;
use std::io;

use http::{HeaderMap, StatusCode};
use tracing::debug;

use crate::channel::{Capabilities, Channel, CloseNotify, Connection};
use crate::error::{Capability, Error};

type BeforeHook<'a> = Box<dyn FnOnce(&mut BeforeWrite<'_>) + 'a>;

/// What a pre-write hook sees: the response state at the moment it is
/// committed, plus the headers, which can still change.
pub struct BeforeWrite<'h> {
    status: u16,
    body_length: usize,
    headers: &'h mut HeaderMap,
}

impl BeforeWrite<'_> {
    pub fn status(&self) -> u16 { self.status }
    /// Always `true`; hooks run as the response is committed.
    pub fn written(&self) -> bool { self.status != 0 }
    pub fn body_length(&self) -> usize { self.body_length }
    pub fn headers(&self) -> &HeaderMap { self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { self.headers }
}

/// Instrumented view of a response channel for the duration of one request.
pub struct ResponseWrapper<'a> {
    inner: &'a mut dyn Channel,
    capabilities: Capabilities,
    status: u16,
    length: usize,
    before: Vec<BeforeHook<'a>>,
}

impl<'a> ResponseWrapper<'a> {
    /// Wraps `channel`, recording the capabilities it offers right now.
    /// Later probes answer from this snapshot.
    pub fn wrap(channel: &'a mut dyn Channel) -> Self {
        let capabilities = channel.capabilities();
        Self { inner: channel, capabilities, status: 0, length: 0, before: Vec::new() }
    }

    /// The status written so far, or `0` if nothing has been written.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn written(&self) -> bool {
        self.status != 0
    }

    /// Total body bytes accepted by the channel.
    pub fn body_length(&self) -> usize {
        self.length
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    /// Registers a hook to run just before the status goes out.
    ///
    /// Hooks run once, newest first. A hook registered after the response
    /// was written is dropped without running.
    pub fn before<F>(&mut self, hook: F)
    where
        F: FnOnce(&mut BeforeWrite<'_>) + 'a,
    {
        if self.written() {
            debug!(status = self.status, "pre-write hook registered after response was written");
            return;
        }
        self.before.push(Box::new(hook));
    }

    /// Records `status`, runs pending hooks and forwards the status.
    ///
    /// Writing a second status updates [`status`](Self::status) and is
    /// forwarded; what the channel does with it is up to the channel.
    pub fn write_status(&mut self, status: StatusCode) {
        self.status = status.as_u16();
        self.call_before();
        self.inner.write_status(status);
    }

    /// Writes body bytes, committing a `200 OK` first if no status was set.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.written() {
            self.write_status(StatusCode::OK);
        }
        let n = self.inner.write(buf)?;
        self.length += n;
        Ok(n)
    }

    /// Flushes buffered body bytes if the channel can; otherwise does nothing.
    pub fn flush(&mut self) {
        if !self.capabilities.flush {
            return;
        }
        if !self.written() {
            self.write_status(StatusCode::OK);
        }
        self.inner.flush();
    }

    /// Takes over the underlying connection.
    pub fn hijack(&mut self) -> Result<Box<dyn Connection>, Error> {
        if !self.capabilities.hijack {
            return Err(Error::Unsupported(Capability::Hijack));
        }
        self.inner.hijack()
    }

    /// Close notification for the underlying connection, if the channel
    /// provides one.
    pub fn close_notify(&mut self) -> Option<CloseNotify> {
        if !self.capabilities.close_notify {
            return None;
        }
        self.inner.close_notify()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    fn call_before(&mut self) {
        if self.before.is_empty() {
            return;
        }
        let hooks = std::mem::take(&mut self.before);
        let mut view = BeforeWrite {
            status: self.status,
            body_length: self.length,
            headers: self.inner.headers_mut(),
        };
        for hook in hooks.into_iter().rev() {
            hook(&mut view);
        }
    }
}

impl io::Write for ResponseWrapper<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseWrapper::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        ResponseWrapper::flush(self);
        Ok(())
    }
}

impl fmt::Debug for ResponseWrapper<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWrapper")
            .field("status", &self.status)
            .field("body_length", &self.length)
            .field("capabilities", &self.capabilities)
            .field("pending_hooks", &self.before.len())
            .finish_non_exhaustive()
    }
}
