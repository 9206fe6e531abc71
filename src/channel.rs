//! The outbound response transport.
//!
//! A [`Channel`] is whatever the pipeline writes a response into: the
//! streaming hyper body used by [`Server`](crate::Server), the in-memory
//! [`Recorder`](crate::recorder::Recorder) used in tests, or your own.
//!
//! Only headers, status and body writes are mandatory. Flushing, connection
//! takeover and close notification are optional, and a channel states which
//! of them it provides through one [`Capabilities`] value. Wrappers read that
//! value once, so a capability probe never answers `true` for something the
//! underlying transport cannot actually do.

use std::io;

use http::{HeaderMap, StatusCode};
use tokio::sync::watch;

use crate::error::{Capability, Error};

/// Optional operations a channel supports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    pub flush: bool,
    pub hijack: bool,
    pub close_notify: bool,
}

impl Capabilities {
    pub const NONE: Self = Self { flush: false, hijack: false, close_notify: false };

    pub fn contains(self, capability: Capability) -> bool {
        match capability {
            Capability::Flush       => self.flush,
            Capability::Hijack      => self.hijack,
            Capability::CloseNotify => self.close_notify,
        }
    }
}

/// A raw, bidirectional connection taken over from the HTTP layer.
pub trait Connection: io::Read + io::Write + Send {}

impl<T: io::Read + io::Write + Send> Connection for T {}

/// Outbound response transport.
///
/// The optional methods have inert defaults. Override them together with
/// [`capabilities`](Channel::capabilities); callers never invoke an optional
/// method whose capability is not declared.
pub trait Channel {
    fn headers(&self) -> &HeaderMap;

    /// Headers may be modified until the status is written.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_status(&mut self, status: StatusCode);

    /// Writes body bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn flush(&mut self) {}

    fn hijack(&mut self) -> Result<Box<dyn Connection>, Error> {
        Err(Error::Unsupported(Capability::Hijack))
    }

    fn close_notify(&mut self) -> Option<CloseNotify> {
        None
    }
}

// ── Close notification ───────────────────────────────────────────────────────

/// Transport side of a close notification: signals that the client went away.
#[derive(Debug)]
pub struct CloseSignal(watch::Sender<bool>);

/// Observer side of a close notification. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CloseNotify(watch::Receiver<bool>);

/// Creates a connected signal/observer pair.
pub fn close_channel() -> (CloseSignal, CloseNotify) {
    let (tx, rx) = watch::channel(false);
    (CloseSignal(tx), CloseNotify(rx))
}

impl CloseSignal {
    pub fn close(&self) {
        self.0.send_replace(true);
    }
}

impl CloseNotify {
    /// `true` once the connection has been closed. Dropping the
    /// [`CloseSignal`] without closing leaves this `false`.
    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves when the connection closes; pends forever if the signal is
    /// dropped without closing.
    pub async fn closed(&mut self) {
        if self.0.wait_for(|closed| *closed).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
