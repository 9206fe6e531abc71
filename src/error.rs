//! Unified error type.

use std::fmt;

/// An optional operation a response [`Channel`](crate::Channel) may provide.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Capability {
    Flush,
    Hijack,
    CloseNotify,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flush       => "flushing",
            Self::Hijack      => "hijacking",
            Self::CloseNotify => "close notification",
        })
    }
}

/// The error type returned by relay's fallible operations.
///
/// Application-level failures (401, 404, etc.) are written to the response
/// channel, not returned as `Error`s. This type surfaces infrastructure
/// failures: binding a port, a broken connection, or asking a channel for a
/// capability it does not have.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The wrapped channel does not provide the requested capability.
    /// Callers are expected to treat this as a benign outcome.
    #[error("the response channel doesn't support {0}")]
    Unsupported(Capability),
}
