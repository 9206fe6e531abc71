//! Faults: the outcome of a stage that could not finish.
//!
//! A stage either returns `Ok(())` or a [`Fault`]. Faults travel back up the
//! chain through every stage's `next.run(..)` call until a
//! [`PanicRecovery`](crate::middleware::PanicRecovery) stage handles them or
//! they leave the pipeline entirely. Panics are treated the same way by the
//! recovery stage, but only where the target unwinds; under `panic = "abort"`
//! the guarantee is limited to returned faults.

use std::any::Any;
use std::fmt;

/// Result of running a stage, or the remainder of a chain.
pub type Outcome = Result<(), Fault>;

/// A failure raised while a stage was running.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct Fault {
    message: String,
    stack: Option<String>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), stack: None }
    }

    /// Attaches a stack snapshot taken where the fault was raised.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Builds a fault from any error, keeping only its rendered message chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(message)
    }

    /// Converts a payload caught by `catch_unwind` into a fault.
    ///
    /// `panic!("literal")` carries a `&'static str`, formatted panics carry a
    /// `String`, and `std::panic::panic_any` may carry anything else.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Self::new(*message),
            Err(payload) => payload,
        };
        match payload.downcast::<&'static str>() {
            Ok(message) => Self::new(*message),
            Err(_) => Self::new("non-string panic payload"),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Self::from_error(&err)
    }
}

impl From<crate::Error> for Fault {
    fn from(err: crate::Error) -> Self {
        Self::from_error(&err)
    }
}

/// Displays a fault together with its stack snapshot, the format used by the
/// recovery stage for both logs and response bodies.
pub(crate) struct Report<'a> {
    pub(crate) fault: &'a Fault,
    pub(crate) stack: &'a str,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PANIC: {}\n{}", self.fault, self.stack)
    }
}
