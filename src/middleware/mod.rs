//! Built-in stages.
//!
//! These cover the cross-cutting concerns most services want in front of
//! their handlers:
//!
//! - [`AccessLog`] — one line when a request begins, one when it completes
//! - [`BasicAuth`] — rejects requests without the configured credentials
//! - [`PanicRecovery`] — turns downstream panics and faults into a 500
//!
//! Order matters. Stages run in the order they were pushed, so a recovery
//! stage only protects the stages after it:
//!
//! ```rust,no_run
//! use relay::Pipeline;
//! use relay::middleware::{AccessLog, BasicAuth, PanicRecovery};
//!
//! let pipeline = Pipeline::new()
//!     .push(AccessLog::new())
//!     .push(BasicAuth::new("admin", "secret"))
//!     .push(PanicRecovery::new(false));
//! ```

mod access_log;
mod basic_auth;
mod recovery;

pub use access_log::AccessLog;
pub use basic_auth::BasicAuth;
pub use recovery::{DEFAULT_MAX_STACK_BYTES, FaultCallback, PanicRecovery};
