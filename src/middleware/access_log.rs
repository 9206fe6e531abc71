//! Per-request access logging.

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use tracing::Level;

use crate::chain::{Next, Stage};
use crate::fault::Outcome;
use crate::logger::{Logger, default_logger};
use crate::params::Params;
use crate::request::Request;
use crate::response::ResponseWrapper;

/// Logs one line when a request arrives and one when it completes, with the
/// final status and the time spent in the rest of the chain.
pub struct AccessLog {
    logger: Arc<dyn Logger>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self { logger: default_logger() }
    }

    pub fn with_logger(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl Default for AccessLog {
    fn default() -> Self { Self::new() }
}

impl Stage for AccessLog {
    fn serve(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, _params: &Params, next: Next<'_>) -> Outcome {
        let started = Instant::now();
        // Later stages may rewrite the request; log what arrived.
        let method = req.method().clone();
        let path = req.path().to_owned();
        self.logger.log(Level::INFO, &format!("began {method} {path}"));

        let outcome = next.run(rw, req);

        let elapsed = started.elapsed();
        match &outcome {
            Ok(()) => {
                let reason = StatusCode::from_u16(rw.status())
                    .ok()
                    .and_then(|status| status.canonical_reason())
                    .unwrap_or("");
                self.logger.log(
                    Level::INFO,
                    &format!("completed with {} {reason} response in {elapsed:?}", rw.status()),
                );
            }
            Err(fault) => {
                self.logger.log(
                    Level::ERROR,
                    &format!("aborted {method} {path} after {elapsed:?}: {fault}"),
                );
            }
        }
        outcome
    }
}
