//! The stage list and its entry points.

use std::fmt;
use std::sync::Arc;

use crate::adapter::{Handler, stage_fn, use_handler, use_handler_fn, use_next_fn, use_routed_fn};
use crate::chain::{BoxedStage, ChainTemplate, Next, Stage};
use crate::channel::Channel;
use crate::fault::Outcome;
use crate::middleware::{AccessLog, BasicAuth, PanicRecovery};
use crate::params::Params;
use crate::request::Request;
use crate::response::ResponseWrapper;

/// An ordered list of stages and the chain built from it.
///
/// Build it once at startup; every `push` returns `self` so stages chain
/// naturally, and rebuilds the chain from scratch. Once the pipeline is
/// handed to a [`Router`](crate::Router) or [`Server`](crate::Server) it is
/// shared read-only, so the stage list cannot change under live traffic.
///
/// ```rust
/// use relay::{Pipeline, Request};
/// use relay::recorder::Recorder;
///
/// let pipeline = Pipeline::new()
///     .push_fn(|rw, req, _params, next| {
///         rw.headers_mut().insert("x-request-path", req.path().parse().unwrap());
///         next.run(rw, req)
///     })
///     .push_handler_fn(|rw, _req| {
///         rw.write(b"hello")?;
///         Ok(())
///     });
///
/// let mut channel = Recorder::new();
/// pipeline.serve(&mut channel, &mut Request::default()).unwrap();
/// assert_eq!(channel.header("x-request-path"), Some("/"));
/// ```
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<BoxedStage>,
    template: ChainTemplate,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::from_stages(Vec::new())
    }

    pub fn from_stages(stages: Vec<BoxedStage>) -> Self {
        let template = ChainTemplate::build(&stages);
        Self { stages, template }
    }

    /// Access logging, basic authentication and panic recovery, in that order.
    pub fn bundled(surface_details: bool, user: &str, password: &str) -> Self {
        Self::new()
            .push(AccessLog::new())
            .push(BasicAuth::new(user, password))
            .push(PanicRecovery::new(surface_details))
    }

    /// Access logging and panic recovery that reports fault details in the
    /// response body. Meant for development.
    pub fn basic() -> Self {
        Self::new()
            .push(AccessLog::new())
            .push(PanicRecovery::new(true))
    }

    pub fn push(self, stage: impl Stage) -> Self {
        self.push_boxed(Arc::new(stage))
    }

    pub fn push_boxed(mut self, stage: BoxedStage) -> Self {
        self.stages.push(stage);
        self.template = ChainTemplate::build(&self.stages);
        self
    }

    /// Appends a closure with the full stage signature.
    pub fn push_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut ResponseWrapper<'_>, &mut Request, &Params, Next<'_>) -> Outcome + Send + Sync + 'static,
    {
        self.push(stage_fn(f))
    }

    /// Appends a closure that takes a continuation but no parameters.
    pub fn push_next_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut ResponseWrapper<'_>, &mut Request, Next<'_>) -> Outcome + Send + Sync + 'static,
    {
        self.push(use_next_fn(f))
    }

    /// Appends a handler; the chain continues after it returns.
    pub fn push_handler(self, handler: impl Handler) -> Self {
        self.push(use_handler(handler))
    }

    /// Appends a handler closure; the chain continues after it returns.
    pub fn push_handler_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut ResponseWrapper<'_>, &mut Request) -> Outcome + Send + Sync + 'static,
    {
        self.push(use_handler_fn(f))
    }

    /// Appends a router-style closure; the chain continues after it returns.
    pub fn push_routed_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut ResponseWrapper<'_>, &mut Request, &Params) -> Outcome + Send + Sync + 'static,
    {
        self.push(use_routed_fn(f))
    }

    pub fn stages(&self) -> &[BoxedStage] {
        &self.stages
    }

    pub fn template(&self) -> &ChainTemplate {
        &self.template
    }

    /// Runs a request that carries no route parameters.
    pub fn serve(&self, channel: &mut dyn Channel, req: &mut Request) -> Outcome {
        let mut rw = ResponseWrapper::wrap(channel);
        self.template.dispatch(&mut rw, req, Params::empty())
    }

    /// Runs a request with parameters extracted by a router. Each call gets
    /// its own parameter slot, so concurrent requests never see each
    /// other's values.
    pub fn serve_with_params(&self, channel: &mut dyn Channel, req: &mut Request, params: Params) -> Outcome {
        let mut rw = ResponseWrapper::wrap(channel);
        self.template.dispatch(&mut rw, req, params)
    }
}

impl Default for Pipeline {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages.len()).finish()
    }
}

/// Anything the [`Server`](crate::Server) can hand a request to.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, channel: &mut dyn Channel, req: &mut Request) -> Outcome;
}

impl Dispatch for Pipeline {
    fn dispatch(&self, channel: &mut dyn Channel, req: &mut Request) -> Outcome {
        self.serve(channel, req)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::StatusCode;

    use super::*;
    use crate::recorder::Recorder;

    #[test]
    fn push_rebuilds_the_template() {
        let pipeline = Pipeline::new();
        assert!(pipeline.template().is_empty());
        let pipeline = pipeline.push_handler_fn(|rw, _req| {
            rw.write_status(StatusCode::OK);
            Ok(())
        });
        assert_eq!(pipeline.stages().len(), 1);
        assert_eq!(pipeline.template().len(), 1);

        let mut channel = Recorder::new();
        pipeline.serve(&mut channel, &mut Request::default()).unwrap();
        assert_eq!(channel.written_status(), Some(StatusCode::OK));
    }

    #[test]
    fn earlier_clone_keeps_its_stages() {
        let base = Pipeline::new().push_handler_fn(|rw, _req| {
            rw.write(b"a")?;
            Ok(())
        });
        let extended = base.clone().push_handler_fn(|rw, _req| {
            rw.write(b"b")?;
            Ok(())
        });

        let mut channel = Recorder::new();
        base.serve(&mut channel, &mut Request::default()).unwrap();
        assert_eq!(channel.body_str(), "a");

        let mut channel = Recorder::new();
        extended.serve(&mut channel, &mut Request::default()).unwrap();
        assert_eq!(channel.body_str(), "ab");
    }

    #[test]
    fn short_circuit_skips_later_stages_only() {
        let trace = std::sync::Arc::new(Mutex::new(String::new()));
        let (t1, t2, t3) = (trace.clone(), trace.clone(), trace.clone());
        let pipeline = Pipeline::new()
            .push_fn(move |rw, req, _params, next| {
                t1.lock().unwrap().push_str("my ");
                next.run(rw, req)?;
                t1.lock().unwrap().push_str("result");
                Ok(())
            })
            .push_fn(move |rw, req, _params, next| {
                t2.lock().unwrap().push_str("awesome and ");
                next.run(rw, req)?;
                t2.lock().unwrap().push_str("new ");
                Ok(())
            })
            .push_fn(move |rw, _req, _params, _next| {
                t3.lock().unwrap().push_str("epic ");
                rw.write_status(StatusCode::BAD_REQUEST);
                Ok(())
            });

        let mut channel = Recorder::new();
        pipeline.serve(&mut channel, &mut Request::default()).unwrap();
        assert_eq!(*trace.lock().unwrap(), "my awesome and epic new result");
        assert_eq!(channel.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn bundled_stack_has_three_stages() {
        assert_eq!(Pipeline::bundled(false, "u", "p").stages().len(), 3);
        assert_eq!(Pipeline::basic().stages().len(), 2);
    }
}
