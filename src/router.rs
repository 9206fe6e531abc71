//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. Each route points at a
//! whole [`Pipeline`], and the router is the only place route parameters
//! enter a chain: it extracts them and hands them to
//! [`Pipeline::serve_with_params`].

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{ALLOW, CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::channel::Channel;
use crate::fault::Outcome;
use crate::params::Params;
use crate::pipeline::{Dispatch, Pipeline};
use crate::request::Request;
use crate::response::ResponseWrapper;

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Each registration returns `self` so routes chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Arc<Pipeline>>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a pipeline for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; stages read them from the
    /// [`Params`] they are handed:
    ///
    /// ```rust,no_run
    /// # use relay::{Pipeline, Router};
    /// # use http::Method;
    /// let user = Pipeline::new().push_routed_fn(|rw, _req, params| {
    ///     let id = params.get("id").unwrap_or("unknown");
    ///     rw.write(id.as_bytes())?;
    ///     Ok(())
    /// });
    ///
    /// Router::new().on(Method::GET, "/users/{id}", user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(mut self, method: Method, path: &str, pipeline: Pipeline) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, Arc::new(pipeline))
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, pipeline: Pipeline) -> Self {
        self.on(Method::GET, path, pipeline)
    }

    pub fn post(self, path: &str, pipeline: Pipeline) -> Self {
        self.on(Method::POST, path, pipeline)
    }

    pub fn put(self, path: &str, pipeline: Pipeline) -> Self {
        self.on(Method::PUT, path, pipeline)
    }

    pub fn delete(self, path: &str, pipeline: Pipeline) -> Self {
        self.on(Method::DELETE, path, pipeline)
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Pipeline>, Params)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let pipeline = Arc::clone(matched.value);
        let params = matched.params.iter().collect();
        Some((pipeline, params))
    }

    /// Methods with a route matching `path`, sorted for a stable `Allow`.
    fn allowed(&self, path: &str) -> Vec<&str> {
        let mut allowed: Vec<&str> = self
            .routes
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        allowed.sort_unstable();
        allowed
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Dispatch for Router {
    fn dispatch(&self, channel: &mut dyn Channel, req: &mut Request) -> Outcome {
        if let Some((pipeline, params)) = self.lookup(req.method(), req.path()) {
            return pipeline.serve_with_params(channel, req, params);
        }

        let allowed = self.allowed(req.path());
        let mut rw = ResponseWrapper::wrap(channel);
        let headers = rw.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        if allowed.is_empty() {
            rw.write_status(StatusCode::NOT_FOUND);
            rw.write(b"404 page not found\n")?;
        } else {
            if let Ok(allow) = HeaderValue::from_str(&allowed.join(", ")) {
                rw.headers_mut().insert(ALLOW, allow);
            }
            rw.write_status(StatusCode::METHOD_NOT_ALLOWED);
            rw.write(b"Method Not Allowed\n")?;
        }
        Ok(())
    }
}
