//! # relay
//!
//! A composable middleware pipeline for HTTP servers.
//!
//! ## The contract
//!
//! A pipeline is an ordered list of [`Stage`]s. Each stage gets the
//! response, the request, the route parameters and a [`Next`] continuation.
//! It can work before calling `next.run(..)`, after it returns, or answer
//! the request itself and never call it.
//!
//! ```text
//! AccessLog ─┐                                       ┌─ "completed with 200 OK"
//!            BasicAuth ─┐                 ┌─────────┘
//!                       PanicRecovery ─┐ ┌┘  500 if anything below faults
//!                                      App
//! ```
//!
//! What relay owns:
//!
//! - The chain — built once per stage list, shared read-only by every request
//! - Per-request isolation — route parameters never leak between requests
//! - [`ResponseWrapper`] — status/length tracking, pre-write hooks, and
//!   honest forwarding of flush / hijack / close notification
//! - Fault containment — [`PanicRecovery`](middleware::PanicRecovery)
//!
//! What it leaves to others: TLS, timeouts and cancellation belong to the
//! transport; route matching belongs to [`matchit`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relay::{Pipeline, Router, Server};
//! use relay::middleware::{AccessLog, PanicRecovery};
//!
//! #[tokio::main]
//! async fn main() {
//!     let user = Pipeline::new()
//!         .push(AccessLog::new())
//!         .push(PanicRecovery::new(false))
//!         .push_routed_fn(|rw, _req, params| {
//!             let id = params.get("id").unwrap_or("unknown");
//!             rw.headers_mut().insert("content-type", "application/json".parse().unwrap());
//!             rw.write(format!(r#"{{"id":"{id}"}}"#).as_bytes())?;
//!             Ok(())
//!         });
//!
//!     let app = Router::new().get("/users/{id}", user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//! ```

mod adapter;
mod chain;
mod channel;
mod error;
mod fault;
mod params;
mod pipeline;
mod request;
mod response;
mod router;
mod server;

pub mod logger;
pub mod middleware;
pub mod recorder;

pub use adapter::{
    Handler, HandlerFn, NextFn, RoutedFn, StageFn, UseHandler, stage_fn, use_handler,
    use_handler_fn, use_next_fn, use_routed_fn,
};
pub use chain::{BoxedStage, ChainTemplate, Next, RequestChain, Stage};
pub use channel::{Capabilities, Channel, CloseNotify, CloseSignal, Connection, close_channel};
pub use error::{Capability, Error};
pub use fault::{Fault, Outcome};
pub use params::Params;
pub use pipeline::{Dispatch, Pipeline};
pub use request::Request;
pub use response::{BeforeWrite, ResponseWrapper};
pub use router::Router;
pub use server::{ChannelBody, DEFAULT_MAX_BODY_BYTES, Server};
