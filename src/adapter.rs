//! Adapters that turn other handler shapes into [`Stage`]s.
//!
//! | Shape | Adapter | Continues? |
//! |---|---|---|
//! | `(rw, req, params, next) -> Outcome` | [`stage_fn`] | when it calls `next` |
//! | `(rw, req, next) -> Outcome` | [`use_next_fn`] | when it calls `next` |
//! | [`Handler`] | [`use_handler`] | always, after `handle` returns |
//! | `(rw, req, params) -> Outcome` | [`use_routed_fn`] | always, after it returns |
//! | `(rw, req) -> Outcome` | [`use_handler_fn`] | always, after it returns |
//!
//! The auto-continuing shapes stop the chain if they return a fault.
//!
//! Closures are wrapped in small newtypes rather than given a blanket
//! `Stage` impl: closures only infer the higher-ranked signature a stage
//! needs when they are passed straight to a function with an explicit
//! `Fn(..)` bound.

use crate::chain::{Next, Stage};
use crate::fault::Outcome;
use crate::params::Params;
use crate::request::Request;
use crate::response::ResponseWrapper;

/// A parameter-agnostic request handler, typically the application itself.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request) -> Outcome;
}

/// A continuation-taking closure used as a stage.
pub struct StageFn<F>(F);

/// Wraps a closure with the full stage signature.
pub fn stage_fn<F>(f: F) -> StageFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request, &Params, Next<'_>) -> Outcome + Send + Sync + 'static,
{
    StageFn(f)
}

impl<F> Stage for StageFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request, &Params, Next<'_>) -> Outcome + Send + Sync + 'static,
{
    fn serve(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, params: &Params, next: Next<'_>) -> Outcome {
        (self.0)(rw, req, params, next)
    }
}

/// A closure that takes a continuation but ignores route parameters, the
/// shape middleware written for router-less stacks usually has.
pub struct NextFn<F>(F);

pub fn use_next_fn<F>(f: F) -> NextFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request, Next<'_>) -> Outcome + Send + Sync + 'static,
{
    NextFn(f)
}

impl<F> Stage for NextFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request, Next<'_>) -> Outcome + Send + Sync + 'static,
{
    fn serve(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, _params: &Params, next: Next<'_>) -> Outcome {
        (self.0)(rw, req, next)
    }
}

/// A [`Handler`] that continues the chain after handling.
pub struct UseHandler<H>(H);

pub fn use_handler<H: Handler>(handler: H) -> UseHandler<H> {
    UseHandler(handler)
}

impl<H: Handler> Stage for UseHandler<H> {
    fn serve(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, _params: &Params, next: Next<'_>) -> Outcome {
        self.0.handle(rw, req)?;
        next.run(rw, req)
    }
}

/// A router-style handler that receives parameters and then continues.
pub struct RoutedFn<F>(F);

pub fn use_routed_fn<F>(f: F) -> RoutedFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request, &Params) -> Outcome + Send + Sync + 'static,
{
    RoutedFn(f)
}

impl<F> Stage for RoutedFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request, &Params) -> Outcome + Send + Sync + 'static,
{
    fn serve(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, params: &Params, next: Next<'_>) -> Outcome {
        (self.0)(rw, req, params)?;
        next.run(rw, req)
    }
}

/// A bare handler closure that continues after it returns.
pub struct HandlerFn<F>(F);

pub fn use_handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request) -> Outcome + Send + Sync + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request) -> Outcome + Send + Sync + 'static,
{
    fn handle(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request) -> Outcome {
        (self.0)(rw, req)
    }
}

impl<F> Stage for HandlerFn<F>
where
    F: Fn(&mut ResponseWrapper<'_>, &mut Request) -> Outcome + Send + Sync + 'static,
{
    fn serve(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, _params: &Params, next: Next<'_>) -> Outcome {
        self.handle(rw, req)?;
        next.run(rw, req)
    }
}
