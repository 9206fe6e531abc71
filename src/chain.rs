//! Stages and the chain that runs them.
//!
//! # Layout
//!
//! A [`ChainTemplate`] is an arena: one shared, immutable slice of stages
//! where node `i` continues to node `i + 1` and the node one past the end is
//! a terminal no-op. It is built once per stage list and shared by every
//! request.
//!
//! Per request, a [`RequestChain`] pairs the template with that request's
//! own parameter slot. Nothing about the template is copied; the only
//! per-request state is the slot and a [`Next`] cursor:
//!
//! ```text
//! ChainTemplate  [ log | auth | recover | app ] ∅      ← shared, read-only
//!                   ↑
//! RequestChain { template, params }                    ← one per request
//!        ↓ dispatch
//! log.serve(rw, req, params, Next { index: 1 })
//!        ↓ next.run(rw, req)
//! auth.serve(rw, req, params, Next { index: 2 })
//!        ↓ …
//! ∅  ← running past the end does nothing
//! ```
//!
//! Because `Next` is consumed by [`Next::run`], a stage can continue the
//! chain at most once. Not calling it short-circuits every later stage.

use std::fmt;
use std::sync::Arc;

use crate::fault::Outcome;
use crate::params::Params;
use crate::request::Request;
use crate::response::ResponseWrapper;

/// One unit of request processing.
///
/// A stage may work on the request before calling `next.run(rw, req)`,
/// inspect the response after it returns, or skip it to answer the request
/// itself.
///
/// # Example
///
/// ```rust
/// use relay::{Next, Outcome, Params, Request, ResponseWrapper, Stage};
///
/// struct PoweredBy;
///
/// impl Stage for PoweredBy {
///     fn serve(
///         &self,
///         rw: &mut ResponseWrapper<'_>,
///         req: &mut Request,
///         _params: &Params,
///         next: Next<'_>,
///     ) -> Outcome {
///         rw.headers_mut().insert("x-powered-by", "relay".parse().unwrap());
///         next.run(rw, req)
///     }
/// }
/// ```
pub trait Stage: Send + Sync + 'static {
    fn serve(
        &self,
        rw: &mut ResponseWrapper<'_>,
        req: &mut Request,
        params: &Params,
        next: Next<'_>,
    ) -> Outcome;
}

/// A type-erased stage shared across concurrent requests.
pub type BoxedStage = Arc<dyn Stage>;

// ── Template ──────────────────────────────────────────────────────────────────

/// The immutable, shared chain built from an ordered stage list.
#[derive(Clone)]
pub struct ChainTemplate {
    nodes: Arc<[BoxedStage]>,
}

impl ChainTemplate {
    /// Builds a template from `stages`, in order. An empty list produces a
    /// chain that only contains the terminal no-op.
    pub fn build(stages: &[BoxedStage]) -> Self {
        Self { nodes: stages.iter().cloned().collect() }
    }

    /// Builds a template from optional slots, such as a stage list assembled
    /// from configuration.
    ///
    /// # Panics
    ///
    /// Panics if any slot is empty. A hole in the stage list is a
    /// configuration bug, not a runtime condition.
    pub fn from_slots(slots: Vec<Option<BoxedStage>>) -> Self {
        let nodes = slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.unwrap_or_else(|| {
                    panic!("a valid stage must be provided, found none at position {position}")
                })
            })
            .collect();
        Self { nodes }
    }

    /// Number of stages, not counting the terminal node.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Runs one request through the chain with its own copy of `params`.
    pub fn dispatch(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, params: Params) -> Outcome {
        RequestChain::new(self, params).run(rw, req)
    }
}

impl fmt::Debug for ChainTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainTemplate").field("stages", &self.nodes.len()).finish()
    }
}

// ── Per-request chain ─────────────────────────────────────────────────────────

/// One request's view of a [`ChainTemplate`].
///
/// Owns the request's parameter slot; the template itself is borrowed.
/// Dropped when the request is done.
pub struct RequestChain<'t> {
    template: &'t ChainTemplate,
    params: Params,
}

impl<'t> RequestChain<'t> {
    pub fn new(template: &'t ChainTemplate, params: Params) -> Self {
        Self { template, params }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Replaces this request's parameters. Other chains built from the same
    /// template are unaffected.
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// Invokes the head stage.
    pub fn run(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request) -> Outcome {
        Next { nodes: &self.template.nodes, params: &self.params, index: 0 }.run(rw, req)
    }
}

// ── Continuation ──────────────────────────────────────────────────────────────

/// The rest of the chain after the current stage.
pub struct Next<'c> {
    nodes: &'c [BoxedStage],
    params: &'c Params,
    index: usize,
}

impl Next<'_> {
    /// Runs the remaining stages. Past the end of the chain this does nothing.
    pub fn run(self, rw: &mut ResponseWrapper<'_>, req: &mut Request) -> Outcome {
        let Some(stage) = self.nodes.get(self.index) else {
            return Ok(());
        };
        let next = Next { nodes: self.nodes, params: self.params, index: self.index + 1 };
        stage.serve(rw, req, self.params, next)
    }

    /// Stages left after this point, excluding the terminal node.
    pub fn remaining(&self) -> usize {
        self.nodes.len().saturating_sub(self.index)
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.remaining())
            .finish()
    }
}
