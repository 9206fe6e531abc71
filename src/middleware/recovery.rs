//! Fault isolation.
//!
//! [`PanicRecovery`] runs the rest of the chain inside `catch_unwind`. If
//! anything downstream panics or returns a [`Fault`], the request is
//! answered with `500 Internal Server Error`, the fault is logged together
//! with a stack snapshot, and control returns normally to the stages in
//! front of it.
//!
//! # Stack snapshots
//!
//! By the time `catch_unwind` returns, the panicking frames are gone. To
//! keep the panic-site stack, the first `PanicRecovery` built installs a
//! process panic hook that chains to whatever hook was set before. While a
//! recovery scope is active on the current thread the hook records the
//! backtrace for the stage to pick up and stays quiet; everywhere else it
//! defers to the previous hook. A panic that a downstream stage catches
//! itself inside a scope is silenced as well, since the hook cannot tell
//! in advance who will catch it.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use http::header::{CONTENT_TYPE, HeaderValue};
use http::StatusCode;
use tracing::Level;

use crate::chain::{Next, Stage};
use crate::fault::{Fault, Outcome, Report};
use crate::logger::{Logger, default_logger};
use crate::params::Params;
use crate::request::Request;
use crate::response::ResponseWrapper;

/// Default upper bound for a stack snapshot, in bytes.
pub const DEFAULT_MAX_STACK_BYTES: usize = 12 * 1024;

/// Called with every recovered fault.
pub type FaultCallback = Arc<dyn Fn(&Fault) + Send + Sync>;

/// Catches faults raised by later stages and answers with a 500.
///
/// ```rust
/// use relay::Pipeline;
/// use relay::middleware::PanicRecovery;
///
/// let pipeline = Pipeline::new()
///     .push(
///         PanicRecovery::new(false)
///             .max_stack_bytes(4 * 1024)
///             .on_fault(|fault| eprintln!("alerting on-call: {fault}")),
///     )
///     .push_handler_fn(|_rw, _req| panic!("boom"));
/// ```
pub struct PanicRecovery {
    logger: Arc<dyn Logger>,
    surface_details: bool,
    capture_all_workers: bool,
    max_stack_bytes: usize,
    on_fault: Option<FaultCallback>,
}

impl PanicRecovery {
    /// When `surface_details` is set the fault text and stack snapshot are
    /// also written to the response body. Leave it off in production.
    pub fn new(surface_details: bool) -> Self {
        install_panic_hook();
        Self {
            logger: default_logger(),
            surface_details,
            capture_all_workers: false,
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
            on_fault: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Labels each snapshot with the faulting worker thread's name and id.
    ///
    /// Stacks of other workers are **not** captured: the standard library
    /// can only walk the calling thread's stack, so the snapshot covers the
    /// faulting worker alone. The label keeps snapshots from different
    /// workers apart once logs are aggregated.
    pub fn capture_all_workers(mut self, enabled: bool) -> Self {
        self.capture_all_workers = enabled;
        self
    }

    pub fn max_stack_bytes(mut self, max: usize) -> Self {
        self.max_stack_bytes = max;
        self
    }

    /// Registers a callback run after each recovered fault. A panic inside
    /// the callback is logged and swallowed.
    pub fn on_fault<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Fault) + Send + Sync + 'static,
    {
        self.on_fault = Some(Arc::new(callback));
        self
    }

    fn recover(&self, rw: &mut ResponseWrapper<'_>, fault: &Fault) {
        if rw.headers().get(CONTENT_TYPE).is_none_or(|v| v.is_empty()) {
            rw.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        }
        // Committing the status runs pre-write hooks registered downstream.
        // They are drained before they run, so a second commit after a hook
        // panic only forwards the status.
        if !self.guarded("pre-write hook", || rw.write_status(StatusCode::INTERNAL_SERVER_ERROR)) {
            rw.write_status(StatusCode::INTERNAL_SERVER_ERROR);
        }

        let stack = match fault.stack() {
            Some(stack) => self.snapshot(stack),
            None => self.snapshot(&Backtrace::force_capture().to_string()),
        };
        let report = Report { fault, stack: &stack }.to_string();
        self.logger.log(Level::ERROR, &report);

        if self.surface_details {
            if let Err(e) = rw.write_all(report.as_bytes()) {
                self.logger.log(Level::WARN, &format!("failed to write fault details: {e}"));
            }
        }

        if let Some(callback) = &self.on_fault {
            self.guarded("fault callback", || callback(fault));
        }
    }

    /// Runs `f`, logging and swallowing a panic. Returns whether `f` finished.
    fn guarded(&self, what: &str, f: impl FnOnce()) -> bool {
        let scope = RecoveryScope::enter();
        let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) else {
            return true;
        };
        let stack = scope
            .take_stack()
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        self.logger.log(
            Level::ERROR,
            &format!("{what} panicked: {}\n{}", Fault::from_panic(payload), self.snapshot(&stack)),
        );
        false
    }

    fn snapshot(&self, stack: &str) -> String {
        let mut out = String::new();
        if self.capture_all_workers {
            let current = std::thread::current();
            out.push_str(&format!(
                "worker '{}' ({:?}):\n",
                current.name().unwrap_or("<unnamed>"),
                current.id(),
            ));
        }
        out.push_str(stack);
        truncate_at_char_boundary(&mut out, self.max_stack_bytes);
        out
    }
}

impl Default for PanicRecovery {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Stage for PanicRecovery {
    fn serve(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, _params: &Params, next: Next<'_>) -> Outcome {
        let outcome = {
            let scope = RecoveryScope::enter();
            match panic::catch_unwind(AssertUnwindSafe(|| next.run(rw, req))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let fault = Fault::from_panic(payload);
                    Err(match scope.take_stack() {
                        Some(stack) => fault.with_stack(stack),
                        None => fault,
                    })
                }
            }
        };
        if let Err(fault) = outcome {
            self.recover(rw, &fault);
        }
        Ok(())
    }
}

impl fmt::Debug for PanicRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicRecovery")
            .field("surface_details", &self.surface_details)
            .field("capture_all_workers", &self.capture_all_workers)
            .field("max_stack_bytes", &self.max_stack_bytes)
            .field("on_fault", &self.on_fault.is_some())
            .finish_non_exhaustive()
    }
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

// ── Panic hook ────────────────────────────────────────────────────────────────

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let stack = match info.location() {
                Some(location) => format!("panicked at {location}\n{}", Backtrace::force_capture()),
                None => Backtrace::force_capture().to_string(),
            };
            PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
        }));
    });
}

/// Marks the current thread as running inside a recovery scope.
struct RecoveryScope;

impl RecoveryScope {
    fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }

    /// The stack recorded by the most recent panic on this thread.
    fn take_stack(&self) -> Option<String> {
        PANIC_STACK.with(|slot| slot.borrow_mut().take())
    }
}

impl Drop for RecoveryScope {
    fn drop(&mut self) {
        let depth = DEPTH.with(|depth| {
            let left = depth.get() - 1;
            depth.set(left);
            left
        });
        if depth == 0 {
            PANIC_STACK.with(|slot| slot.borrow_mut().take());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::logger::MemoryLogger;
    use crate::pipeline::Pipeline;
    use crate::recorder::Recorder;

    fn serve(pipeline: &Pipeline) -> Recorder {
        let mut channel = Recorder::new();
        pipeline.serve(&mut channel, &mut Request::default()).unwrap();
        channel
    }

    #[test]
    fn panic_becomes_500() {
        let logger = MemoryLogger::new();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let pipeline = Pipeline::new()
            .push(
                PanicRecovery::new(true)
                    .with_logger(logger.clone())
                    .on_fault(move |_| flag.store(true, Ordering::SeqCst)),
            )
            .push_handler_fn(|_rw, _req| panic!("boom"));

        let channel = serve(&pipeline);
        assert_eq!(channel.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(channel.header("content-type"), Some("text/plain; charset=utf-8"));
        assert!(channel.body_str().starts_with("PANIC: boom\n"));
        assert!(logger.contains("boom"));
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn existing_content_type_is_kept() {
        let pipeline = Pipeline::new()
            .push(PanicRecovery::new(false).with_logger(MemoryLogger::new()))
            .push_handler_fn(|rw, _req| {
                rw.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
                panic!("boom")
            });

        let channel = serve(&pipeline);
        assert_eq!(channel.header("content-type"), Some("application/json; charset=utf-8"));
        assert!(channel.body().is_empty());
    }

    #[test]
    fn empty_content_type_is_replaced() {
        let pipeline = Pipeline::new()
            .push(PanicRecovery::new(false).with_logger(MemoryLogger::new()))
            .push_handler_fn(|rw, _req| {
                rw.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(""));
                panic!("boom")
            });

        let channel = serve(&pipeline);
        assert_eq!(channel.header("content-type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn panicking_pre_write_hook_is_contained() {
        let logger = MemoryLogger::new();
        let pipeline = Pipeline::new()
            .push(PanicRecovery::new(true).with_logger(logger.clone()))
            .push_handler_fn(|rw, _req| {
                rw.before(|_| panic!("hook exploded"));
                panic!("boom")
            });

        let mut channel = Recorder::new();
        let served = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.serve(&mut channel, &mut Request::default())
        }));
        assert!(matches!(served, Ok(Ok(()))));
        assert_eq!(channel.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(channel.status_writes(), 1);
        assert!(channel.body_str().starts_with("PANIC: boom\n"));
        assert!(logger.contains("pre-write hook panicked: hook exploded"));
    }

    #[test]
    fn returned_faults_are_recovered_too() {
        let logger = MemoryLogger::new();
        let pipeline = Pipeline::new()
            .push(PanicRecovery::new(false).with_logger(logger.clone()))
            .push_handler_fn(|_rw, _req| Err(Fault::new("upstream timed out")));

        let channel = serve(&pipeline);
        assert_eq!(channel.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(logger.contains("PANIC: upstream timed out"));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let logger = MemoryLogger::new();
        let pipeline = Pipeline::new()
            .push(
                PanicRecovery::new(true)
                    .with_logger(logger.clone())
                    .on_fault(|_| panic!("callback exploded")),
            )
            .push_handler_fn(|_rw, _req| panic!("boom"));

        let channel = serve(&pipeline);
        assert_eq!(channel.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(logger.contains("fault callback panicked: callback exploded"));
    }

    #[test]
    fn clean_requests_pass_through() {
        let logger = MemoryLogger::new();
        let pipeline = Pipeline::new()
            .push(PanicRecovery::new(true).with_logger(logger.clone()))
            .push_handler_fn(|rw, _req| {
                rw.write(b"fine")?;
                Ok(())
            });

        let channel = serve(&pipeline);
        assert_eq!(channel.status(), StatusCode::OK);
        assert_eq!(channel.body_str(), "fine");
        assert!(logger.lines().is_empty());
    }

    #[test]
    fn snapshot_is_bounded_and_labelled() {
        let logger = MemoryLogger::new();
        let pipeline = Pipeline::new()
            .push(
                PanicRecovery::new(true)
                    .with_logger(logger.clone())
                    .capture_all_workers(true)
                    .max_stack_bytes(64),
            )
            .push_handler_fn(|_rw, _req| panic!("boom"));

        let channel = serve(&pipeline);
        let body = channel.body_str();
        let (head, stack) = body.split_once('\n').unwrap();
        assert_eq!(head, "PANIC: boom");
        assert!(stack.len() <= 64);
        assert!(stack.starts_with("worker '"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "ééé".to_owned();
        truncate_at_char_boundary(&mut s, 3);
        assert_eq!(s, "é");
        let mut s = "short".to_owned();
        truncate_at_char_boundary(&mut s, 64);
        assert_eq!(s, "short");
    }

    #[test]
    fn nested_recovery_handles_inner_fault_only() {
        let outer = MemoryLogger::new();
        let inner = MemoryLogger::new();
        let pipeline = Pipeline::new()
            .push(PanicRecovery::new(false).with_logger(outer.clone()))
            .push(PanicRecovery::new(false).with_logger(inner.clone()))
            .push_handler_fn(|_rw, _req| panic!("deep"));

        let channel = serve(&pipeline);
        assert_eq!(channel.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(inner.contains("deep"));
        assert!(outer.lines().is_empty());
    }
}
