//! End-to-end behaviour of the chain, driven through the public API only.

use std::sync::{Arc, Mutex};
use std::thread;

use http::StatusCode;
use proptest::prelude::*;
use relay::logger::MemoryLogger;
use relay::middleware::PanicRecovery;
use relay::recorder::Recorder;
use relay::{
    Capability, Dispatch, Error, Fault, Outcome, Params, Pipeline, Request, ResponseWrapper, Router,
};

#[test]
fn stages_wrap_each_other() {
    let trace = Arc::new(Mutex::new(String::new()));
    let (a, b, c) = (trace.clone(), trace.clone(), trace.clone());
    let pipeline = Pipeline::new()
        .push_fn(move |rw, req, _params, next| {
            a.lock().unwrap().push_str("my ");
            next.run(rw, req)?;
            a.lock().unwrap().push_str("result");
            Ok(())
        })
        .push_fn(move |rw, req, _params, next| {
            b.lock().unwrap().push_str("awesome and ");
            next.run(rw, req)?;
            b.lock().unwrap().push_str("new ");
            Ok(())
        })
        .push_fn(move |rw, _req, _params, _next| {
            c.lock().unwrap().push_str("epic ");
            rw.write_status(StatusCode::BAD_REQUEST);
            Ok(())
        });

    let mut channel = Recorder::new();
    pipeline.serve(&mut channel, &mut Request::default()).unwrap();

    assert_eq!(*trace.lock().unwrap(), "my awesome and epic new result");
    assert_eq!(channel.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn recovery_answers_500_and_logs_the_fault() {
    let logger = MemoryLogger::new();
    let observed = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&observed);
    let pipeline = Pipeline::new()
        // Sits in front of the recovery stage to look at what it produced.
        .push_fn(move |rw, req, _params, next| {
            next.run(rw, req)?;
            *seen.lock().unwrap() = Some((rw.status(), rw.written()));
            Ok(())
        })
        .push(PanicRecovery::new(false).with_logger(logger.clone()))
        .push_handler_fn(|_rw, _req| panic!("boom"));

    let mut channel = Recorder::new();
    pipeline.serve(&mut channel, &mut Request::default()).unwrap();

    assert_eq!(*observed.lock().unwrap(), Some((500, true)));
    assert_eq!(channel.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(channel.header("content-type"), Some("text/plain; charset=utf-8"));
    assert!(logger.contains("boom"));
}

#[test]
fn faulting_callback_does_not_escape() {
    let logger = MemoryLogger::new();
    let pipeline = Pipeline::new()
        .push(
            PanicRecovery::new(false)
                .with_logger(logger.clone())
                .on_fault(|_| panic!("Your callback has caused a bit of a panic")),
        )
        .push_handler_fn(|_rw, _req| panic!("You have caused a panic"));

    let mut channel = Recorder::new();
    assert!(pipeline.serve(&mut channel, &mut Request::default()).is_ok());
    assert!(logger.contains("Your callback has caused a bit of a panic"));
}

#[test]
fn fault_without_recovery_reaches_the_caller() {
    let pipeline = Pipeline::new().push_handler_fn(|_rw, _req| Err(Fault::new("unguarded")));
    let outcome = pipeline.serve(&mut Recorder::new(), &mut Request::default());
    assert_eq!(outcome.unwrap_err().to_string(), "unguarded");
}

#[test]
fn channel_without_capabilities() {
    let mut channel = Recorder::new();
    let mut rw = ResponseWrapper::wrap(&mut channel);

    rw.flush();
    assert!(!rw.written());
    assert!(matches!(rw.hijack(), Err(Error::Unsupported(Capability::Hijack))));
    assert!(!rw.supports(Capability::CloseNotify));
    assert!(rw.close_notify().is_none());
}

#[test]
fn body_length_sums_every_write() {
    let lengths = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&lengths);
    let pipeline = Pipeline::new()
        .push_fn(move |rw, req, _params, next| {
            next.run(rw, req)?;
            seen.lock().unwrap().push(rw.body_length());
            Ok(())
        })
        .push_handler_fn(|rw, _req| {
            rw.write(b"12345")?;
            rw.write(b"")?;
            rw.write(b"678")?;
            Ok(())
        });

    let mut channel = Recorder::new();
    pipeline.serve(&mut channel, &mut Request::default()).unwrap();
    assert_eq!(*lengths.lock().unwrap(), vec![8]);
    assert_eq!(channel.body().len(), 8);
}

/// A router-style stage that checks its parameters against the marker the
/// request carries in a header, then echoes the marker.
fn check(stage: &'static str) -> impl Fn(&mut ResponseWrapper<'_>, &mut Request, &Params) -> Outcome + Send + Sync + 'static {
    move |rw, req, params| {
        let marker = params.get("marker").unwrap_or_default();
        let expected = req.header("x-marker").unwrap_or_default();
        if marker != expected {
            return Err(Fault::new(format!("{stage} saw {marker}, wanted {expected}")));
        }
        rw.write(marker.as_bytes())?;
        Ok(())
    }
}

#[test]
fn concurrent_requests_keep_their_own_params() {
    const WORKERS: usize = 16;
    const ROUNDS: usize = 200;

    let pipeline = Pipeline::new()
        .push_routed_fn(check("first"))
        .push_next_fn(|rw, req, next| {
            // Give other requests a chance to run between the two checks.
            thread::yield_now();
            next.run(rw, req)
        })
        .push_routed_fn(check("second"));
    let router = Arc::new(Router::new().get("/items/{marker}", pipeline));

    thread::scope(|scope| {
        for worker in 0..WORKERS {
            let router = Arc::clone(&router);
            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let marker = format!("w{worker}r{round}");
                    let uri = format!("/items/{marker}").parse().unwrap();
                    let mut req = Request::new(http::Method::GET, uri);
                    req.headers_mut().insert("x-marker", marker.parse().unwrap());

                    let mut channel = Recorder::new();
                    router.dispatch(&mut channel, &mut req).unwrap();
                    assert_eq!(channel.body_str(), format!("{marker}{marker}"));
                }
            });
        }
    });
}

proptest! {
    #[test]
    fn visits_stages_in_order_until_short_circuit(count in 0usize..24, stop_at in proptest::option::of(0usize..24)) {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        for id in 0..count {
            let trace = Arc::clone(&trace);
            pipeline = pipeline.push_fn(move |rw, req, _params, next| {
                trace.lock().unwrap().push(id);
                if stop_at == Some(id) { Ok(()) } else { next.run(rw, req) }
            });
        }

        pipeline.serve(&mut Recorder::new(), &mut Request::default()).unwrap();

        let last = stop_at.map_or(count, |stop| (stop + 1).min(count));
        let expected: Vec<usize> = (0..last).collect();
        prop_assert_eq!(trace.lock().unwrap().clone(), expected);
    }
}
