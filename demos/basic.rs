//! Minimal relay example — a public route, a guarded admin route, and a
//! route that panics to show recovery.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -u admin:secret http://localhost:3000/admin
//!   curl http://localhost:3000/admin            # 401
//!   curl http://localhost:3000/boom             # 500 with details

use relay::middleware::{AccessLog, PanicRecovery};
use relay::{Outcome, Params, Pipeline, Request, ResponseWrapper, Router, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .get("/users/{id}", Pipeline::basic().push_routed_fn(get_user))
        .get("/admin", Pipeline::bundled(false, "admin", "secret").push_handler_fn(admin))
        .get(
            "/boom",
            Pipeline::new()
                .push(AccessLog::new())
                .push(PanicRecovery::new(true).on_fault(|fault| {
                    tracing::warn!("would page someone about: {fault}");
                }))
                .push_handler_fn(|_rw, _req| panic!("something went wrong")),
        );

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// GET /users/{id}
fn get_user(rw: &mut ResponseWrapper<'_>, _req: &mut Request, params: &Params) -> Outcome {
    let id = params.get("id").unwrap_or("unknown");
    rw.headers_mut().insert("content-type", "application/json".parse().unwrap());
    rw.write(format!(r#"{{"id":"{id}","name":"alice"}}"#).as_bytes())?;
    Ok(())
}

// GET /admin — only reached with valid credentials.
fn admin(rw: &mut ResponseWrapper<'_>, _req: &mut Request) -> Outcome {
    rw.write(b"welcome back\n")?;
    Ok(())
}
