//! HTTP basic authentication gate.

use http::header::{CONTENT_TYPE, HeaderValue, WWW_AUTHENTICATE, X_CONTENT_TYPE_OPTIONS};
use http::StatusCode;

use crate::chain::{Next, Stage};
use crate::fault::Outcome;
use crate::params::Params;
use crate::request::Request;
use crate::response::ResponseWrapper;

/// Lets a request through only if it carries the configured credentials.
/// Anything else gets `401 Unauthorized` with a `Basic` challenge, and the
/// rest of the chain never runs.
#[derive(Clone, Debug)]
pub struct BasicAuth {
    user: String,
    password: String,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: user.into(), password: password.into() }
    }

    fn accepts(&self, req: &Request) -> bool {
        req.basic_auth()
            .is_some_and(|(user, password)| user == self.user && password == self.password)
    }
}

impl Stage for BasicAuth {
    fn serve(&self, rw: &mut ResponseWrapper<'_>, req: &mut Request, _params: &Params, next: Next<'_>) -> Outcome {
        if self.accepts(req) {
            return next.run(rw, req);
        }
        let headers = rw.headers_mut();
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=Restricted"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        rw.write_status(StatusCode::UNAUTHORIZED);
        rw.write(b"Unauthorized\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::pipeline::Pipeline;
    use crate::recorder::Recorder;

    fn pipeline() -> Pipeline {
        Pipeline::new()
            .push(BasicAuth::new("admin", "hunter2"))
            .push_handler_fn(|rw, _req| {
                rw.write(b"secret")?;
                Ok(())
            })
    }

    fn request(credentials: Option<&str>) -> Request {
        let mut req = Request::default();
        if let Some(credentials) = credentials {
            let value = format!("Basic {}", STANDARD.encode(credentials));
            req.headers_mut().insert("authorization", value.parse().unwrap());
        }
        req
    }

    #[test]
    fn valid_credentials_continue() {
        let mut channel = Recorder::new();
        pipeline().serve(&mut channel, &mut request(Some("admin:hunter2"))).unwrap();
        assert_eq!(channel.status(), StatusCode::OK);
        assert_eq!(channel.body_str(), "secret");
    }

    #[test]
    fn missing_or_wrong_credentials_are_challenged() {
        for credentials in [None, Some("admin:wrong"), Some("root:hunter2")] {
            let mut channel = Recorder::new();
            pipeline().serve(&mut channel, &mut request(credentials)).unwrap();
            assert_eq!(channel.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(channel.header("www-authenticate"), Some("Basic realm=Restricted"));
            assert_eq!(channel.body_str(), "Unauthorized\n");
        }
    }
}
