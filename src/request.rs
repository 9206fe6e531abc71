//! Incoming HTTP request type.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};

/// An incoming HTTP request with its body fully collected.
///
/// Stages receive it as `&mut Request`, so a stage may rewrite headers or
/// stash typed values in [`extensions_mut`](Request::extensions_mut) for
/// the stages after it.
#[derive(Debug, Default)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    extensions: Extensions,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self { method, uri, ..Self::default() }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    /// Header lookup. Returns `None` for values that are not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Credentials from an `Authorization: Basic ...` header.
    ///
    /// The scheme name is matched case-insensitively. Anything malformed
    /// (bad base64, non-UTF-8, missing colon) yields `None`.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let value = self.header("authorization")?;
        let (scheme, encoded) = value.split_at_checked(6)?;
        if !scheme.eq_ignore_ascii_case("basic ") {
            return None;
        }
        let decoded = STANDARD.decode(encoded).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_owned(), password.to_owned()))
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            extensions: parts.extensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_auth(value: &str) -> Request {
        let mut req = Request::default();
        req.headers_mut().insert("authorization", value.parse().unwrap());
        req
    }

    #[test]
    fn parses_basic_credentials() {
        let encoded = STANDARD.encode("alice:s3cr:et");
        let req = with_auth(&format!("Basic {encoded}"));
        assert_eq!(
            req.basic_auth(),
            Some(("alice".to_owned(), "s3cr:et".to_owned()))
        );

        let req = with_auth(&format!("bAsIc {encoded}"));
        assert!(req.basic_auth().is_some());
    }

    #[test]
    fn rejects_malformed_credentials() {
        assert_eq!(Request::default().basic_auth(), None);
        assert_eq!(with_auth("Bearer abc").basic_auth(), None);
        assert_eq!(with_auth("Basic !!!").basic_auth(), None);
        let no_colon = STANDARD.encode("alice");
        assert_eq!(with_auth(&format!("Basic {no_colon}")).basic_auth(), None);
    }

    #[test]
    fn converts_from_http_request() {
        let req = http::Request::builder()
            .method(Method::POST)
            .uri("/users/7?x=1")
            .header("x-trace", "abc")
            .body(Bytes::from_static(b"payload"))
            .unwrap();
        let req = Request::from(req);
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.path(), "/users/7");
        assert_eq!(req.header("X-Trace"), Some("abc"));
        assert_eq!(req.body(), b"payload");
    }
}
