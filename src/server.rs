//! HTTP server and graceful shutdown.
//!
//! # Threading model
//!
//! Stages are plain synchronous code. For every request the server collects
//! the body, then runs the whole chain on a tokio blocking worker. The
//! response flows back through a [`StreamChannel`]: the status and headers
//! are sent to the connection task as soon as a stage commits them, and body
//! bytes follow as frames whenever the buffer fills up or a stage flushes.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()` — no new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::channel::{Capabilities, Channel};
use crate::error::Error;
use crate::pipeline::Dispatch;
use crate::request::Request;

/// Buffered body bytes are sent as a frame once they reach this size.
const FRAME_SIZE: usize = 8 * 1024;

/// Frames allowed in flight between a blocking worker and its connection.
const FRAME_BACKLOG: usize = 16;

/// Request bodies larger than this are refused with `413 Payload Too Large`.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    max_body_bytes: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use relay::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr
            .parse()
            .unwrap_or_else(|e| panic!("invalid socket address `{addr}`: {e}"));
        Self { addr, max_body_bytes: DEFAULT_MAX_BODY_BYTES }
    }

    /// Caps the request body the server buffers before running the chain.
    pub fn max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Starts accepting connections and dispatching them through `app`,
    /// usually a [`Router`](crate::Router) or a bare [`Pipeline`](crate::Pipeline).
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve<A: Dispatch>(self, app: A) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let app = Arc::new(app);

        let max_body_bytes = self.max_body_bytes;

        info!(addr = %self.addr, max_body_bytes, "relay listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting at once,
                // even if more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| dispatch(Arc::clone(&app), req, max_body_bytes));

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("relay stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through `app` and returns as soon as the response head
/// is known; the body keeps streaming from the blocking worker.
///
/// The error type is [`Infallible`]: every failure becomes a status code.
/// A body over `max_body_bytes` is answered with 413 without reaching `app`.
pub(crate) async fn dispatch<A, B>(
    app: Arc<A>,
    req: http::Request<B>,
    max_body_bytes: usize,
) -> Result<http::Response<ChannelBody>, Infallible>
where
    A: Dispatch,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(path = parts.uri.path(), max_body_bytes, "request body too large");
            return Ok(status_only(StatusCode::PAYLOAD_TOO_LARGE));
        }
        Err(e) => {
            warn!(path = parts.uri.path(), "failed to read request body: {e}");
            return Ok(status_only(StatusCode::BAD_REQUEST));
        }
    };
    let mut req = Request::from(http::Request::from_parts(parts, body));

    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(FRAME_BACKLOG);

    let worker = tokio::task::spawn_blocking(move || {
        let mut channel = StreamChannel::new(head_tx, body_tx);
        if let Err(fault) = app.dispatch(&mut channel, &mut req) {
            error!(method = %req.method(), path = req.path(), "unrecovered fault: {fault}");
            channel.fail();
        }
        channel.finish();
    });

    match head_rx.await {
        Ok(head) => Ok(head.into_response(ChannelBody { rx: body_rx })),
        // The worker dropped its channel without a head: it panicked.
        Err(_) => {
            if let Err(e) = worker.await {
                error!("request worker failed: {e}");
            }
            Ok(status_only(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn status_only(status: StatusCode) -> http::Response<ChannelBody> {
    let (_, rx) = mpsc::channel(1);
    let mut res = http::Response::new(ChannelBody { rx });
    *res.status_mut() = status;
    res
}

// ── Streaming channel ─────────────────────────────────────────────────────────

struct Head {
    status: StatusCode,
    headers: HeaderMap,
}

impl Head {
    fn into_response(self, body: ChannelBody) -> http::Response<ChannelBody> {
        let mut res = http::Response::new(body);
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

/// [`Channel`] feeding a hyper response from a blocking worker.
///
/// Supports flushing; hijacking and close notification are not available
/// once hyper owns the connection.
pub(crate) struct StreamChannel {
    headers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    pending: BytesMut,
    body: mpsc::Sender<Bytes>,
}

impl StreamChannel {
    fn new(head: oneshot::Sender<Head>, body: mpsc::Sender<Bytes>) -> Self {
        Self { headers: HeaderMap::new(), head: Some(head), pending: BytesMut::new(), body }
    }

    fn send_head(&mut self, status: StatusCode) {
        let Some(tx) = self.head.take() else {
            debug!(%status, "superfluous status write ignored");
            return;
        };
        let headers = std::mem::take(&mut self.headers);
        if tx.send(Head { status, headers }).is_err() {
            debug!("client went away before the response head was sent");
        }
    }

    fn send_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let frame = self.pending.split().freeze();
        self.body
            .blocking_send(frame)
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }

    /// Answers with a bare 500 if nothing has been committed yet.
    fn fail(&mut self) {
        if self.head.is_some() {
            self.headers.clear();
            self.pending.clear();
            self.send_head(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    /// Commits a `200 OK` if no stage wrote anything, then sends the rest
    /// of the body. Dropping the sender ends the stream.
    fn finish(mut self) {
        if self.head.is_some() {
            self.send_head(StatusCode::OK);
        }
        if let Err(e) = self.send_pending() {
            debug!("response body dropped: {e}");
        }
    }
}

impl Channel for StreamChannel {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.send_head(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.head.is_some() {
            self.send_head(StatusCode::OK);
        }
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= FRAME_SIZE {
            self.send_pending()?;
        }
        Ok(buf.len())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { flush: true, ..Capabilities::NONE }
    }

    fn flush(&mut self) {
        if let Err(e) = self.send_pending() {
            debug!("flush after client went away: {e}");
        }
    }
}

/// Response body streamed from a [`StreamChannel`].
pub struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }
}

impl fmt::Debug for ChannelBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBody").finish_non_exhaustive()
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` never resolves — on non-Unix platforms the SIGTERM arm is
    // effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
