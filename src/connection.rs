//! Serving a single accepted connection.
//!
//! Every request on the connection reports `Active` when it starts and `Idle`
//! once its response body has been written out (hyper drops the body at that
//! point). The connection reports `Closed` when its task ends.
//!
//! Upgraded connections (`101 Switching Protocols`) are handed to the handler
//! that asked for the upgrade. From then on the server no longer tracks them:
//! they leave the active set once the 101 response is written and are neither
//! waited for nor force-closed by a drain.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use http_body::{Frame, SizeHint};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use crate::tracker::{ConnHandle, ConnState, TrackerHandle};

/// How long a client may take to complete the TLS handshake.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection task needs besides its transport.
pub(crate) struct Connection {
    pub(crate) conn: ConnHandle,
    pub(crate) tracker: TrackerHandle,
    pub(crate) router: Router,
    pub(crate) keep_alive: watch::Receiver<bool>,
}

impl Connection {
    /// Completes the TLS handshake on `io`, then serves it like a plain
    /// connection.
    ///
    /// A handshake carries no request yet, so it is abandoned as soon as
    /// shutdown begins, the same way an idle keep-alive connection is.
    pub(crate) async fn serve_tls<I>(self, acceptor: TlsAcceptor, io: I)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.conn.id();
        let handshake = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(io));

        let stream = tokio::select! {
            res = handshake => match res {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::warn!(conn = id, "TLS handshake error: {}", e);
                    return;
                }
                Err(_) => {
                    tracing::warn!(conn = id, "TLS handshake timed out");
                    return;
                }
            },
            () = keep_alive_disabled(self.keep_alive.clone()) => {
                tracing::debug!(conn = id, "shutting down, dropping TLS handshake");
                return;
            }
        };

        self.serve(stream).await;
    }

    /// Drives HTTP/1 on `io` until the client leaves, keep-alive shutdown
    /// completes, or the tracker kills the connection.
    pub(crate) async fn serve<I>(self, io: I)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Connection {
            conn,
            tracker,
            router,
            keep_alive,
        } = self;

        let service = TrackedService {
            router,
            conn: conn.clone(),
            tracker: tracker.clone(),
        };
        let keep_alive_enabled = *keep_alive.borrow();
        let connection = http1::Builder::new()
            .timer(TokioTimer::new())
            .keep_alive(keep_alive_enabled)
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades();
        let mut connection = std::pin::pin!(connection);
        let mut keep_alive_off = std::pin::pin!(keep_alive_disabled(keep_alive));
        let mut draining = false;

        loop {
            tokio::select! {
                // Also completes once the connection has been upgraded and
                // handed to its handler.
                res = connection.as_mut() => {
                    if let Err(e) = res {
                        tracing::debug!(conn = conn.id(), "connection error: {}", e);
                    }
                    break;
                }
                () = &mut keep_alive_off, if !draining => {
                    // Finish the request in flight, then close instead of
                    // waiting for the next one.
                    connection.as_mut().graceful_shutdown();
                    draining = true;
                }
                () = conn.killed() => {
                    tracing::debug!(conn = conn.id(), "connection force-closed");
                    break;
                }
            }
        }

        tracker.report(&conn, ConnState::Closed);
    }
}

/// Completes once keep-alive has been turned off on the server.
async fn keep_alive_disabled(mut keep_alive: watch::Receiver<bool>) {
    while *keep_alive.borrow_and_update() {
        if keep_alive.changed().await.is_err() {
            // The server is gone; keep-alive can no longer change.
            std::future::pending::<()>().await;
        }
    }
}

/// Hyper service that runs the router and reports request lifecycle.
#[derive(Clone)]
struct TrackedService {
    router: Router,
    conn: ConnHandle,
    tracker: TrackerHandle,
}

impl hyper::service::Service<Request<Incoming>> for TrackedService {
    type Response = Response<TrackedBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let guard = RequestGuard::enter(self.conn.clone(), self.tracker.clone());

        // The handler runs on its own task: killing the connection closes the
        // transport but leaves the handler to finish.
        let handler = tokio::spawn(self.router.clone().oneshot(request));

        Box::pin(async move {
            let response = match handler.await {
                Ok(Ok(response)) => response,
                Ok(Err(never)) => match never {},
                Err(e) => {
                    tracing::error!("request handler failed: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            };
            Ok(response.map(|body| TrackedBody {
                inner: body,
                _guard: guard,
            }))
        })
    }
}

/// Marks a connection `Active` for as long as it lives.
struct RequestGuard {
    conn: ConnHandle,
    tracker: TrackerHandle,
}

impl RequestGuard {
    fn enter(conn: ConnHandle, tracker: TrackerHandle) -> Self {
        tracker.report(&conn, ConnState::Active);
        Self { conn, tracker }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.report(&self.conn, ConnState::Idle);
    }
}

/// Response body that keeps the request counted as active until hyper is
/// done writing it.
struct TrackedBody {
    inner: Body,
    _guard: RequestGuard,
}

impl http_body::Body for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
