//! Shared test utilities for graceful integration tests.
//!
//! Servers run on ephemeral ports with an injected signal source, so tests
//! can run in parallel without touching real process signals.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use graceful::{serve_with_signal, Server, ShutdownSignal, SignalSender};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A server running in the background on 127.0.0.1.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub server: Server,
    pub signals: SignalSender,
    pub handle: JoinHandle<graceful::Result<()>>,
}

impl RunningServer {
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Waits for the serving task to return, failing the test after `limit`.
    pub async fn finished_within(self, limit: Duration) -> graceful::Result<()> {
        tokio::time::timeout(limit, self.handle)
            .await
            .expect("server did not shut down in time")
            .expect("server task panicked")
    }
}

/// Starts `router` with the given grace period on an ephemeral port.
pub async fn start_server(router: Router, grace: Duration) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("listener has an address");

    let server = Server::new(router);
    let (signals, signal) = ShutdownSignal::channel();
    let serving = server.clone();
    let handle =
        tokio::spawn(async move { serve_with_signal(&serving, listener, grace, signal).await });

    RunningServer {
        addr,
        server,
        signals,
        handle,
    }
}

/// A router whose only route sleeps for `delay` and then answers 200.
pub fn sleepy_router(delay: Duration) -> Router {
    Router::new().route(
        "/",
        get(move || async move {
            tokio::time::sleep(delay).await;
            StatusCode::OK
        }),
    )
}

/// Like [`sleepy_router`], counting handlers that ran to completion.
pub fn counting_router(delay: Duration) -> (Router, Arc<AtomicUsize>) {
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    let router = Router::new().route(
        "/",
        get(move || {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(delay).await;
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }
        }),
    );
    (router, completed)
}

/// Returns a port that was free a moment ago.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port finder");
    listener.local_addr().expect("port finder has an address").port()
}

/// Returns the path to the test fixtures directory.
pub fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}
