//! Serving entry points with graceful shutdown.
//!
//! Every entry point wires the same pieces together: a closable listener, the
//! connection tracker, the one-shot signal watcher, and the drain coordinator.
//! `grace` is the time to wait for active requests before killing their
//! connections; zero waits for as long as they take.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use crate::connection::Connection;
use crate::drain::{self, SessionState};
use crate::error::{Error, Result};
use crate::listener::{GracefulListener, Listener};
use crate::shutdown::{spawn_watcher, ShutdownSignal};
use crate::tls;
use crate::tracker::{spawn_tracker, ConnHandle, TrackerHandle};

/// Port used by [`listen_and_serve`] when the server has no address.
pub const DEFAULT_HTTP_PORT: u16 = 80;
/// Port used by [`listen_and_serve_tls`] when the server has no address.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// An HTTP server: the router to serve plus the state shutdown acts on.
///
/// Clones share keep-alive and session state, so a clone handed to another
/// component observes the shutdown of the original.
#[derive(Debug, Clone)]
pub struct Server {
    addr: Option<String>,
    router: Router,
    alpn_protocols: Vec<Vec<u8>>,
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    keep_alive: watch::Sender<bool>,
    session: watch::Sender<SessionState>,
}

impl Server {
    pub fn new(router: Router) -> Self {
        let (keep_alive, _) = watch::channel(true);
        let (session, _) = watch::channel(SessionState::Running);
        Self {
            addr: None,
            router,
            alpn_protocols: Vec::new(),
            shared: Arc::new(Shared {
                keep_alive,
                session,
            }),
        }
    }

    /// Sets the address used by [`listen_and_serve`] and [`listen_and_serve_tls`].
    ///
    /// Accepts `host:port`, `:port` (all interfaces) and the `:http` / `:https`
    /// service names.
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Sets the ALPN protocols advertised by [`listen_and_serve_tls`].
    /// Defaults to `http/1.1`.
    pub fn with_alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn keep_alives_enabled(&self) -> bool {
        *self.shared.keep_alive.borrow()
    }

    /// Turns HTTP keep-alive on or off. Turning it off makes every open
    /// connection close after its current request.
    pub fn set_keep_alives_enabled(&self, enabled: bool) {
        self.shared.keep_alive.send_replace(enabled);
    }

    pub fn session_state(&self) -> SessionState {
        *self.shared.session.borrow()
    }

    /// Subscribes to session state changes.
    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.shared.session.subscribe()
    }

    pub(crate) fn advance_session(&self, next: SessionState) -> bool {
        drain::advance(&self.shared.session, next)
    }

    fn keep_alive_receiver(&self) -> watch::Receiver<bool> {
        self.shared.keep_alive.subscribe()
    }
}

/// Serves `router` on `addr` until a termination signal, then drains.
///
/// Bind and serve failures are logged and terminate the process.
pub async fn run(addr: impl Into<String>, grace: Duration, router: Router) {
    let signal = match ShutdownSignal::os() {
        Ok(signal) => signal,
        Err(e) => exit_with(&e),
    };
    run_with_signal(addr, grace, router, signal).await;
}

/// [`run`] with an explicit signal source.
pub async fn run_with_signal(
    addr: impl Into<String>,
    grace: Duration,
    router: Router,
    signal: ShutdownSignal,
) {
    let server = Server::new(router).with_addr(addr);
    if let Err(e) = listen_and_serve_with_signal(&server, grace, signal).await {
        // A closed listener is how a signalled shutdown ends the accept loop.
        if !e.is_listener_closed() {
            exit_with(&e);
        }
    }
}

fn exit_with(e: &Error) -> ! {
    tracing::error!("[graceful] {}", e);
    std::process::exit(1);
}

/// Binds the server's address and serves until a termination signal.
pub async fn listen_and_serve(server: &Server, grace: Duration) -> Result<()> {
    let listener = bind(server.addr(), DEFAULT_HTTP_PORT).await?;
    let signal = ShutdownSignal::os()?;
    serve_connections(server, listener, grace, signal, None).await
}

/// [`listen_and_serve`] with an explicit signal source.
pub async fn listen_and_serve_with_signal(
    server: &Server,
    grace: Duration,
    signal: ShutdownSignal,
) -> Result<()> {
    let listener = bind(server.addr(), DEFAULT_HTTP_PORT).await?;
    serve_connections(server, listener, grace, signal, None).await
}

/// Like [`listen_and_serve`], but every connection speaks TLS.
///
/// The certificate and key are loaded before binding; a failure is returned
/// without accepting any connection.
pub async fn listen_and_serve_tls(
    server: &Server,
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
    grace: Duration,
) -> Result<()> {
    let acceptor = tls::load_acceptor(
        cert_path.as_ref(),
        key_path.as_ref(),
        &server.alpn_protocols,
    )?;
    let listener = bind(server.addr(), DEFAULT_HTTPS_PORT).await?;
    let signal = ShutdownSignal::os()?;
    serve_connections(server, listener, grace, signal, Some(acceptor)).await
}

/// [`listen_and_serve_tls`] with an explicit signal source.
pub async fn listen_and_serve_tls_with_signal(
    server: &Server,
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
    grace: Duration,
    signal: ShutdownSignal,
) -> Result<()> {
    let acceptor = tls::load_acceptor(
        cert_path.as_ref(),
        key_path.as_ref(),
        &server.alpn_protocols,
    )?;
    let listener = bind(server.addr(), DEFAULT_HTTPS_PORT).await?;
    serve_connections(server, listener, grace, signal, Some(acceptor)).await
}

/// Serves on a caller-supplied listener until a termination signal.
pub async fn serve<L: Listener>(server: &Server, listener: L, grace: Duration) -> Result<()> {
    let signal = ShutdownSignal::os()?;
    serve_connections(server, listener, grace, signal, None).await
}

/// [`serve`] with an explicit signal source.
pub async fn serve_with_signal<L: Listener>(
    server: &Server,
    listener: L,
    grace: Duration,
    signal: ShutdownSignal,
) -> Result<()> {
    serve_connections(server, listener, grace, signal, None).await
}

async fn bind(addr: Option<&str>, default_port: u16) -> Result<TcpListener> {
    let addr = resolve_bind_addr(addr, default_port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| Error::Bind { addr, source })
}

/// Normalizes a listen address: empty means all interfaces on
/// `default_port`, an empty host means all interfaces, and the `http` /
/// `https` service names map to their well-known ports.
fn resolve_bind_addr(addr: Option<&str>, default_port: u16) -> String {
    let addr = match addr {
        None | Some("") => return format!("0.0.0.0:{}", default_port),
        Some(addr) => addr,
    };
    let Some((host, port)) = addr.rsplit_once(':') else {
        return addr.to_string();
    };
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    let port = match port {
        "http" => "80",
        "https" => "443",
        port => port,
    };
    format!("{}:{}", host, port)
}

async fn serve_connections<L: Listener>(
    server: &Server,
    listener: L,
    grace: Duration,
    signal: ShutdownSignal,
    tls: Option<TlsAcceptor>,
) -> Result<()> {
    if server.session_state() != SessionState::Running {
        return Err(Error::AlreadyShutDown);
    }

    match listener.local_addr() {
        Ok(addr) => tracing::info!("Listening on {:?}", addr),
        Err(e) => tracing::debug!("listener has no local address: {}", e),
    }

    let (tracker, _tracker_task) = spawn_tracker();
    let mut listener = GracefulListener::new(listener);
    let watcher = spawn_watcher(signal, server.clone(), listener.closer());

    let result = accept_loop(server, &mut listener, &tracker, tls.as_ref()).await;
    drop(listener);

    if let Err(e) = &result {
        tracing::error!("accept loop failed: {}", e);
        // Let idle connections go as they would after a signal.
        server.set_keep_alives_enabled(false);
    }
    server.advance_session(SessionState::Draining);

    let outcome = drain::drain(&tracker, grace).await;
    server.advance_session(outcome.into());
    watcher.abort();
    tracing::info!(?outcome, "Server shutdown complete");

    result
}

/// Accepts connections until the listener is closed or fails.
async fn accept_loop<L: Listener>(
    server: &Server,
    listener: &mut GracefulListener<L>,
    tracker: &TrackerHandle,
    tls: Option<&TlsAcceptor>,
) -> Result<()> {
    let mut next_id: u64 = 0;

    loop {
        let (io, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) if e.is_listener_closed() => {
                tracing::debug!("listener closed, no longer accepting connections");
                return Ok(());
            }
            Err(e) if e.is_connection_error() => {
                tracing::debug!("skipping failed connection: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        next_id = next_id.wrapping_add(1);
        tracing::debug!(conn = next_id, "accepted connection from {:?}", remote_addr);

        let connection = Connection {
            conn: ConnHandle::new(next_id),
            tracker: tracker.clone(),
            router: server.router.clone(),
            keep_alive: server.keep_alive_receiver(),
        };

        match tls.cloned() {
            Some(acceptor) => {
                tokio::spawn(connection.serve_tls(acceptor, io));
            }
            None => {
                tokio::spawn(connection.serve(io));
            }
        }
    }
}
