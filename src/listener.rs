//! Listeners that can be closed from another task.

use std::fmt;
use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A source of incoming connections.
///
/// Implemented for [`tokio::net::TcpListener`] and, on Unix,
/// [`tokio::net::UnixListener`].
pub trait Listener: Send + 'static {
    /// The connection type yielded by [`Listener::accept`].
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    /// The peer address type.
    type Addr: fmt::Debug + Send + 'static;

    /// Accepts the next connection.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, Self::Addr)>> + Send;

    /// Returns the local address this listener is bound to.
    fn local_addr(&self) -> io::Result<Self::Addr>;
}

impl Listener for tokio::net::TcpListener {
    type Io = tokio::net::TcpStream;
    type Addr = std::net::SocketAddr;

    async fn accept(&mut self) -> io::Result<(Self::Io, Self::Addr)> {
        tokio::net::TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        tokio::net::TcpListener::local_addr(self)
    }
}

#[cfg(unix)]
impl Listener for tokio::net::UnixListener {
    type Io = tokio::net::UnixStream;
    type Addr = tokio::net::unix::SocketAddr;

    async fn accept(&mut self) -> io::Result<(Self::Io, Self::Addr)> {
        tokio::net::UnixListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        tokio::net::UnixListener::local_addr(self)
    }
}

/// Closes a [`GracefulListener`] from outside the accept loop.
#[derive(Debug, Clone)]
pub struct ListenerCloser {
    closed: CancellationToken,
}

impl ListenerCloser {
    /// Closes the listener. Closing more than once has no further effect.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Wraps a [`Listener`] so that it can be closed while an accept is pending.
///
/// After a close, the pending and every later accept fail with
/// [`Error::ListenerClosed`] and the underlying socket is dropped, so new
/// connection attempts are refused.
pub struct GracefulListener<L> {
    inner: Option<L>,
    closed: CancellationToken,
}

impl<L: Listener> GracefulListener<L> {
    pub fn new(listener: L) -> Self {
        Self {
            inner: Some(listener),
            closed: CancellationToken::new(),
        }
    }

    pub fn closer(&self) -> ListenerCloser {
        ListenerCloser {
            closed: self.closed.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Accepts the next connection, or reports the intentional close.
    pub async fn accept(&mut self) -> Result<(L::Io, L::Addr)> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(Error::ListenerClosed);
        };

        let accepted = tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            res = inner.accept() => Some(res),
        };

        match accepted {
            Some(res) => res.map_err(Error::Accept),
            None => {
                self.inner = None;
                Err(Error::ListenerClosed)
            }
        }
    }
}
