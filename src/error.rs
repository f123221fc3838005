//! Error types for serving with graceful shutdown.

use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the serving entry points.
///
/// Forced closure of connections after the grace period is not represented
/// here: it is a policy outcome, reported through
/// [`SessionState::Forced`](crate::SessionState::Forced).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Binding the listening socket failed (address in use, permission denied).
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The certificate or key file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    CertificateRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The certificate file contained no PEM certificates.
    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    /// The key file contained no PEM private key.
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    /// rustls rejected the certificate/key pair.
    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    /// The listener was closed on purpose while an accept was pending.
    #[error("listener closed")]
    ListenerClosed,

    /// Accepting a connection failed for a reason other than shutdown.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Installing the OS signal handlers failed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),

    /// The server has already been shut down and cannot serve again.
    #[error("server has already been shut down")]
    AlreadyShutDown,
}

impl Error {
    /// Returns true when this is the expected error of a listener closed for
    /// shutdown, as opposed to a genuine accept failure.
    pub fn is_listener_closed(&self) -> bool {
        matches!(self, Error::ListenerClosed)
    }

    /// Returns true for accept errors that only concern a single incoming
    /// connection; the accept loop skips those and keeps going.
    pub(crate) fn is_connection_error(&self) -> bool {
        match self {
            Error::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}
