//! graceful - HTTP serving with graceful shutdown
//!
//! On SIGINT or SIGTERM the server stops accepting connections, lets
//! in-flight requests finish within a grace period, and then force-closes
//! whatever is still active.

pub mod config;
mod connection;
pub mod demo;
pub mod drain;
pub mod error;
pub mod listener;
pub mod server;
pub mod shutdown;
pub mod tls;
pub mod tracker;

pub use drain::{DrainOutcome, SessionState};
pub use error::{Error, Result};
pub use listener::Listener;
pub use server::{
    listen_and_serve, listen_and_serve_tls, listen_and_serve_tls_with_signal,
    listen_and_serve_with_signal, run, run_with_signal, serve, serve_with_signal, Server,
};
pub use shutdown::{ShutdownSignal, Signal, SignalSender};
