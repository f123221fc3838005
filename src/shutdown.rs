//! Shutdown signal handling.
//!
//! Each server instance owns its own [`ShutdownSignal`]. The watcher reacts to
//! the first signal only: it turns keep-alive off, closes the listener, and
//! then drops the signal source so later signals are no longer processed by
//! this instance.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::drain::SessionState;
use crate::error::{Error, Result};
use crate::listener::ListenerCloser;
use crate::server::Server;

/// Termination signals that start a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM (common in containerized environments)
    Terminate,
}

/// A per-server source of termination signals.
///
/// Created either from the operating system with [`ShutdownSignal::os`] or as
/// an injectable channel with [`ShutdownSignal::channel`].
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: mpsc::Receiver<Signal>,
    forwarders: Vec<JoinHandle<()>>,
}

/// Injects signals into a [`ShutdownSignal`] created with
/// [`ShutdownSignal::channel`].
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<Signal>,
}

impl SignalSender {
    /// Delivers `signal`. Returns false if it was not delivered, either
    /// because the watcher has already reacted to a signal and stopped
    /// listening, or because one is already queued.
    pub fn send(&self, signal: Signal) -> bool {
        self.tx.try_send(signal).is_ok()
    }

    /// Returns true once the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ShutdownSignal {
    /// Listens for SIGINT and SIGTERM (Ctrl+C only on non-Unix platforms).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn os() -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        let mut forwarders = Vec::new();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            for (kind, forwarded) in [
                (SignalKind::interrupt(), Signal::Interrupt),
                (SignalKind::terminate(), Signal::Terminate),
            ] {
                let mut stream = signal(kind).map_err(Error::Signal)?;
                let tx = tx.clone();
                forwarders.push(tokio::spawn(async move {
                    while stream.recv().await.is_some() {
                        // A full buffer means a signal is already pending.
                        let _ = tx.try_send(forwarded);
                    }
                }));
            }
        }

        #[cfg(not(unix))]
        {
            let tx = tx.clone();
            forwarders.push(tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    let _ = tx.try_send(Signal::Interrupt);
                }
            }));
        }

        Ok(Self { rx, forwarders })
    }

    /// Creates a signal source fed by the returned [`SignalSender`].
    pub fn channel() -> (SignalSender, Self) {
        let (tx, rx) = mpsc::channel(1);
        (
            SignalSender { tx },
            Self {
                rx,
                forwarders: Vec::new(),
            },
        )
    }

    /// Waits for the next signal. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

/// Spawns the one-shot watcher for `server`.
///
/// On the first signal: keep-alive is disabled, the session moves to
/// Draining, the listener is closed, and the signal source is dropped.
pub(crate) fn spawn_watcher(
    mut signal: ShutdownSignal,
    server: Server,
    closer: ListenerCloser,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match signal.recv().await {
            Some(Signal::Interrupt) => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
            Some(Signal::Terminate) => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            None => {
                tracing::debug!("signal source closed before any signal arrived");
                return;
            }
        }

        server.set_keep_alives_enabled(false);
        server.advance_session(SessionState::Draining);
        closer.close();
        drop(signal);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    /// The OS source must not complete on its own: nothing has been sent.
    #[tokio::test]
    async fn test_os_signal_waits_for_signal() {
        let mut signal = ShutdownSignal::os().unwrap();
        let result = timeout(Duration::from_millis(10), signal.recv()).await;
        assert!(result.is_err(), "os signal source should wait for a signal");
    }

    #[tokio::test]
    async fn test_channel_delivers_injected_signal() {
        let (sender, mut signal) = ShutdownSignal::channel();
        {
            let mut recv = task::spawn(signal.recv());
            assert_pending!(recv.poll());
            assert!(sender.send(Signal::Terminate));
            assert!(recv.is_woken());
            assert_ready_eq!(recv.poll(), Some(Signal::Terminate));
        }
        drop(sender);
        assert_eq!(signal.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_after_drop_reports_failure() {
        let (sender, signal) = ShutdownSignal::channel();
        drop(signal);
        assert!(sender.is_closed());
        assert!(!sender.send(Signal::Interrupt));
    }

    #[tokio::test]
    async fn test_buffer_holds_one_pending_signal() {
        let (sender, _signal) = ShutdownSignal::channel();
        assert!(sender.send(Signal::Interrupt));
        assert!(!sender.send(Signal::Interrupt));
    }
}
