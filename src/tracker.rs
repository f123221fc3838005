//! Connection lifecycle tracking.
//!
//! A single task owns the set of connections that are in the middle of a
//! request. Connection tasks feed it state transitions, and the drain
//! coordinator asks it to either report when the set runs empty or to kill
//! whatever is left. All of this goes through one inbox so membership is never
//! touched from two places at once.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a connection as reported by its connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// A request is being processed.
    Active,
    /// The last response was fully written; the connection is waiting in keep-alive.
    Idle,
    /// The connection has been torn down.
    Closed,
}

/// Identity of one accepted connection.
///
/// The handle carries the token used to force the connection closed; the
/// tracker cancels it but never touches the transport itself.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: u64,
    kill: CancellationToken,
}

impl ConnHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            kill: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Completes once the tracker has force-closed this connection.
    pub async fn killed(&self) {
        self.kill.cancelled().await;
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_cancelled()
    }
}

enum Command {
    Transition(ConnHandle, ConnState),
    StopAndWait(oneshot::Sender<()>),
    Kill,
}

/// Sending side of the tracker inbox.
///
/// Cheap to clone; every connection task holds one. Once the tracker has
/// terminated, reports are discarded.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Transition(conn, state) => f
                .debug_tuple("Transition")
                .field(&conn.id)
                .field(state)
                .finish(),
            Command::StopAndWait(_) => f.write_str("StopAndWait"),
            Command::Kill => f.write_str("Kill"),
        }
    }
}

impl TrackerHandle {
    /// Reports a state transition for `conn`.
    pub fn report(&self, conn: &ConnHandle, state: ConnState) {
        let _ = self.tx.send(Command::Transition(conn.clone(), state));
    }

    /// Asks the tracker to stop once no connection is active.
    ///
    /// The returned receiver completes when the active set is empty. It also
    /// completes (with an error) if the tracker is already gone, which callers
    /// treat the same way: nothing is left to wait for.
    pub fn stop_and_wait(&self) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self.tx.send(Command::StopAndWait(done_tx));
        done_rx
    }

    /// Force-closes every active connection and terminates the tracker.
    pub fn kill(&self) {
        let _ = self.tx.send(Command::Kill);
    }
}

/// The tracker task state. Owns the active set.
struct Tracker {
    rx: mpsc::UnboundedReceiver<Command>,
    active: HashMap<u64, CancellationToken>,
    pending_stop: Option<oneshot::Sender<()>>,
}

/// Spawns the tracker task and returns its inbox handle.
pub fn spawn_tracker() -> (TrackerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let tracker = Tracker {
        rx,
        active: HashMap::new(),
        pending_stop: None,
    };
    let task = tokio::spawn(tracker.run());
    (TrackerHandle { tx }, task)
}

impl Tracker {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            if self.handle(command) {
                return;
            }
        }
        tracing::debug!("tracker inbox closed");
    }

    /// Applies one command. Returns true when the tracker is done.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Transition(conn, ConnState::Active) => {
                self.active.insert(conn.id, conn.kill);
                false
            }
            Command::Transition(conn, ConnState::Idle | ConnState::Closed) => {
                self.active.remove(&conn.id);
                if self.active.is_empty() {
                    if let Some(done) = self.pending_stop.take() {
                        let _ = done.send(());
                        return true;
                    }
                }
                false
            }
            Command::StopAndWait(done) => {
                if self.active.is_empty() {
                    let _ = done.send(());
                    return true;
                }
                tracing::debug!(active = self.active.len(), "waiting for active connections");
                if self.pending_stop.replace(done).is_some() {
                    tracing::warn!("replaced an outstanding stop request");
                }
                false
            }
            Command::Kill => {
                for (id, kill) in self.active.drain() {
                    tracing::debug!(conn = id, "force-closing connection");
                    kill.cancel();
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_stop_with_no_connections_resolves_immediately() {
        let (tracker, task) = spawn_tracker();

        let done = tracker.stop_and_wait();
        timeout(Duration::from_millis(100), done)
            .await
            .expect("stop should resolve immediately")
            .unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_waits_for_active_connection() {
        let (tracker, task) = spawn_tracker();
        let conn = ConnHandle::new(1);

        tracker.report(&conn, ConnState::Active);
        let mut done = tracker.stop_and_wait();

        // Still active, so the stop request must stay pending.
        assert!(timeout(Duration::from_millis(30), &mut done).await.is_err());

        tracker.report(&conn, ConnState::Idle);
        timeout(Duration::from_millis(100), done)
            .await
            .expect("stop should resolve once idle")
            .unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_and_closed_both_remove() {
        let (tracker, task) = spawn_tracker();
        let a = ConnHandle::new(1);
        let b = ConnHandle::new(2);

        tracker.report(&a, ConnState::Active);
        tracker.report(&b, ConnState::Active);
        tracker.report(&a, ConnState::Idle);
        let mut done = tracker.stop_and_wait();
        assert!(timeout(Duration::from_millis(30), &mut done).await.is_err());

        tracker.report(&b, ConnState::Closed);
        done.await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_active_is_noop() {
        let (tracker, task) = spawn_tracker();
        let never_active = ConnHandle::new(7);

        tracker.report(&never_active, ConnState::Closed);
        tracker.stop_and_wait().await.unwrap();
        task.await.unwrap();
        assert!(!never_active.is_killed());
    }

    #[tokio::test]
    async fn test_kill_cancels_active_connections_only() {
        let (tracker, task) = spawn_tracker();
        let busy = ConnHandle::new(1);
        let idle = ConnHandle::new(2);

        tracker.report(&busy, ConnState::Active);
        tracker.report(&idle, ConnState::Active);
        tracker.report(&idle, ConnState::Idle);
        let _done = tracker.stop_and_wait();
        tracker.kill();
        task.await.unwrap();

        assert!(busy.is_killed());
        assert!(!idle.is_killed());
        timeout(Duration::from_millis(100), busy.killed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reports_after_termination_are_discarded() {
        let (tracker, task) = spawn_tracker();
        tracker.stop_and_wait().await.unwrap();
        task.await.unwrap();

        // Neither of these may panic once the inbox is gone.
        tracker.report(&ConnHandle::new(1), ConnState::Active);
        tracker.kill();
        assert!(tracker.stop_and_wait().await.is_err());
    }

    #[tokio::test]
    async fn test_repeated_active_keeps_single_membership() {
        let (tracker, task) = spawn_tracker();
        let conn = ConnHandle::new(3);

        tracker.report(&conn, ConnState::Active);
        tracker.report(&conn, ConnState::Active);
        tracker.report(&conn, ConnState::Idle);
        tracker.stop_and_wait().await.unwrap();
        task.await.unwrap();
    }
}
