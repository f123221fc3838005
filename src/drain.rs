//! Drain coordination.
//!
//! Once the accept loop has returned, the coordinator asks the tracker to
//! report when the last in-flight request is done. With a non-zero grace
//! period that wait races a timer, and losing the race force-closes whatever
//! is still active.

use std::time::Duration;

use tokio::sync::watch;

use crate::tracker::TrackerHandle;

/// Shutdown session of one server instance.
///
/// Transitions only move forward: `Running → Draining → {Stopped | Forced}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Running,
    Draining,
    /// Drain finished with every active request completed.
    Stopped,
    /// The grace period elapsed and the remaining connections were closed.
    Forced,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Forced)
    }
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Stopped,
    Forced,
}

impl From<DrainOutcome> for SessionState {
    fn from(outcome: DrainOutcome) -> Self {
        match outcome {
            DrainOutcome::Stopped => SessionState::Stopped,
            DrainOutcome::Forced => SessionState::Forced,
        }
    }
}

/// Moves `session` forward to `next`. Returns false if the session was already
/// at or past `next`, in which case nothing changes.
pub(crate) fn advance(session: &watch::Sender<SessionState>, next: SessionState) -> bool {
    session.send_if_modified(|current| {
        // Stopped and Forced are both terminal; neither replaces the other.
        if current.is_terminal() || *current >= next {
            return false;
        }
        *current = next;
        true
    })
}

/// Waits for in-flight requests to finish, force-closing them after `grace`.
///
/// A zero `grace` waits without a deadline. Must only be called after the
/// accept loop has returned, so the set of connections to wait for is final.
pub async fn drain(tracker: &TrackerHandle, grace: Duration) -> DrainOutcome {
    let done = tracker.stop_and_wait();

    if grace.is_zero() {
        let _ = done.await;
        return DrainOutcome::Stopped;
    }

    match tokio::time::timeout(grace, done).await {
        Ok(_) => DrainOutcome::Stopped,
        Err(_) => {
            tracing::warn!(
                ?grace,
                "grace period elapsed, closing remaining connections"
            );
            tracker.kill();
            DrainOutcome::Forced
        }
    }
}
