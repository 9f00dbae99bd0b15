//! Single-flight token refresh with a FIFO queue of waiting requests
//!
//! The first request to see a 401 becomes the *leader* and performs the
//! refresh call. Requests that see a 401 while the leader is still working
//! are queued and resumed, in arrival order, with the leader's outcome.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Why queued requests could not be given a new token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The refresh call failed; credentials have been cleared.
    Rejected(String),
    /// The leader was dropped before the refresh settled.
    Interrupted,
}

type Outcome = Result<String, RefreshFailure>;

enum State {
    Idle,
    Refreshing { waiters: Vec<oneshot::Sender<Outcome>> },
}

/// What a caller must do after asking to refresh
pub enum RefreshTicket<'a> {
    /// No refresh was in flight: perform it, then settle the guard.
    Lead(RefreshGuard<'a>),
    /// A refresh is already in flight: await its outcome.
    Wait(oneshot::Receiver<Outcome>),
}

/// Owns the refreshing state and the queue of suspended requests
pub struct RefreshCoordinator {
    state: Mutex<State>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    /// Join the current refresh, or start one if none is in flight.
    pub fn enqueue(&self) -> RefreshTicket<'_> {
        let mut state = self.lock();

        if let State::Refreshing { waiters } = &mut *state {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            debug!(queued = %waiters.len(), "Refresh in flight, request queued");
            return RefreshTicket::Wait(rx);
        }

        *state = State::Refreshing {
            waiters: Vec::new(),
        };
        debug!("Starting token refresh");
        RefreshTicket::Lead(RefreshGuard {
            coordinator: self,
            settled: false,
        })
    }

    /// Resume every queued request with the new access token. Returns how many were queued.
    pub fn drain_success(&self, access_token: &str) -> usize {
        self.drain(Ok(access_token.to_string()))
    }

    /// Reject every queued request. Returns how many were queued.
    pub fn drain_failure(&self, failure: RefreshFailure) -> usize {
        self.drain(Err(failure))
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(&*self.lock(), State::Refreshing { .. })
    }

    pub fn queued(&self) -> usize {
        match &*self.lock() {
            State::Idle => 0,
            State::Refreshing { waiters } => waiters.len(),
        }
    }

    fn drain(&self, outcome: Outcome) -> usize {
        let waiters = match mem::replace(&mut *self.lock(), State::Idle) {
            State::Idle => return 0,
            State::Refreshing { waiters } => waiters,
        };

        let count = waiters.len();
        for waiter in waiters {
            // The waiting request may have been dropped; nothing to resume then.
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the leader for the duration of the refresh call
///
/// Dropping it unsettled rejects the queue with [`RefreshFailure::Interrupted`].
pub struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshGuard<'_> {
    pub fn succeed(mut self, access_token: &str) -> usize {
        self.settled = true;
        self.coordinator.drain_success(access_token)
    }

    pub fn fail(mut self, reason: String) -> usize {
        self.settled = true;
        self.coordinator.drain_failure(RefreshFailure::Rejected(reason))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let count = self.coordinator.drain_failure(RefreshFailure::Interrupted);
            warn!(queued = %count, "Token refresh abandoned before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lead(coordinator: &RefreshCoordinator) -> RefreshGuard<'_> {
        match coordinator.enqueue() {
            RefreshTicket::Lead(guard) => guard,
            RefreshTicket::Wait(_) => panic!("expected to lead the refresh"),
        }
    }

    fn wait(coordinator: &RefreshCoordinator) -> oneshot::Receiver<Outcome> {
        match coordinator.enqueue() {
            RefreshTicket::Wait(rx) => rx,
            RefreshTicket::Lead(_) => panic!("expected to wait on the refresh"),
        }
    }

    #[tokio::test]
    async fn test_single_leader_and_fifo_success() {
        let coordinator = RefreshCoordinator::new();

        let guard = lead(&coordinator);
        let first = wait(&coordinator);
        let second = wait(&coordinator);
        assert!(coordinator.is_refreshing());
        assert_eq!(coordinator.queued(), 2);

        assert_eq!(guard.succeed("new-token"), 2);
        assert!(!coordinator.is_refreshing());

        assert_eq!(first.await.unwrap(), Ok("new-token".to_string()));
        assert_eq!(second.await.unwrap(), Ok("new-token".to_string()));

        // Back to idle: the next caller leads again
        let _guard = lead(&coordinator);
    }

    #[tokio::test]
    async fn test_failure_rejects_every_waiter() {
        let coordinator = RefreshCoordinator::new();

        let guard = lead(&coordinator);
        let waiters: Vec<_> = (0..3).map(|_| wait(&coordinator)).collect();

        assert_eq!(guard.fail("refresh token revoked".to_string()), 3);

        for waiter in waiters {
            assert_eq!(
                waiter.await.unwrap(),
                Err(RefreshFailure::Rejected("refresh token revoked".to_string()))
            );
        }
        assert_eq!(coordinator.queued(), 0);
    }

    #[tokio::test]
    async fn test_dropped_leader_interrupts_queue() {
        let coordinator = RefreshCoordinator::new();

        let guard = lead(&coordinator);
        let waiter = wait(&coordinator);
        drop(guard);

        assert_eq!(waiter.await.unwrap(), Err(RefreshFailure::Interrupted));
        assert!(!coordinator.is_refreshing());
    }

    #[test]
    fn test_drain_when_idle_is_noop() {
        let coordinator = RefreshCoordinator::new();
        assert_eq!(coordinator.drain_success("token"), 0);
        assert_eq!(coordinator.drain_failure(RefreshFailure::Interrupted), 0);
    }

    #[test]
    fn test_dropped_waiter_does_not_block_drain() {
        let coordinator = RefreshCoordinator::new();

        let guard = lead(&coordinator);
        drop(wait(&coordinator));
        let kept = wait(&coordinator);

        assert_eq!(guard.succeed("t"), 2);
        drop(kept);
    }
}
