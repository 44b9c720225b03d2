//! Connection bookkeeping shared by both clients.
//!
//! A [`Lifecycle`] owns the lifecycle state, the reconnect-attempt counter
//! and the cancellation token of the current connection. Each call to
//! [`Lifecycle::begin`] starts a new *generation*; the returned [`Session`]
//! is the driver task's ticket, and every mutation made through a stale
//! ticket is ignored. That is what lets `connect()` replace a live connection
//! and `disconnect()` stop a pending reconnect without racing the old task.

use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::{BackoffPolicy, ConnectionState, LifecycleEvent};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Ticket held by one driver task.
#[derive(Clone, Debug)]
pub(crate) struct Session {
    generation: u64,
    cancel: CancellationToken,
}

impl Session {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves once this session is superseded or torn down.
    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Reconnect limits for one client.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ReconnectPolicy {
    pub backoff: BackoffPolicy,
    pub max_attempts: u32,
}

pub(crate) struct Lifecycle {
    transport: &'static str,
    policy: ReconnectPolicy,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Inner {
    generation: u64,
    cancel: Option<CancellationToken>,
    attempts: u32,
    state: ConnectionState,
}

impl Lifecycle {
    pub(crate) fn new(transport: &'static str, policy: ReconnectPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            transport,
            policy,
            inner: Mutex::new(Inner {
                generation: 0,
                cancel: None,
                attempts: 0,
                state: ConnectionState::Idle,
            }),
            state_tx,
        }
    }

    /// Tear down any current session and start a new one in `connecting`.
    pub(crate) fn begin(&self) -> Session {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.cancel.take() {
            old.cancel();
        }
        inner.generation += 1;
        inner.attempts = 0;
        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());
        self.set_state(&mut inner, LifecycleEvent::Connect);
        debug!(transport = self.transport, generation = inner.generation, "connection session started");
        Session {
            generation: inner.generation,
            cancel,
        }
    }

    /// Whether `session` still owns the connection.
    pub(crate) fn is_current(&self, session: &Session) -> bool {
        let inner = self.inner.lock();
        inner.generation == session.generation && !session.cancel.is_cancelled()
    }

    /// Apply `event` on behalf of `session`.
    ///
    /// Returns `false` when the session is stale; the caller should stop.
    pub(crate) fn apply(&self, session: &Session, event: LifecycleEvent) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != session.generation || session.cancel.is_cancelled() {
            return false;
        }
        self.set_state(&mut inner, event);
        true
    }

    /// Mark the connection open and reset the attempt counter.
    pub(crate) fn opened(&self, session: &Session) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != session.generation || session.cancel.is_cancelled() {
            return false;
        }
        inner.attempts = 0;
        self.set_state(&mut inner, LifecycleEvent::Opened);
        true
    }

    /// Consume one reconnect attempt and return the delay before it.
    ///
    /// Returns `None` when the session is stale or the attempt budget is spent.
    pub(crate) fn next_retry(&self, session: &Session) -> Option<Duration> {
        let mut inner = self.inner.lock();
        if inner.generation != session.generation || session.cancel.is_cancelled() {
            return None;
        }
        if inner.attempts >= self.policy.max_attempts {
            error!(
                transport = self.transport,
                attempts = inner.attempts,
                "reconnect attempts exhausted, giving up"
            );
            return None;
        }
        let delay = self.policy.backoff.delay(inner.attempts);
        inner.attempts += 1;
        info!(
            transport = self.transport,
            attempt = inner.attempts,
            max_attempts = self.policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        Some(delay)
    }

    /// Cancel the current session and move to `closed`.
    ///
    /// Returns `true` if a session was active.
    pub(crate) fn shutdown(&self) -> bool {
        let mut inner = self.inner.lock();
        let active = inner.cancel.take().is_some_and(|token| {
            token.cancel();
            true
        });
        inner.generation += 1;
        inner.attempts = 0;
        self.set_state(&mut inner, LifecycleEvent::Disconnect);
        active
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, inner: &mut Inner, event: LifecycleEvent) {
        match inner.state.transition(event) {
            Ok(next) => {
                if next != inner.state {
                    debug!(
                        transport = self.transport,
                        from = %inner.state,
                        to = %next,
                        "connection state changed"
                    );
                }
                inner.state = next;
                let _ = self.state_tx.send_replace(next);
            }
            Err(err) => {
                debug!(transport = self.transport, error = %err, "ignoring lifecycle event");
            }
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Lifecycle")
            .field("transport", &self.transport)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("attempts", &inner.attempts)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle(max_attempts: u32) -> Lifecycle {
        Lifecycle::new(
            "test",
            ReconnectPolicy {
                backoff: BackoffPolicy::default(),
                max_attempts,
            },
        )
    }

    #[test]
    fn begin_enters_connecting() {
        let lc = lifecycle(10);
        assert_eq!(lc.state(), ConnectionState::Idle);
        let _session = lc.begin();
        assert_eq!(lc.state(), ConnectionState::Connecting);
    }

    #[test]
    fn retries_follow_backoff_until_budget_spent() {
        let lc = lifecycle(3);
        let session = lc.begin();
        let delays: Vec<u64> = std::iter::from_fn(|| lc.next_retry(&session))
            .map(|d| u64::try_from(d.as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);
        assert_eq!(lc.attempts(), 3);
    }

    #[test]
    fn open_resets_attempts() {
        let lc = lifecycle(10);
        let session = lc.begin();
        let _ = lc.next_retry(&session);
        let _ = lc.next_retry(&session);
        assert!(lc.apply(&session, LifecycleEvent::Failed));
        assert!(lc.apply(&session, LifecycleEvent::Retry));
        assert!(lc.opened(&session));
        assert_eq!(lc.attempts(), 0);
        assert_eq!(lc.state(), ConnectionState::Open);
    }

    #[test]
    fn new_session_invalidates_old() {
        let lc = lifecycle(10);
        let old = lc.begin();
        let new = lc.begin();
        assert!(!lc.is_current(&old));
        assert!(lc.is_current(&new));
        assert!(!lc.opened(&old));
        assert!(lc.next_retry(&old).is_none());
        assert_eq!(lc.state(), ConnectionState::Connecting);
    }

    #[test]
    fn shutdown_cancels_and_closes() {
        let lc = lifecycle(10);
        let session = lc.begin();
        assert!(lc.shutdown());
        assert!(session.cancel.is_cancelled());
        assert_eq!(lc.state(), ConnectionState::Closed);
        assert!(!lc.apply(&session, LifecycleEvent::Failed));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let lc = lifecycle(10);
        let _session = lc.begin();
        assert!(lc.shutdown());
        assert!(!lc.shutdown());
        assert_eq!(lc.state(), ConnectionState::Closed);
    }

    #[test]
    fn watch_observes_transitions() {
        let lc = lifecycle(10);
        let rx = lc.watch();
        let session = lc.begin();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);
        assert!(lc.opened(&session));
        assert_eq!(*rx.borrow(), ConnectionState::Open);
    }
}
