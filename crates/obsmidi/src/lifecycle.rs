//! Shared lifecycle primitives: the broadcast close signal, the abortable
//! start gate, and the teardown error bucket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::{BridgeError, StartupErrors};

/// One-shot broadcast flag observed by every activity for cooperative
/// shutdown. Cloning shares the underlying flag.
#[derive(Clone, Default)]
pub struct CloseSignal {
    inner: Arc<CloseInner>,
}

#[derive(Default)]
struct CloseInner {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Callable from any thread; repeated calls are
    /// no-ops.
    pub fn set(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Wait until the signal is raised. Returns immediately if it already
    /// is.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Returned to gate waiters when a party could not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateAborted;

/// N-party start barrier with an abort operation. A party that fails before
/// reaching the gate calls [`StartGate::abort`] so its peers wake with
/// [`GateAborted`] instead of blocking forever.
pub struct StartGate {
    state: Mutex<GateState>,
    notify: Notify,
}

struct GateState {
    remaining: usize,
    aborted: bool,
}

impl StartGate {
    pub fn new(parties: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState {
                remaining: parties,
                aborted: false,
            }),
            notify: Notify::new(),
        })
    }

    /// Arrive and block until every party has arrived, or until the gate is
    /// aborted.
    pub async fn wait(&self) -> Result<(), GateAborted> {
        {
            let mut state = self.state.lock().expect("start gate poisoned");
            if state.aborted {
                return Err(GateAborted);
            }
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 {
                drop(state);
                self.notify.notify_waiters();
                return Ok(());
            }
        }

        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock().expect("start gate poisoned");
                if state.aborted {
                    return Err(GateAborted);
                }
                if state.remaining == 0 {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Break the gate: every current and future waiter gets [`GateAborted`].
    pub fn abort(&self) {
        self.state.lock().expect("start gate poisoned").aborted = true;
        self.notify.notify_waiters();
    }
}

/// Multi-producer collection of fatal errors, drained once during teardown.
#[derive(Clone, Default)]
pub struct ErrorBucket {
    errors: Arc<Mutex<Vec<BridgeError>>>,
}

impl ErrorBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, err: BridgeError) {
        self.errors.lock().expect("error bucket poisoned").push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().expect("error bucket poisoned").is_empty()
    }

    /// Drain into the runtime outcome: `None` for a clean stop, the error
    /// itself when exactly one was captured, an aggregate otherwise.
    pub fn take_outcome(&self) -> Option<BridgeError> {
        let mut errors = std::mem::take(&mut *self.errors.lock().expect("error bucket poisoned"));
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => Some(BridgeError::Startup(StartupErrors(errors))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn close_signal_wakes_waiters() {
        let signal = CloseSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        signal.set();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not wake")
            .unwrap();
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn close_signal_double_set_is_noop() {
        let signal = CloseSignal::new();
        signal.set();
        signal.set();
        assert!(signal.is_set());
        signal.wait().await;
    }

    #[tokio::test]
    async fn gate_releases_when_all_parties_arrive() {
        let gate = StartGate::new(3);

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        let second = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!first.is_finished());

        assert_eq!(gate.wait().await, Ok(()));
        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(second.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn gate_abort_wakes_waiters_with_error() {
        let gate = StartGate::new(3);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.abort();

        assert_eq!(waiter.await.unwrap(), Err(GateAborted));
        // late arrivals observe the break too
        assert_eq!(gate.wait().await, Err(GateAborted));
    }

    #[test]
    fn bucket_outcome_shapes() {
        let bucket = ErrorBucket::new();
        assert!(bucket.take_outcome().is_none());

        bucket.push(BridgeError::Disconnected);
        assert!(matches!(
            bucket.take_outcome(),
            Some(BridgeError::Disconnected)
        ));

        bucket.push(BridgeError::Disconnected);
        bucket.push(BridgeError::Auth { code: 1007 });
        match bucket.take_outcome() {
            Some(BridgeError::Startup(errors)) => assert_eq!(errors.0.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }
}
