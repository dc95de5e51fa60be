//! Connection status tracking and single-flight handshake coordination.
//!
//! At most one handshake probe is in flight at a time. The first caller to
//! need one becomes the leader and publishes a settle signal; everyone else
//! joins by cloning the signal's receiver, so all joined callers observe
//! the same outcome of the same probe. Transitions and signal publication
//! happen inside one synchronous critical section; the lock is never held
//! across an await.

use std::sync::Mutex;

use tokio::sync::watch;

/// Connection status of the client with respect to its initial handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No handshake has been attempted yet
    NotConnected,
    /// A handshake probe is in flight
    Connecting,
    /// Handshake succeeded; server capabilities confirmed
    Connected,
    /// Server responded but does not recognize the handshake method
    /// (older server). Degraded but not an error.
    Unimplemented,
    /// Handshake failed with a connectivity or server error
    Failed,
}

/// How a caller participates in the current probe
#[derive(Debug)]
pub(crate) enum Role {
    /// State is already settled; no probe needed
    Settled(ConnectionStatus, Option<String>),
    /// A probe is in flight; await this signal
    Join(watch::Receiver<bool>),
    /// This caller starts the probe and must eventually settle it
    Lead(watch::Sender<bool>, watch::Receiver<bool>),
}

#[derive(Debug)]
struct Inner {
    status: ConnectionStatus,
    failure: Option<String>,
    settle: Option<watch::Receiver<bool>>,
}

/// Shared connection-state cell
#[derive(Debug)]
pub(crate) struct ConnectionState {
    inner: Mutex<Inner>,
}

impl ConnectionState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: ConnectionStatus::NotConnected,
                failure: None,
                settle: None,
            }),
        }
    }

    /// Current status and failure message, read atomically
    pub(crate) fn snapshot(&self) -> (ConnectionStatus, Option<String>) {
        let inner = self.inner.lock().expect("connection state lock poisoned");
        (inner.status, inner.failure.clone())
    }

    /// Current status
    pub(crate) fn status(&self) -> ConnectionStatus {
        self.snapshot().0
    }

    /// Decide this caller's role: return the settled outcome, join the
    /// in-flight probe, or lead a new one. Leading moves the state to
    /// Connecting and publishes the settle signal in the same step.
    pub(crate) fn begin_probe(&self) -> Role {
        let mut inner = self.inner.lock().expect("connection state lock poisoned");
        match inner.status {
            ConnectionStatus::Connected | ConnectionStatus::Unimplemented => {
                Role::Settled(inner.status, inner.failure.clone())
            }
            ConnectionStatus::Connecting => match &inner.settle {
                Some(rx) => Role::Join(rx.clone()),
                None => Self::lead(&mut inner),
            },
            ConnectionStatus::NotConnected | ConnectionStatus::Failed => Self::lead(&mut inner),
        }
    }

    fn lead(inner: &mut Inner) -> Role {
        let (tx, rx) = watch::channel(false);
        inner.status = ConnectionStatus::Connecting;
        inner.failure = None;
        inner.settle = Some(rx.clone());
        Role::Lead(tx, rx)
    }

    /// Record the probe outcome and wake every joined caller. Status,
    /// failure and the signal update in one critical section so no joiner
    /// can observe a half-applied transition.
    pub(crate) fn settle(
        &self,
        status: ConnectionStatus,
        failure: Option<String>,
        tx: watch::Sender<bool>,
    ) {
        let mut inner = self.inner.lock().expect("connection state lock poisoned");
        inner.status = status;
        inner.failure = failure;
        inner.settle = None;
        let _ = tx.send(true);
    }

    /// The in-flight settle signal, if a probe is currently running.
    /// Ordinary calls use this to wait out a handshake without starting one.
    pub(crate) fn join_signal(&self) -> Option<watch::Receiver<bool>> {
        let inner = self.inner.lock().expect("connection state lock poisoned");
        match inner.status {
            ConnectionStatus::Connecting => inner.settle.clone(),
            _ => None,
        }
    }

    /// Forget a settled outcome so the next `begin_probe` leads a fresh
    /// handshake. A probe already in flight is left alone.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock().expect("connection state lock poisoned");
        if inner.status != ConnectionStatus::Connecting {
            inner.status = ConnectionStatus::NotConnected;
            inner.failure = None;
        }
    }
}

/// Wait until the probe behind this signal settles. Returns immediately if
/// it already has; tolerates the sender going away.
pub(crate) async fn wait_settled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
