//! One-shot connectivity gate shared by the session and its pacers
//!
//! Exactly one writer (the session, observing connectivity changes) and any
//! number of waiters. The gate opens once, the first time `Connected` is
//! observed, and is never re-closed. Shutdown is a separate terminal signal
//! that also releases waiters which never saw the gate open.

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Waiting,
    Open,
    Shutdown,
}

/// What a waiter observed when it was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// Connectivity was established
    Open,
    /// The session is going away; stop immediately
    Shutdown,
}

/// Writer half of the connectivity gate
#[derive(Debug)]
pub struct ConnectivityGate {
    tx: watch::Sender<GateState>,
}

/// Reader half of the connectivity gate
#[derive(Debug, Clone)]
pub struct GateWaiter {
    rx: watch::Receiver<GateState>,
}

impl ConnectivityGate {
    /// Create a closed gate
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Waiting);
        Self { tx }
    }

    /// Create a waiter; waiters created after the gate opened see it open
    pub fn subscribe(&self) -> GateWaiter {
        GateWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Open the gate
    ///
    /// Returns `true` only for the call that actually opened it.
    pub fn fire(&self) -> bool {
        let fired = self.tx.send_if_modified(|state| {
            if *state == GateState::Waiting {
                *state = GateState::Open;
                true
            } else {
                false
            }
        });

        if fired {
            debug!("Connectivity gate opened");
        }

        fired
    }

    /// Whether the gate has been opened
    pub fn is_open(&self) -> bool {
        *self.tx.borrow() == GateState::Open
    }

    /// Release every waiter with [`GateSignal::Shutdown`]
    pub fn shutdown(&self) {
        let changed = self.tx.send_if_modified(|state| {
            if *state != GateState::Shutdown {
                *state = GateState::Shutdown;
                true
            } else {
                false
            }
        });

        if changed {
            debug!("Connectivity gate shut down");
        }
    }
}

impl Default for ConnectivityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectivityGate {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl GateWaiter {
    /// Wait until the gate opens or shuts down
    pub async fn wait_open(&mut self) -> GateSignal {
        loop {
            match *self.rx.borrow_and_update() {
                GateState::Open => return GateSignal::Open,
                GateState::Shutdown => return GateSignal::Shutdown,
                GateState::Waiting => {}
            }

            if self.rx.changed().await.is_err() {
                return GateSignal::Shutdown;
            }
        }
    }

    /// Wait until shutdown is signalled; cancel-safe
    pub async fn wait_shutdown(&mut self) {
        loop {
            if *self.rx.borrow_and_update() == GateState::Shutdown {
                return;
            }

            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether shutdown has been signalled
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow() == GateState::Shutdown
    }
}
