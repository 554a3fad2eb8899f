use crate::stats::Counters;
use crate::topic::Subscriptions;
use crate::{ConnectionState, Error};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, broadcast, watch};
use tracing::info;

/// Capacity of the fault broadcast channel.
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// State visible to both the socket handle and its dispatcher.
#[derive(Debug)]
pub struct SocketShared {
    state: watch::Sender<ConnectionState>,
    pub counters: Counters,
    pub errors: broadcast::Sender<Error>,
    pub reconnect: Notify,
    pub last_fault: Mutex<Option<Error>>,
    pub subscriptions: RwLock<Subscriptions>,
}

impl SocketShared {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        Self {
            state,
            counters: Counters::default(),
            errors,
            reconnect: Notify::new(),
            last_fault: Mutex::new(None),
            subscriptions: RwLock::new(Subscriptions::default()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "socket state changed");
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Record a fault and tell every error observer.
    pub fn fault(&self, error: Error) {
        *self.last_fault.lock() = Some(error.clone());
        self.set_state(ConnectionState::Faulted);
        // No observers is fine.
        let _ = self.errors.send(error);
    }

    /// Report an error that does not fault the socket.
    pub fn report(&self, error: Error) {
        let _ = self.errors.send(error);
    }

    pub fn last_fault(&self) -> Option<Error> {
        self.last_fault.lock().clone()
    }
}
