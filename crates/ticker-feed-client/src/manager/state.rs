/*
[INPUT]:  Supervisor lifecycle transitions
[OUTPUT]: Current connection state, watch updates, listener callbacks
[POS]:    Manager layer - connection state broadcasting
[UPDATE]: When adding states or changing notification semantics
*/

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use super::registry::call_isolated;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler invoked on every connection state transition
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

pub(crate) struct StateBroadcaster {
    current: ConnectionState,
    watch_tx: watch::Sender<ConnectionState>,
    listeners: Vec<(u64, StateHandler)>,
}

impl StateBroadcaster {
    pub(crate) fn new(watch_tx: watch::Sender<ConnectionState>) -> Self {
        let current = *watch_tx.borrow();
        Self {
            current,
            watch_tx,
            listeners: Vec::new(),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.current
    }

    /// Move to `next`, notifying listeners. Returns false if already there.
    pub(crate) fn transition(&mut self, next: ConnectionState) -> bool {
        if next == self.current {
            return false;
        }
        info!(from = %self.current, to = %next, "connection state changed");
        self.current = next;
        self.watch_tx.send_replace(next);
        for (id, handler) in &self.listeners {
            notify(*id, handler, next);
        }
        true
    }

    /// Register a listener and immediately hand it the current state.
    pub(crate) fn add_listener(&mut self, id: u64, handler: StateHandler) {
        notify(id, &handler, self.current);
        self.listeners.push((id, handler));
    }

    pub(crate) fn remove_listener(&mut self, id: u64) {
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

fn notify(id: u64, handler: &StateHandler, state: ConnectionState) {
    if !call_isolated(|| handler(state)) {
        warn!(listener_id = id, %state, "state listener panicked");
    }
}
