/*
[INPUT]:  Subscribe/unsubscribe requests from consumers
[OUTPUT]: Instrument -> callback sets, membership transitions, fan-out delivery
[POS]:    Manager layer - subscription bookkeeping
[UPDATE]: When changing callback identity or delivery isolation
*/

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ticker_feed_adapter::TickerMessage;
use tracing::warn;

/// Consumer callback for ticker updates.
///
/// Callbacks run on the manager's worker task and must not block.
pub type TickerCallback = Arc<dyn Fn(&TickerMessage) + Send + Sync>;

/// Outcome of adding a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Membership {
    /// First subscriber for the instrument
    First,
    Joined,
    AlreadyRegistered,
}

/// Outcome of removing a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Departure {
    /// Last subscriber left; the instrument entry is gone
    Last,
    Left,
    NotRegistered,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: BTreeMap<String, Vec<TickerCallback>>,
}

impl SubscriptionRegistry {
    pub(crate) fn add(&mut self, instrument_id: &str, callback: TickerCallback) -> Membership {
        match self.entries.get_mut(instrument_id) {
            Some(callbacks) => {
                if callbacks.iter().any(|existing| same_callback(existing, &callback)) {
                    return Membership::AlreadyRegistered;
                }
                callbacks.push(callback);
                Membership::Joined
            }
            None => {
                self.entries.insert(instrument_id.to_string(), vec![callback]);
                Membership::First
            }
        }
    }

    pub(crate) fn remove(&mut self, instrument_id: &str, callback: &TickerCallback) -> Departure {
        let Some(callbacks) = self.entries.get_mut(instrument_id) else {
            return Departure::NotRegistered;
        };

        let before = callbacks.len();
        callbacks.retain(|existing| !same_callback(existing, callback));
        if callbacks.len() == before {
            return Departure::NotRegistered;
        }

        if callbacks.is_empty() {
            self.entries.remove(instrument_id);
            Departure::Last
        } else {
            Departure::Left
        }
    }

    /// Instruments with at least one callback, in stable order.
    pub(crate) fn active_instruments(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn subscriber_count(&self, instrument_id: &str) -> usize {
        self.entries.get(instrument_id).map_or(0, Vec::len)
    }

    /// Deliver to every callback for the instrument; returns how many ran cleanly.
    pub(crate) fn dispatch(&self, instrument_id: &str, message: &TickerMessage) -> usize {
        let Some(callbacks) = self.entries.get(instrument_id) else {
            return 0;
        };
        callbacks
            .iter()
            .filter(|callback| deliver(instrument_id, callback, message))
            .count()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run one callback, containing any panic it raises.
pub(crate) fn deliver(instrument_id: &str, callback: &TickerCallback, message: &TickerMessage) -> bool {
    let delivered = call_isolated(|| callback(message));
    if !delivered {
        warn!(%instrument_id, "ticker callback panicked");
    }
    delivered
}

pub(crate) fn call_isolated(f: impl FnOnce()) -> bool {
    panic::catch_unwind(AssertUnwindSafe(f)).is_ok()
}

fn same_callback(a: &TickerCallback, b: &TickerCallback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
