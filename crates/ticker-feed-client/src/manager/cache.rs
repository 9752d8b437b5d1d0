/*
[INPUT]:  Routed ticker updates
[OUTPUT]: Most recent message per instrument for late subscribers
[POS]:    Manager layer - last-value cache
[UPDATE]: When changing cache retention
*/

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use ticker_feed_adapter::TickerMessage;

/// Single-slot-per-instrument store of the latest update.
///
/// Written only by the manager's worker; readable from any handle.
#[derive(Debug, Clone, Default)]
pub struct LastValueCache {
    inner: Arc<RwLock<HashMap<String, TickerMessage>>>,
}

impl LastValueCache {
    pub fn get(&self, instrument_id: &str) -> Option<TickerMessage> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instrument_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn insert(&self, instrument_id: &str, message: TickerMessage) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instrument_id.to_string(), message);
    }

    pub(crate) fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
