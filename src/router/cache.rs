//! Per-route response reuse.
//!
//! A route declared with a cache rate of `n` keeps its last successful
//! response and serves it to the next `n` requests that bind the same
//! parameters, without calling the handler. The handler runs again once the
//! reuses are spent or the parameters differ.

use std::sync::{Mutex, PoisonError};

use super::ParamVec;
use crate::dispatcher::HandlerResponse;

struct Entry {
    key: ParamVec,
    response: HandlerResponse,
    remaining: u32,
}

/// Single-entry response cache owned by one route.
pub struct ResponseCache {
    rate: u32,
    slot: Mutex<Option<Entry>>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    #[must_use]
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            slot: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Cached response for these parameters. Consumes one reuse.
    pub fn lookup(&self, key: &ParamVec) -> Option<HandlerResponse> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = slot.as_mut()?;
        if entry.key != *key || entry.remaining == 0 {
            return None;
        }
        entry.remaining -= 1;
        Some(entry.response.clone())
    }

    /// Replace the cached response.
    pub fn store(&self, key: ParamVec, response: HandlerResponse) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Entry {
            key,
            response,
            remaining: self.rate,
        });
    }
}
