//! Delivery registry: correlates produce calls with their delivery reports.
//!
//! Producer call sites register a [`DeliveryContext`] and embed the returned
//! [`DeliveryToken`] in the native message. The dispatcher looks the token up
//! when the delivery report arrives; a lookup removes the entry, so each token
//! resolves at most once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::events::{Event, Opaque};
use crate::types::DeliveryToken;

/// Where a delivery report should go, plus the caller's opaque payload.
#[derive(Debug, Clone, Default)]
pub struct DeliveryContext {
    /// Private completion channel. `None` defers to the dispatch destination.
    pub completion: Option<mpsc::Sender<Event>>,
    pub opaque: Option<Opaque>,
}

impl DeliveryContext {
    pub fn new(completion: Option<mpsc::Sender<Event>>, opaque: Option<Opaque>) -> Self {
        Self { completion, opaque }
    }
}

/// Concurrent token → context table.
///
/// Tokens come from a monotonically increasing counter. Zero is never
/// issued, and a counter value whose entry is still pending is skipped.
#[derive(Debug)]
pub struct DeliveryRegistry {
    entries: DashMap<u64, DeliveryContext>,
    next: AtomicU64,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    /// Store a context and return the token that resolves it.
    pub fn register(&self, context: DeliveryContext) -> DeliveryToken {
        loop {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            let Some(token) = DeliveryToken::from_raw(raw) else {
                continue;
            };
            match self.entries.entry(raw) {
                Entry::Vacant(slot) => {
                    slot.insert(context);
                    return token;
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    /// Remove and return the context for `token`.
    ///
    /// Returns `None` for unknown tokens and for tokens already resolved.
    pub fn lookup(&self, token: DeliveryToken) -> Option<DeliveryContext> {
        self.entries.remove(&token.as_u64()).map(|(_, context)| context)
    }

    pub fn contains(&self, token: DeliveryToken) -> bool {
        self.entries.contains_key(&token.as_u64())
    }

    /// Deliveries still waiting for a report.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn rewind(&self, raw: u64) {
        self.next.store(raw, Ordering::Relaxed);
    }
}

impl Default for DeliveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
