// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Correlation store implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant};

use crate::common::exchange_error::ExchangeError;
use crate::context::TestContext;

/// Default bound on unclaimed entries; the oldest entry is evicted when it
/// is exceeded.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Decouples "a reply arrived" from "someone is waiting for it".
///
/// One manager is shared by every exchange on an endpoint. `store` and
/// `find` are linearizable per key: a `find` starting after a `store` for
/// the same key completed is guaranteed to observe it. No ordering holds
/// between distinct keys.
#[async_trait]
pub trait CorrelationManager<T>: Send + Sync
where
    T: Send,
{
    /// Binds `key` under `key_name` in the caller's context. No transport
    /// interaction.
    fn save_key(&self, key_name: &str, key: &str, context: &TestContext);

    /// Looks up the key bound under `key_name`.
    ///
    /// # Errors
    /// [`ExchangeError`] of kind
    /// [`CorrelationKeyMissing`](crate::common::exchange_error::ExchangeErrorKind::CorrelationKeyMissing)
    /// if no key was ever bound, i.e. no matching send preceded this call.
    fn lookup_key(&self, key_name: &str, context: &TestContext) -> Result<String, ExchangeError>;

    /// Records an arrived reply under `key`. Storing under a key whose
    /// previous exchange has not been retrieved yet overwrites the entry;
    /// which reply a concurrent waiter observes is unspecified (key reuse
    /// before resolution is a caller error).
    fn store(&self, key: String, item: T);

    /// Waits until an entry for `key` appears or `timeout` elapses (`None`
    /// waits indefinitely). A successful find removes the entry, so each
    /// reply is delivered at most once. Absence after the timeout is a
    /// normal result, not an error.
    async fn find(&self, key: &str, timeout: Option<Duration>) -> Option<T>;
}

struct StoreState<T> {
    items: HashMap<String, T>,
    // Insertion order of the keys currently in `items`, for eviction.
    order: VecDeque<String>,
}

/// In-memory [`CorrelationManager`] that polls for entries at a fixed
/// interval.
///
/// Polling trades a bounded amount of added latency (at most one interval)
/// for simplicity; the interval must stay short relative to the timeouts in
/// use.
pub struct PollingCorrelationStore<T> {
    state: Mutex<StoreState<T>>,
    polling_interval: Duration,
    capacity: usize,
    pending_message: String,
}

impl<T> PollingCorrelationStore<T> {
    /// Creates a store polling at `polling_interval`. `pending_message` is
    /// logged on every poll miss while a waiter is blocked.
    #[must_use]
    pub fn new(polling_interval: Duration, pending_message: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                items: HashMap::new(),
                order: VecDeque::new(),
            }),
            polling_interval,
            capacity: DEFAULT_CAPACITY,
            pending_message: pending_message.into(),
        }
    }

    /// Overrides the bound on unclaimed entries.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn take(&self, key: &str) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        let item = state.items.remove(key)?;
        state.order.retain(|k| k != key);
        Some(item)
    }
}

#[async_trait]
impl<T> CorrelationManager<T> for PollingCorrelationStore<T>
where
    T: Send,
{
    fn save_key(&self, key_name: &str, key: &str, context: &TestContext) {
        log::debug!("binding correlation key '{key}' under '{key_name}'");
        context.set_variable(key_name, key);
    }

    fn lookup_key(&self, key_name: &str, context: &TestContext) -> Result<String, ExchangeError> {
        context
            .variable(key_name)
            .ok_or_else(|| ExchangeError::new_correlation_key_missing_error(key_name, None))
    }

    fn store(&self, key: String, item: T) {
        let mut state = self.state.lock().unwrap();
        if state.items.insert(key.clone(), item).is_some() {
            log::warn!("correlation key '{key}' reused before its previous reply was retrieved");
            state.order.retain(|k| k != &key);
        }
        state.order.push_back(key);
        while state.items.len() > self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.items.remove(&oldest);
            log::warn!("evicting unclaimed reply for correlation key '{oldest}'");
        }
    }

    async fn find(&self, key: &str, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(item) = self.take(key) {
                return Some(item);
            }
            let sleep = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.polling_interval.min(deadline - now)
                }
                None => self.polling_interval,
            };
            log::debug!("{} - next poll in {:?}", self.pending_message, sleep);
            time::sleep(sleep).await;
        }
    }
}
