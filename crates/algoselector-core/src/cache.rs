//! Keyed result cache with request de-duplication.
//!
//! [`ResultCache`] keeps the last successful result per [`CacheKey`]. It is the
//! only mutable state shared across stages, and it changes only through
//! [`ResultCache::get_or_fetch`], [`ResultCache::refresh`] and
//! [`ResultCache::invalidate`].
//!
//! # In-flight Fetches
//!
//! ```text
//!  caller A ──get_or_fetch(k)──► Vacant ──► Pending{flight 7} ──fetch()──► Ready(v)
//!  caller B ──get_or_fetch(k)──────────────► joins flight 7 ◄── watch ────┘
//! ```
//!
//! At most one fetch per key is outstanding. Callers arriving while it runs
//! wait on the same outcome. A failed fetch is handed to every waiter and is
//! not stored. If an entry is invalidated while its fetch is in flight, the
//! late result is returned to its callers but never stored. If the leading
//! caller is dropped mid-fetch, waiters start over and one of them leads.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Cached remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// The dataset recorded at upload time.
    Dataset,
    Profile,
    Recommendation,
    RunResult,
    Explanation,
    SystemStats,
    SystemLogs,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Profile => "profile",
            Self::Recommendation => "recommendation",
            Self::RunResult => "run_result",
            Self::Explanation => "explanation",
            Self::SystemStats => "system_stats",
            Self::SystemLogs => "system_logs",
        }
    }

    /// The first key parameter is a dataset id.
    pub fn is_dataset_scoped(&self) -> bool {
        !matches!(self, Self::SystemStats | Self::SystemLogs)
    }
}

/// Operation name plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: Operation,
    params: Vec<String>,
}

impl CacheKey {
    pub fn new<I, S>(operation: Operation, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operation,
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn dataset(dataset_id: &str) -> Self {
        Self::new(Operation::Dataset, [dataset_id])
    }

    /// An absent target is keyed as the empty string.
    pub fn profile(dataset_id: &str, target_column: Option<&str>) -> Self {
        Self::new(
            Operation::Profile,
            [dataset_id, target_column.unwrap_or_default()],
        )
    }

    pub fn recommendation(dataset_id: &str, target_column: &str) -> Self {
        Self::new(Operation::Recommendation, [dataset_id, target_column])
    }

    pub fn run_result(dataset_id: &str) -> Self {
        Self::new(Operation::RunResult, [dataset_id])
    }

    pub fn explanation(dataset_id: &str) -> Self {
        Self::new(Operation::Explanation, [dataset_id])
    }

    pub fn system_stats() -> Self {
        Self::new(Operation::SystemStats, Vec::<String>::new())
    }

    pub fn system_logs() -> Self {
        Self::new(Operation::SystemLogs, Vec::<String>::new())
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn dataset_id(&self) -> Option<&str> {
        if self.operation.is_dataset_scoped() {
            self.params.first().map(String::as_str)
        } else {
            None
        }
    }

    /// Predicate helper for [`ResultCache::invalidate`].
    pub fn belongs_to(&self, dataset_id: &str) -> bool {
        self.dataset_id() == Some(dataset_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation.as_str(), self.params.join(", "))
    }
}

type Value = Arc<dyn Any + Send + Sync>;
type Outcome = std::result::Result<Value, PipelineError>;
type OutcomeRx = watch::Receiver<Option<Outcome>>;

enum Slot {
    Ready(Value),
    Pending {
        flight: u64,
        outcome: OutcomeRx,
        /// Value replaced by a refresh, restored if the refresh fails.
        previous: Option<Value>,
    },
}

enum Lookup {
    Hit(Value),
    Join(OutcomeRx),
    Lead(u64, watch::Sender<Option<Outcome>>),
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Slot>,
    next_flight: u64,
    fetches: u64,
}

impl CacheState {
    fn lookup(&mut self, key: &CacheKey, bypass: bool) -> Lookup {
        match self.entries.get(key) {
            Some(Slot::Ready(value)) if !bypass => return Lookup::Hit(value.clone()),
            Some(Slot::Pending { outcome, .. }) => return Lookup::Join(outcome.clone()),
            _ => {}
        }

        let previous = match self.entries.remove(key) {
            Some(Slot::Ready(value)) => Some(value),
            _ => None,
        };
        self.next_flight += 1;
        self.fetches += 1;
        let (tx, rx) = watch::channel(None);
        self.entries.insert(
            key.clone(),
            Slot::Pending {
                flight: self.next_flight,
                outcome: rx,
                previous,
            },
        );
        Lookup::Lead(self.next_flight, tx)
    }

    /// Settle a flight. Returns false when the entry was invalidated meanwhile.
    fn settle(&mut self, key: &CacheKey, flight: u64, value: Option<Value>) -> bool {
        let owns_slot = matches!(
            self.entries.get(key),
            Some(Slot::Pending { flight: f, .. }) if *f == flight
        );
        if !owns_slot {
            return false;
        }

        let previous = match self.entries.remove(key) {
            Some(Slot::Pending { previous, .. }) => previous,
            _ => None,
        };
        if let Some(value) = value.or(previous) {
            self.entries.insert(key.clone(), Slot::Ready(value));
        }
        true
    }
}

/// Leader side of an in-flight fetch. Cleans up the pending slot if dropped
/// before completion.
struct Flight<'a> {
    cache: &'a ResultCache,
    key: CacheKey,
    id: u64,
    tx: watch::Sender<Option<Outcome>>,
    done: bool,
}

impl Flight<'_> {
    fn complete(mut self, outcome: Outcome) {
        let stored = self.cache.state.lock().settle(
            &self.key,
            self.id,
            outcome.as_ref().ok().cloned(),
        );
        if !stored {
            debug!(key = %self.key, "Discarding result of invalidated fetch");
        }
        self.done = true;
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.done {
            debug!(key = %self.key, "Fetch abandoned before completion");
            self.cache.state.lock().settle(&self.key, self.id, None);
        }
    }
}

/// Shared cache of the last successful result per key.
#[derive(Default)]
pub struct ResultCache {
    state: Mutex<CacheState>,
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResultCache")
            .field("entries", &state.entries.len())
            .field("fetches", &state.fetches)
            .finish()
    }
}

static_assertions::assert_impl_all!(ResultCache: Send, Sync);

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, or run `fetch` and cache its success.
    ///
    /// Joins an outstanding fetch for the same key instead of starting one.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: CacheKey, fetch: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.load(key, false, fetch).await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch) but ignores a cached value.
    ///
    /// An outstanding fetch is still joined. If the fetch fails, the value it
    /// was meant to replace stays cached.
    pub async fn refresh<T, F, Fut>(&self, key: CacheKey, fetch: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.load(key, true, fetch).await
    }

    async fn load<T, F, Fut>(&self, key: CacheKey, bypass: bool, fetch: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (id, tx) = loop {
            let lookup = self.state.lock().lookup(&key, bypass);
            match lookup {
                Lookup::Hit(value) => {
                    debug!(%key, "Cache hit");
                    return downcast(&key, &value);
                }
                Lookup::Join(mut rx) => {
                    debug!(%key, "Joining in-flight fetch");
                    match wait_outcome(&mut rx).await {
                        Some(Ok(value)) => return downcast(&key, &value),
                        Some(Err(err)) => return Err(err),
                        None => continue,
                    }
                }
                Lookup::Lead(id, tx) => break (id, tx),
            }
        };

        debug!(%key, bypass, "Cache miss, fetching");
        let flight = Flight {
            cache: self,
            key,
            id,
            tx,
            done: false,
        };

        match fetch().await {
            Ok(value) => {
                flight.complete(Ok(Arc::new(value.clone())));
                Ok(value)
            }
            Err(err) => {
                flight.complete(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Remove every entry whose key matches. Returns how many were removed.
    ///
    /// A fetch in flight for a removed key still answers its callers but its
    /// result is not stored.
    pub fn invalidate(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !predicate(key));
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(removed, "Invalidated cache entries");
        }
        removed
    }

    /// Remove every entry keyed by `dataset_id`.
    pub fn invalidate_dataset(&self, dataset_id: &str) -> usize {
        self.invalidate(|key| key.belongs_to(dataset_id))
    }

    pub fn invalidate_all(&self) -> usize {
        self.invalidate(|_| true)
    }

    /// The cached value for `key`, without fetching.
    pub fn peek<T: Clone + 'static>(&self, key: &CacheKey) -> Option<T> {
        match self.state.lock().entries.get(key) {
            Some(Slot::Ready(value)) => {
                let any: &(dyn Any + Send + Sync) = &**value;
                any.downcast_ref::<T>().cloned()
            }
            _ => None,
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        matches!(self.state.lock().entries.get(key), Some(Slot::Ready(_)))
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        matches!(
            self.state.lock().entries.get(key),
            Some(Slot::Pending { .. })
        )
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetches started since creation.
    pub fn fetch_count(&self) -> u64 {
        self.state.lock().fetches
    }
}

/// Wait for a flight's outcome. `None` means the leader went away without one.
async fn wait_outcome(rx: &mut OutcomeRx) -> Option<Outcome> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return Some(outcome);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

fn downcast<T: Clone + 'static>(key: &CacheKey, value: &Value) -> Result<T> {
    let any: &(dyn Any + Send + Sync) = &**value;
    any.downcast_ref::<T>().cloned().ok_or_else(|| {
        PipelineError::Decode(format!("cached value for {} has an unexpected type", key))
    })
}
