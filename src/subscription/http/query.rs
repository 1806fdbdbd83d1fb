//! The query cache and the [`Query`] subscription views bind to.
//!
//! [`QueryClient`] is the single owner of cached server state. Every read goes
//! through it, which gives all views identical semantics:
//!
//! 1. A fresh entry is served from memory without touching the network.
//! 2. A missing or stale entry triggers one fetch; concurrent readers of the
//!    same key share it instead of issuing duplicates.
//! 3. Every fetch is versioned. Only the most recently *issued* fetch may write
//!    its result, so a slow response can never overwrite a newer one.
//! 4. A failed fetch records the error but keeps the last good data.
//! 5. Every write is broadcast, and [`Query`] subscriptions re-emit the new
//!    state to their views.
//!
//! # Example
//!
//! ```rust,no_run
//! use govai_query::subscription::http::{QueryClient, QueryKey, QueryOptions};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), govai_query::QueryError> {
//! let client = QueryClient::new();
//! let key = QueryKey::new(["evaluations", "stale-count"]);
//!
//! let count: u64 = client
//!     .fetch_query(&key, QueryOptions::stale_after(Duration::from_secs(10)), || {
//!         Box::pin(async { Ok(3_u64) })
//!     })
//!     .await?;
//!
//! // After a related write:
//! client.invalidate(&QueryKey::new(["evaluations"]));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt, TryFutureExt};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::QueryError;
use crate::command::Command;
use crate::subscription::{SubscriptionId, SubscriptionSource};

use super::cache::{CacheEntry, EntrySnapshot, ErasedData, ErasedFetcher, InFlight, QueryStatus};
use super::config::{QueryConfig, QueryOptions};
use super::key::QueryKey;

/// What happened to a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// Data, error or status changed.
    Updated,
    /// The entry was marked as requiring a refetch.
    Invalidated,
    /// The entry was garbage collected or removed.
    Removed,
}

/// Notification broadcast for every cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub kind: CacheEventKind,
}

/// A typed, point-in-time copy of a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T> {
    pub data: Option<T>,
    pub error: Option<QueryError>,
    pub status: QueryStatus,
    pub is_stale: bool,
    pub is_invalidated: bool,
    pub is_fetching: bool,
    pub updated_at: Option<Instant>,
    pub subscribers: usize,
}

/// The state of a query result as seen by a view.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    /// Query is loading and there is no data yet.
    Loading,
    /// Query succeeded with data.
    Success {
        /// The data returned by the query.
        data: T,
        /// Whether the data is stale and is being or will be refetched.
        is_stale: bool,
    },
    /// The last fetch failed.
    Error {
        error: QueryError,
        /// Data from the last successful fetch, if any.
        stale_data: Option<T>,
    },
}

/// A query result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    /// The current state of the query.
    pub state: QueryState<T>,
    /// Whether a fetch for this key is in flight.
    pub is_fetching: bool,
}

impl<T> QueryResult<T> {
    /// Returns the best available data: fresh, stale, or kept from before an error.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            QueryState::Success { data, .. } => Some(data),
            QueryState::Error {
                stale_data: Some(data),
                ..
            } => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the last fetch failed.
    pub const fn error(&self) -> Option<&QueryError> {
        match &self.state {
            QueryState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if the query is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, QueryState::Loading)
    }

    /// Returns `true` if the query succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, QueryState::Success { .. })
    }

    /// Returns `true` if the query failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, QueryState::Error { .. })
    }

    /// Returns `true` if the query data is stale.
    pub const fn is_stale(&self) -> bool {
        matches!(self.state, QueryState::Success { is_stale: true, .. })
    }

    fn from_snapshot(snapshot: QuerySnapshot<T>) -> Self {
        let state = match (snapshot.status, snapshot.data) {
            (QueryStatus::Error, stale_data) => QueryState::Error {
                error: snapshot
                    .error
                    .unwrap_or_else(|| QueryError::Network("unknown failure".to_string())),
                stale_data,
            },
            (_, Some(data)) => QueryState::Success {
                data,
                is_stale: snapshot.is_stale,
            },
            (_, None) => QueryState::Loading,
        };
        Self {
            state,
            is_fetching: snapshot.is_fetching,
        }
    }
}

/// Releases a key's subscription when dropped.
///
/// While at least one guard for a key is alive its entry is never collected
/// and invalidations refetch it immediately.
pub struct SubscriptionGuard {
    client: QueryClient,
    key: QueryKey,
}

impl SubscriptionGuard {
    /// The key this guard subscribes to.
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.client.release(&self.key);
    }
}

enum Read {
    Fresh(ErasedData),
    Pending(InFlight),
}

/// A client for managing the query cache and invalidation.
///
/// Cloning is cheap; clones share the same cache. Create one per process and
/// hand clones to every view.
///
/// # Example
///
/// ```rust
/// use govai_query::subscription::http::{QueryClient, QueryConfig};
/// use std::time::Duration;
///
/// let config = QueryConfig::new(
///     Duration::from_secs(30),  // stale_time
///     Duration::from_secs(300), // cache_time
/// );
///
/// let client = QueryClient::with_config(config);
/// assert!(client.is_empty());
/// ```
#[derive(Clone)]
pub struct QueryClient {
    cache: Arc<DashMap<QueryKey, CacheEntry>>,
    events: broadcast::Sender<CacheEvent>,
    versions: Arc<AtomicU64>,
    config: QueryConfig,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.cache.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueryClient {
    /// Creates a new query client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new query client with the given configuration.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            cache: Arc::new(DashMap::new()),
            events,
            versions: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Gets the query configuration.
    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Subscribes to cache events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Returns the data for `key`, fetching it if missing or stale.
    ///
    /// A fetch already in flight for `key` is joined rather than duplicated.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error, or [`QueryError::TypeMismatch`] if `key`
    /// caches a different type.
    pub async fn fetch_query<T, F>(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
    {
        self.read(key, options, erase_fetcher(fetcher), false).await
    }

    /// Issues a new fetch for `key` regardless of freshness.
    ///
    /// The new fetch supersedes any fetch in flight: whichever order the two
    /// responses arrive in, the cache ends up with this one's result.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error, or [`QueryError::TypeMismatch`].
    pub async fn refetch<T, F>(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
    {
        self.read(key, options, erase_fetcher(fetcher), true).await
    }

    async fn read<T: Clone + 'static>(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        fetcher: ErasedFetcher,
        force: bool,
    ) -> Result<T, QueryError> {
        let read = self.begin_read(key, options, fetcher, force);
        let data = match read {
            Read::Fresh(data) => data,
            Read::Pending(in_flight) => in_flight.await?,
        };
        downcast(key, &data)
    }

    fn begin_read(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        fetcher: ErasedFetcher,
        force: bool,
    ) -> Read {
        let stale_time = options.resolve_stale_time(&self.config);
        let mut entry = self
            .cache
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(stale_time));
        entry.stale_time = stale_time;
        entry.fetcher = Some(fetcher.clone());
        if entry.subscribers == 0 {
            // Reads without a view still count as use
            entry.idle_since = Some(Instant::now());
        }

        if !force {
            if !entry.is_stale()
                && let Some(data) = &entry.data
            {
                return Read::Fresh(data.clone());
            }
            if let Some((_, in_flight)) = &entry.in_flight {
                debug!(key = %key, "joining in-flight fetch");
                return Read::Pending(in_flight.clone());
            }
        }

        Read::Pending(self.issue(key, &mut entry, fetcher))
    }

    /// Starts a fetch on a spawned task and records it as the newest version.
    ///
    /// The task outlives every reader, so an unmounted view does not abort it.
    fn issue(&self, key: &QueryKey, entry: &mut CacheEntry, fetcher: ErasedFetcher) -> InFlight {
        let version = self.versions.fetch_add(1, Ordering::Relaxed) + 1;
        entry.issued = version;
        if entry.data.is_none() {
            entry.status = QueryStatus::Loading;
        }
        debug!(key = %key, version, "issuing fetch");

        let client = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = fetcher().await;
            client.complete(&task_key, version, &result);
            result
        });

        let in_flight = async move {
            task.await
                .unwrap_or_else(|e| Err(QueryError::Network(format!("fetch task failed: {e}"))))
        }
        .boxed()
        .shared();

        entry.in_flight = Some((version, in_flight.clone()));
        in_flight
    }

    fn complete(&self, key: &QueryKey, version: u64, result: &Result<ErasedData, QueryError>) {
        {
            let Some(mut entry) = self.cache.get_mut(key) else {
                debug!(key = %key, version, "discarding result for collected entry");
                return;
            };
            if entry.in_flight.as_ref().is_some_and(|(v, _)| *v == version) {
                entry.in_flight = None;
            }
            if entry.issued != version {
                debug!(key = %key, version, newest = entry.issued, "discarding superseded result");
                self.schedule_collect(key, &mut entry);
                return;
            }
            let outdated = entry.predates_invalidation(version);
            match result {
                Ok(data) => {
                    entry.record_success(data.clone());
                    // Stays invalidated if the invalidation landed after this fetch was issued
                    entry.invalidated = outdated;
                }
                Err(error) => {
                    warn!(key = %key, version, %error, "fetch failed");
                    entry.record_error(error.clone());
                }
            }
            if outdated
                && result.is_ok()
                && entry.subscribers > 0
                && let Some(fetcher) = entry.fetcher.clone()
            {
                debug!(key = %key, version, "result predates invalidation, refetching");
                let _ = self.issue(key, &mut entry, fetcher);
            }
            self.schedule_collect(key, &mut entry);
        }
        self.notify(key, CacheEventKind::Updated);
    }

    fn notify(&self, key: &QueryKey, kind: CacheEventKind) {
        // No receivers is fine: nobody is watching
        let _ = self.events.send(CacheEvent {
            key: key.clone(),
            kind,
        });
    }

    /// Invalidates every entry whose key starts with `prefix`.
    ///
    /// Invalidated entries refetch on their next read. Entries with live
    /// subscribers refetch immediately; if a fetch is already in flight, they
    /// refetch once it lands instead. Invalidating an already invalidated
    /// entry does nothing.
    ///
    /// Returns the number of entries that were newly invalidated.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        self.keys_matching(prefix)
            .iter()
            .filter(|key| self.invalidate_exact(key))
            .count()
    }

    /// Invalidates a single entry. Returns `true` if it was newly invalidated.
    pub fn invalidate_exact(&self, key: &QueryKey) -> bool {
        {
            let Some(mut entry) = self.cache.get_mut(key) else {
                return false;
            };
            if !entry.mark_stale(self.versions.load(Ordering::Relaxed)) {
                return false;
            }
            if entry.subscribers > 0 && !entry.is_fetching() && Handle::try_current().is_ok() {
                if let Some(fetcher) = entry.fetcher.clone() {
                    let _ = self.issue(key, &mut entry, fetcher);
                }
            }
        }
        debug!(key = %key, "invalidated");
        self.notify(key, CacheEventKind::Invalidated);
        true
    }

    /// Invalidates every entry.
    pub fn invalidate_all(&self) -> usize {
        self.invalidate(&QueryKey::from_parts([]))
    }

    /// Returns a command that invalidates `prefix` when run and produces no messages.
    pub fn invalidate_command<Msg: Send + 'static>(&self, prefix: QueryKey) -> Command<Msg> {
        let client = self.clone();
        Command::stream(
            stream::once(async move {
                client.invalidate(&prefix);
            })
            .filter_map(|()| async { None }),
        )
    }

    /// Refetches stale entries that have subscribers, as when the app regains focus.
    ///
    /// Returns the number of fetches issued. Does nothing when
    /// [`QueryConfig::refetch_on_focus`] is off.
    pub fn focus_gained(&self) -> usize {
        if !self.config.refetch_on_focus || Handle::try_current().is_err() {
            return 0;
        }
        let candidates: Vec<QueryKey> = self
            .cache
            .iter()
            .filter(|e| e.subscribers > 0 && e.is_stale() && !e.is_fetching())
            .map(|e| e.key().clone())
            .collect();

        let mut issued = 0;
        for key in candidates {
            if let Some(mut entry) = self.cache.get_mut(&key)
                && !entry.is_fetching()
                && let Some(fetcher) = entry.fetcher.clone()
            {
                let _ = self.issue(&key, &mut entry, fetcher);
                issued += 1;
            }
        }
        issued
    }

    /// Registers a subscriber for `key`, creating an idle entry if needed.
    #[must_use]
    pub fn subscribe(&self, key: &QueryKey) -> SubscriptionGuard {
        self.cache
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(self.config.stale_time))
            .subscribe();
        SubscriptionGuard {
            client: self.clone(),
            key: key.clone(),
        }
    }

    /// Subscribes and starts a fetch when the entry is missing, invalidated,
    /// or stale with `refetch_on_mount` enabled.
    pub(crate) fn mount(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        fetcher: ErasedFetcher,
    ) -> SubscriptionGuard {
        let stale_time = options.resolve_stale_time(&self.config);
        {
            let mut entry = self
                .cache
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(stale_time));
            entry.subscribe();
            entry.stale_time = stale_time;
            entry.fetcher = Some(fetcher.clone());

            let wanted = entry.data.is_none()
                || entry.invalidated
                || (self.config.refetch_on_mount && entry.is_stale());
            if wanted && !entry.is_fetching() {
                let _ = self.issue(key, &mut entry, fetcher);
            }
        }
        SubscriptionGuard {
            client: self.clone(),
            key: key.clone(),
        }
    }

    fn release(&self, key: &QueryKey) {
        if let Some(mut entry) = self.cache.get_mut(key)
            && entry.unsubscribe()
        {
            self.schedule_collect(key, &mut entry);
        }
    }

    /// Arms a delayed collection for an entry nobody subscribes to.
    ///
    /// Collection is deferred by `cache_time` so a quick re-mount reuses the
    /// data. At most one task is pending per entry; a task that finds the
    /// entry subscribed or fetching stops, and `release` or `complete` arm it
    /// again.
    fn schedule_collect(&self, key: &QueryKey, entry: &mut CacheEntry) {
        if entry.subscribers > 0 || entry.collect_scheduled {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        entry.collect_scheduled = true;
        handle.spawn(self.clone().collect_when_idle(key.clone()));
    }

    async fn collect_when_idle(self, key: QueryKey) {
        let cache_time = self.config.cache_time;
        let mut delay = cache_time;
        loop {
            tokio::time::sleep(delay).await;
            let remaining = {
                let Some(mut entry) = self.cache.get_mut(&key) else {
                    return;
                };
                if entry.subscribers > 0 || entry.is_fetching() {
                    entry.collect_scheduled = false;
                    return;
                }
                let since = *entry.idle_since.get_or_insert_with(Instant::now);
                cache_time.saturating_sub(since.elapsed())
            };
            if remaining.is_zero() && self.collect(&key) {
                return;
            }
            // Used again since the timer was armed
            delay = remaining;
        }
    }

    /// Removes `key` if it has been idle for at least `cache_time`.
    pub fn collect(&self, key: &QueryKey) -> bool {
        let cache_time = self.config.cache_time;
        let removed = self
            .cache
            .remove_if(key, |_, entry| entry.should_gc(cache_time))
            .is_some();
        if removed {
            debug!(key = %key, "collected idle entry");
            self.notify(key, CacheEventKind::Removed);
        }
        removed
    }

    /// Collects every idle entry past its grace period. Returns how many were removed.
    pub fn gc(&self) -> usize {
        let cache_time = self.config.cache_time;
        let idle: Vec<QueryKey> = self
            .cache
            .iter()
            .filter(|e| e.should_gc(cache_time))
            .map(|e| e.key().clone())
            .collect();
        idle.iter().filter(|key| self.collect(key)).count()
    }

    /// Removes `key` unconditionally.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = self.cache.remove(key).is_some();
        if removed {
            self.notify(key, CacheEventKind::Removed);
        }
        removed
    }

    /// Gets the cached data for `key`, if present and of type `T`.
    #[must_use]
    pub fn get_query_data<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        self.cache
            .get(key)
            .and_then(|entry| entry.data.as_ref()?.downcast_ref::<T>().cloned())
    }

    /// Writes `data` for `key` as if it had just been fetched.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, data: T) {
        {
            let mut entry = self
                .cache
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(self.config.stale_time));
            entry.record_success(Arc::new(data));
            self.schedule_collect(key, &mut entry);
        }
        self.notify(key, CacheEventKind::Updated);
    }

    /// Edits the cached data for `key` in place.
    ///
    /// Returns `Ok(false)` when there is nothing cached to edit.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TypeMismatch`] if `key` caches a different type.
    pub fn update_query_data<T, F>(&self, key: &QueryKey, f: F) -> Result<bool, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&mut T),
    {
        {
            let Some(mut entry) = self.cache.get_mut(key) else {
                return Ok(false);
            };
            let Some(data) = &entry.data else {
                return Ok(false);
            };
            let mut value: T = downcast(key, data)?;
            f(&mut value);
            entry.replace_data(Arc::new(value));
        }
        self.notify(key, CacheEventKind::Updated);
        Ok(true)
    }

    /// Returns a typed copy of the entry for `key`.
    ///
    /// `None` if the key is not cached or caches a different type.
    #[must_use]
    pub fn snapshot<T: Clone + 'static>(&self, key: &QueryKey) -> Option<QuerySnapshot<T>> {
        self.typed_snapshot(key).and_then(Result::ok)
    }

    fn typed_snapshot<T: Clone + 'static>(
        &self,
        key: &QueryKey,
    ) -> Option<Result<QuerySnapshot<T>, QueryError>> {
        let entry = self.cache.get(key)?;
        let data = match &entry.data {
            Some(data) => match downcast(key, data) {
                Ok(value) => Some(value),
                Err(e) => return Some(Err(e)),
            },
            None => None,
        };
        Some(Ok(QuerySnapshot {
            data,
            error: entry.error.clone(),
            status: entry.status,
            is_stale: entry.is_stale(),
            is_invalidated: entry.invalidated,
            is_fetching: entry.is_fetching(),
            updated_at: entry.updated_at,
            subscribers: entry.subscribers,
        }))
    }

    /// Returns the view-facing result for `key`.
    #[must_use]
    pub fn query_result<T: Clone + 'static>(&self, key: &QueryKey) -> QueryResult<T> {
        match self.typed_snapshot(key) {
            Some(Ok(snapshot)) => QueryResult::from_snapshot(snapshot),
            Some(Err(error)) => QueryResult {
                state: QueryState::Error {
                    error,
                    stale_data: None,
                },
                is_fetching: false,
            },
            None => QueryResult {
                state: QueryState::Loading,
                is_fetching: false,
            },
        }
    }

    pub(crate) fn keys_matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.cache
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Keys under `prefix` whose cached `T` satisfies `predicate`.
    pub(crate) fn keys_where<T: 'static>(
        &self,
        prefix: &QueryKey,
        predicate: impl Fn(&T) -> bool,
    ) -> Vec<QueryKey> {
        self.cache
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .filter(|e| {
                e.data
                    .as_ref()
                    .and_then(|data| data.downcast_ref::<T>())
                    .is_some_and(&predicate)
            })
            .map(|e| e.key().clone())
            .collect()
    }

    /// Applies `patch` to the data of `key` as a provisional value.
    ///
    /// Supersedes any fetch in flight so its response cannot overwrite the
    /// patch. Returns the prior state, or `None` if nothing was patched.
    pub(crate) fn patch_entry(
        &self,
        key: &QueryKey,
        patch: &(dyn Fn(&ErasedData) -> Option<ErasedData> + Send + Sync),
    ) -> Option<EntrySnapshot> {
        let snapshot = {
            let mut entry = self.cache.get_mut(key)?;
            let patched = patch(entry.data.as_ref()?)?;
            let snapshot = entry.snapshot();
            entry.issued = self.versions.fetch_add(1, Ordering::Relaxed) + 1;
            entry.in_flight = None;
            entry.replace_data(patched);
            snapshot
        };
        self.notify(key, CacheEventKind::Updated);
        Some(snapshot)
    }

    /// Puts back the state captured by [`patch_entry`](Self::patch_entry).
    ///
    /// The patch superseded any fetch in flight, so a subscribed entry that
    /// was invalidated before the patch refetches now.
    pub(crate) fn restore_entry(&self, key: &QueryKey, snapshot: EntrySnapshot) {
        {
            let Some(mut entry) = self.cache.get_mut(key) else {
                return;
            };
            entry.restore(snapshot);
            if entry.invalidated
                && entry.subscribers > 0
                && !entry.is_fetching()
                && Handle::try_current().is_ok()
                && let Some(fetcher) = entry.fetcher.clone()
            {
                debug!(key = %key, "refetching restored invalidated entry");
                let _ = self.issue(key, &mut entry, fetcher);
            }
            self.schedule_collect(key, &mut entry);
        }
        self.notify(key, CacheEventKind::Updated);
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn erase_fetcher<T, F>(fetcher: F) -> ErasedFetcher
where
    T: Send + Sync + 'static,
    F: Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync + 'static,
{
    Arc::new(move || {
        fetcher()
            .map_ok(|data| Arc::new(data) as ErasedData)
            .boxed()
    })
}

fn downcast<T: Clone + 'static>(key: &QueryKey, data: &ErasedData) -> Result<T, QueryError> {
    data.downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| QueryError::TypeMismatch {
            key: key.to_string(),
        })
}

/// A query subscription that monitors and fetches data with caching.
///
/// When subscribed ("mounted"):
///
/// 1. The current state is emitted immediately (`Loading` or cached data)
/// 2. If data is missing, invalidated or stale, one shared fetch is started
/// 3. Every later change to the entry, including fetches started by other
///    views and optimistic patches, is re-emitted
///
/// Dropping the stream unmounts: the subscriber count drops and the entry
/// becomes eligible for collection after the configured cache time.
///
/// # Example
///
/// ```rust,ignore
/// use govai_query::subscription::{Subscription, http::{Query, QueryClient, QueryKey}};
///
/// let client = QueryClient::new();
///
/// let query = Subscription::new(Query::new(
///     QueryKey::new(["company", "me"]),
///     move || Box::pin(api.get_company()),
///     client.clone(),
/// ))
/// .map(Message::Company);
/// ```
pub struct Query<V> {
    key: QueryKey,
    options: QueryOptions,
    fetcher: ErasedFetcher,
    client: QueryClient,
    _value: PhantomData<fn() -> V>,
}

impl<V> Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new query with the given key, fetcher, and client.
    pub fn new<F>(key: QueryKey, fetcher: F, client: QueryClient) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync + 'static,
    {
        Self {
            key,
            options: QueryOptions::default(),
            fetcher: erase_fetcher(fetcher),
            client,
            _value: PhantomData,
        }
    }

    /// Overrides the client's defaults for this query.
    #[must_use]
    pub const fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// The key this query reads.
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Reads the value through the cache without subscribing.
    ///
    /// Same semantics as [`QueryClient::fetch_query`].
    ///
    /// # Errors
    ///
    /// Returns the fetch error, or [`QueryError::TypeMismatch`].
    pub async fn fetch(&self) -> Result<V, QueryError> {
        self.client
            .read(&self.key, self.options, self.fetcher.clone(), false)
            .await
    }

    /// Forces a new fetch, as [`QueryClient::refetch`] does.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, or [`QueryError::TypeMismatch`].
    pub async fn refetch(&self) -> Result<V, QueryError> {
        self.client
            .read(&self.key, self.options, self.fetcher.clone(), true)
            .await
    }
}

impl<V> SubscriptionSource for Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = QueryResult<V>;

    fn stream(&self) -> BoxStream<'static, Self::Output> {
        let key = self.key.clone();
        let options = self.options;
        let fetcher = self.fetcher.clone();
        let client = self.client.clone();

        stream::unfold(State::Mount, move |state| {
            let key = key.clone();
            let fetcher = fetcher.clone();
            let client = client.clone();

            async move {
                match state {
                    State::Mount => {
                        // Listen before mounting so the fetch result cannot be missed
                        let rx = client.events();
                        let guard = client.mount(&key, options, fetcher);
                        let result = client.query_result::<V>(&key);
                        Some((result, State::Watching { rx, guard }))
                    }

                    State::Watching { mut rx, guard } => loop {
                        match rx.recv().await {
                            Ok(event) if event.key == key => {
                                let result = client.query_result::<V>(&key);
                                return Some((result, State::Watching { rx, guard }));
                            }
                            Ok(_) => {
                                // Different key, keep waiting
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(key = %key, skipped, "query subscription lagged");
                                let result = client.query_result::<V>(&key);
                                return Some((result, State::Watching { rx, guard }));
                            }
                            Err(RecvError::Closed) => return None,
                        }
                    },
                }
            }
        })
        .boxed()
    }

    fn id(&self) -> SubscriptionId {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        SubscriptionId::of::<Self>(hasher.finish())
    }
}

impl<V> Hash for Query<V> {
    fn hash<H>(&self, hasher: &mut H)
    where
        H: std::hash::Hasher,
    {
        self.key.hash(hasher);
    }
}

/// Internal state machine for the Query subscription.
enum State {
    Mount,
    Watching {
        rx: broadcast::Receiver<CacheEvent>,
        guard: SubscriptionGuard,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn fresh_client() -> QueryClient {
        QueryClient::with_config(QueryConfig::new(
            Duration::from_secs(60),
            Duration::from_secs(300),
        ))
    }

    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
        value: i32,
    ) -> impl Fn() -> BoxFuture<'static, Result<i32, QueryError>> + Send + Sync + 'static {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(value)
            })
        }
    }

    #[test]
    fn test_query_result_data() {
        let result = QueryResult {
            state: QueryState::Success {
                data: 42,
                is_stale: false,
            },
            is_fetching: false,
        };
        assert_eq!(result.data(), Some(&42));

        let result: QueryResult<i32> = QueryResult {
            state: QueryState::Loading,
            is_fetching: true,
        };
        assert_eq!(result.data(), None);

        let result = QueryResult {
            state: QueryState::Error {
                error: QueryError::Network("down".to_string()),
                stale_data: Some(7),
            },
            is_fetching: false,
        };
        assert_eq!(result.data(), Some(&7));
        assert!(result.is_error());
        assert_eq!(
            result.error(),
            Some(&QueryError::Network("down".to_string()))
        );
    }

    #[test]
    fn test_query_result_predicates() {
        let loading: QueryResult<i32> = QueryResult {
            state: QueryState::Loading,
            is_fetching: true,
        };
        assert!(loading.is_loading());
        assert!(!loading.is_success());
        assert!(!loading.is_error());
        assert!(!loading.is_stale());

        let stale = QueryResult {
            state: QueryState::Success {
                data: 42,
                is_stale: true,
            },
            is_fetching: false,
        };
        assert!(stale.is_success());
        assert!(stale.is_stale());
    }

    #[test]
    fn test_query_client_with_config() {
        let client = fresh_client();
        assert!(client.is_empty());
        assert_eq!(client.config().stale_time, Duration::from_secs(60));
        assert_eq!(client.config().cache_time, Duration::from_secs(300));
    }

    #[test]
    fn test_set_and_get_query_data() {
        let client = QueryClient::new();
        let key = QueryKey::new(["company", "me"]);

        assert!(client.get_query_data::<i32>(&key).is_none());
        client.set_query_data(&key, 42);
        assert_eq!(client.get_query_data::<i32>(&key), Some(42));

        // Wrong type reads as absent
        assert!(client.get_query_data::<String>(&key).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_fetch() {
        let client = fresh_client();
        let key = QueryKey::new(["evaluations", "stale-count"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            client.fetch_query(
                &key,
                QueryOptions::default(),
                counting_fetcher(calls.clone(), 5)
            ),
            client.fetch_query(
                &key,
                QueryOptions::default(),
                counting_fetcher(calls.clone(), 5)
            ),
        );

        assert_eq!(a, Ok(5));
        assert_eq!(b, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_read_is_served_from_cache() {
        let client = fresh_client();
        let key = QueryKey::new(["agencies", "recommended"]);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let value = client
                .fetch_query(
                    &key,
                    QueryOptions::default(),
                    counting_fetcher(calls.clone(), 1),
                )
                .await;
            assert_eq!(value, Ok(1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_read_refetches() {
        let client = fresh_client();
        let key = QueryKey::new(["evaluations", "stale-count"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions::stale_after(Duration::from_secs(10));

        let _ = client
            .fetch_query(&key, options, counting_fetcher(calls.clone(), 1))
            .await;
        tokio::time::advance(Duration::from_secs(11)).await;
        let _ = client
            .fetch_query(&key, options, counting_fetcher(calls.clone(), 2))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.get_query_data::<i32>(&key), Some(2));
    }

    fn gated_fetcher(
        rx: oneshot::Receiver<i32>,
    ) -> impl Fn() -> BoxFuture<'static, Result<i32, QueryError>> + Send + Sync + 'static {
        let rx = Arc::new(std::sync::Mutex::new(Some(rx)));
        move || {
            let rx = rx.lock().ok().and_then(|mut slot| slot.take());
            Box::pin(async move {
                let rx = rx.ok_or_else(|| QueryError::Network("fetcher reused".to_string()))?;
                rx.await.map_err(|e| QueryError::Network(e.to_string()))
            })
        }
    }

    #[tokio::test]
    async fn test_newest_issued_fetch_wins() {
        let client = fresh_client();
        let key = QueryKey::new(["opportunities", "detail", "e1"]);

        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();

        // Issue A, then B
        let mut fetch_a = Box::pin(client.refetch(&key, QueryOptions::default(), gated_fetcher(rx_a)));
        assert!(futures::poll!(&mut fetch_a).is_pending());
        let mut fetch_b = Box::pin(client.refetch(&key, QueryOptions::default(), gated_fetcher(rx_b)));
        assert!(futures::poll!(&mut fetch_b).is_pending());

        // Resolve the newer fetch first, then the older one
        tx_b.send(2).expect("b pending");
        assert_eq!(fetch_b.await, Ok(2));
        tx_a.send(1).expect("a pending");
        assert_eq!(fetch_a.await, Ok(1));

        assert_eq!(client.get_query_data::<i32>(&key), Some(2));
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_data() {
        let client = fresh_client();
        let key = QueryKey::new(["company", "me"]);
        client.set_query_data(&key, 42);

        let result = client
            .refetch::<i32, _>(&key, QueryOptions::default(), || {
                Box::pin(async { Err(QueryError::Network("offline".to_string())) })
            })
            .await;
        assert_eq!(result, Err(QueryError::Network("offline".to_string())));

        let snapshot = client.snapshot::<i32>(&key).expect("cached");
        assert_eq!(snapshot.status, QueryStatus::Error);
        assert_eq!(snapshot.data, Some(42));

        let view = client.query_result::<i32>(&key);
        assert_eq!(view.data(), Some(&42));
        assert!(view.is_error());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_reported() {
        let client = fresh_client();
        let key = QueryKey::new(["documents"]);
        client.set_query_data(&key, "not a number".to_string());

        let result = client
            .fetch_query::<i32, _>(&key, QueryOptions::default(), || {
                Box::pin(async { Ok(1) })
            })
            .await;
        assert!(matches!(result, Err(QueryError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_invalidate_forces_next_read() {
        let client = fresh_client();
        let key = QueryKey::new(["opportunities", "list"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let _ = client
            .fetch_query(&key, QueryOptions::default(), counting_fetcher(calls.clone(), 1))
            .await;
        assert_eq!(client.invalidate(&QueryKey::new(["opportunities"])), 1);
        // Already invalidated: no-op
        assert_eq!(client.invalidate(&QueryKey::new(["opportunities"])), 0);

        let _ = client
            .fetch_query(&key, QueryOptions::default(), counting_fetcher(calls.clone(), 1))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidation_mid_fetch_refetches_once_it_lands() {
        let client = fresh_client();
        let key = QueryKey::new(["evaluations", "pipeline"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let guard = client.mount(
            &key,
            QueryOptions::default(),
            erase_fetcher(counting_fetcher(calls.clone(), 1)),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0); // fetcher runs on the spawned task
        assert_eq!(client.invalidate(&key), 1);
        assert_eq!(client.invalidate(&key), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let snapshot = client.snapshot::<i32>(&key).expect("cached");
        assert!(!snapshot.is_invalidated);
        assert!(!snapshot.is_fetching);
        drop(guard);
    }

    #[tokio::test]
    async fn test_invalidating_a_running_refetch_does_not_duplicate_it() {
        let client = fresh_client();
        let key = QueryKey::new(["evaluations", "pipeline"]);
        let calls = Arc::new(AtomicUsize::new(0));
        client.set_query_data(&key, 0);

        let guard = client.mount(
            &key,
            QueryOptions::default(),
            erase_fetcher(counting_fetcher(calls.clone(), 1)),
        );
        assert!(!client.snapshot::<i32>(&key).expect("cached").is_fetching);

        assert_eq!(client.invalidate(&key), 1);
        assert_eq!(client.invalidate(&key), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.get_query_data::<i32>(&key), Some(1));
        drop(guard);
    }

    #[tokio::test]
    async fn test_result_of_fetch_issued_before_invalidation_stays_invalidated() {
        let client = fresh_client();
        let key = QueryKey::new(["opportunities", "list"]);
        let (tx, rx) = oneshot::channel();

        let mut before = Box::pin(client.fetch_query(&key, QueryOptions::default(), gated_fetcher(rx)));
        assert!(futures::poll!(&mut before).is_pending());
        assert_eq!(client.invalidate(&key), 1);

        tx.send(1).expect("fetch pending");
        assert_eq!(before.await, Ok(1));
        let snapshot = client.snapshot::<i32>(&key).expect("cached");
        assert_eq!(snapshot.data, Some(1));
        assert!(snapshot.is_invalidated);

        let calls = Arc::new(AtomicUsize::new(0));
        let after = client
            .fetch_query(&key, QueryOptions::default(), counting_fetcher(calls.clone(), 2))
            .await;
        assert_eq!(after, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!client.snapshot::<i32>(&key).expect("cached").is_invalidated);
    }

    #[tokio::test]
    async fn test_failed_refetch_is_retried_by_next_read() {
        let client = fresh_client();
        let key = QueryKey::new(["company", "me"]);
        client.set_query_data(&key, 42);

        let failed = client
            .refetch::<i32, _>(&key, QueryOptions::default(), || {
                Box::pin(async { Err(QueryError::Network("offline".to_string())) })
            })
            .await;
        assert!(failed.is_err());
        assert!(client.snapshot::<i32>(&key).expect("cached").is_stale);

        let calls = Arc::new(AtomicUsize::new(0));
        let retried = client
            .fetch_query(&key, QueryOptions::default(), counting_fetcher(calls.clone(), 43))
            .await;
        assert_eq!(retried, Ok(43));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.snapshot::<i32>(&key).expect("cached").status,
            QueryStatus::Success
        );
    }

    #[tokio::test]
    async fn test_invalidate_command_produces_no_messages() {
        let client = fresh_client();
        let key = QueryKey::new(["documents"]);
        client.set_query_data(&key, 1);
        let mut rx = client.events();

        let cmd: Command<()> = client.invalidate_command(key.clone());
        let messages: Vec<()> = cmd.into_stream().collect().await;
        assert!(messages.is_empty());

        let event = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert_eq!(event.key, key);
        assert_eq!(event.kind, CacheEventKind::Invalidated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_entries_are_collected_after_cache_time() {
        let client = fresh_client();
        let key = QueryKey::new(["agencies", "detail", "a1"]);

        let guard = client.subscribe(&key);
        client.set_query_data(&key, 1);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(client.gc(), 0, "subscribed entries are never collected");

        drop(guard);
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(client.gc(), 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!client.contains(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_read_without_a_view_are_collected() {
        let client = fresh_client();
        let calls = Arc::new(AtomicUsize::new(0));
        let detail = QueryKey::new(["opportunities", "detail"]);

        for id in 0..100 {
            let key = detail.with(id);
            let _ = client
                .fetch_query(&key, QueryOptions::default(), counting_fetcher(calls.clone(), id))
                .await;
        }
        client.set_query_data(&QueryKey::new(["company", "me"]), 7);
        assert_eq!(client.len(), 101);

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(client.len(), 101, "kept for the grace period");

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(client.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_an_idle_entry_postpones_collection() {
        let client = fresh_client();
        let key = QueryKey::new(["agencies", "recommended"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions::stale_after(Duration::from_secs(3600));

        let _ = client
            .fetch_query(&key, options, counting_fetcher(calls.clone(), 1))
            .await;
        tokio::time::sleep(Duration::from_secs(200)).await;
        let _ = client
            .fetch_query(&key, options, counting_fetcher(calls.clone(), 1))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "served from cache");

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(client.contains(&key));
        tokio::time::sleep(Duration::from_secs(101)).await;
        tokio::task::yield_now().await;
        assert!(!client.contains(&key));
    }

    #[tokio::test]
    async fn test_query_stream_emits_loading_then_success() {
        let client = fresh_client();
        let query = Query::new(
            QueryKey::new(["company", "me"]),
            || Box::pin(async { Ok::<i32, QueryError>(42) }),
            client.clone(),
        );

        let mut stream = query.stream();
        let first = stream.next().await.expect("initial state");
        assert!(first.is_loading());

        let second = timeout(Duration::from_millis(200), stream.next())
            .await
            .expect("update within timeout")
            .expect("stream open");
        assert_eq!(second.data(), Some(&42));

        let snapshot = client
            .snapshot::<i32>(&QueryKey::new(["company", "me"]))
            .expect("cached");
        assert_eq!(snapshot.subscribers, 1);

        drop(stream);
        let snapshot = client
            .snapshot::<i32>(&QueryKey::new(["company", "me"]))
            .expect("still cached during grace period");
        assert_eq!(snapshot.subscribers, 0);
    }

    #[tokio::test]
    async fn test_focus_refetches_stale_subscribed_entries() {
        let client = QueryClient::with_config(QueryConfig::new(
            Duration::ZERO,
            Duration::from_secs(300),
        ));
        let key = QueryKey::new(["evaluations", "stale-count"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let _guard = client.mount(
            &key,
            QueryOptions::default(),
            erase_fetcher(counting_fetcher(calls.clone(), 3)),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(client.focus_gained(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_query_id_consistency() {
        let client = QueryClient::new();

        let query1 = Query::new(
            QueryKey::new(["agencies", "detail", "a1"]),
            || Box::pin(async { Ok::<i32, QueryError>(42) }),
            client.clone(),
        );
        let query2 = Query::new(
            QueryKey::new(["agencies", "detail", "a1"]),
            || Box::pin(async { Ok::<i32, QueryError>(42) }),
            client.clone(),
        );
        let query3 = Query::new(
            QueryKey::new(["agencies", "detail", "a2"]),
            || Box::pin(async { Ok::<i32, QueryError>(42) }),
            client.clone(),
        );
        let query4 = Query::new(
            QueryKey::new(["agencies", "detail", "a1"]),
            || Box::pin(async { Ok::<String, QueryError>("x".to_string()) }),
            client,
        );

        assert_eq!(query1.id(), query2.id());
        assert_ne!(query1.id(), query3.id());
        // Same key, different value type
        assert_ne!(query1.id(), query4.id());
    }
}
