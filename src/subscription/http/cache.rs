use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::QueryError;

/// Type-erased cached value. Each key holds exactly one concrete type.
pub(crate) type ErasedData = Arc<dyn Any + Send + Sync>;
pub(crate) type FetchFuture = BoxFuture<'static, Result<ErasedData, QueryError>>;
pub(crate) type ErasedFetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;
pub(crate) type InFlight = Shared<FetchFuture>;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Created by a subscription, nothing fetched yet.
    Idle,
    /// First fetch in progress, no data yet.
    Loading,
    /// Last fetch succeeded.
    Success,
    /// Last fetch failed; previous data (if any) is kept.
    Error,
}

/// A cached entry with timestamp, staleness and fetch bookkeeping.
pub(crate) struct CacheEntry {
    pub data: Option<ErasedData>,
    pub error: Option<QueryError>,
    pub status: QueryStatus,
    pub updated_at: Option<Instant>,
    pub invalidated: bool,
    /// Newest fetch version issued when the entry was invalidated.
    pub invalidated_at: u64,
    pub stale_time: Duration,
    pub subscribers: usize,
    pub idle_since: Option<Instant>,
    /// A delayed collection task is pending for this entry.
    pub collect_scheduled: bool,
    /// Version of the most recently issued fetch; only its result is written.
    pub issued: u64,
    pub in_flight: Option<(u64, InFlight)>,
    pub fetcher: Option<ErasedFetcher>,
}

impl CacheEntry {
    /// Creates an empty idle entry.
    pub fn new(stale_time: Duration) -> Self {
        Self {
            data: None,
            error: None,
            status: QueryStatus::Idle,
            updated_at: None,
            invalidated: false,
            invalidated_at: 0,
            stale_time,
            subscribers: 0,
            idle_since: Some(Instant::now()),
            collect_scheduled: false,
            issued: 0,
            in_flight: None,
            fetcher: None,
        }
    }

    /// Checks if this entry must be refetched before its data can be trusted.
    ///
    /// A failed last fetch counts as stale even if the kept data is recent.
    pub fn is_stale(&self) -> bool {
        if self.data.is_none() || self.invalidated || self.status == QueryStatus::Error {
            return true;
        }
        self.updated_at
            .is_none_or(|at| at.elapsed() > self.stale_time)
    }

    pub const fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Marks this entry as invalidated as of fetch `version`. Returns `false`
    /// if it already was, leaving the first mark in place.
    pub const fn mark_stale(&mut self, version: u64) -> bool {
        if self.invalidated {
            return false;
        }
        self.invalidated = true;
        self.invalidated_at = version;
        true
    }

    /// Checks if fetch `version` was issued before the pending invalidation,
    /// so its result may not reflect the change that caused it.
    pub const fn predates_invalidation(&self, version: u64) -> bool {
        self.invalidated && version <= self.invalidated_at
    }

    /// Stores a successful fetch result, resetting timestamp and staleness.
    pub fn record_success(&mut self, data: ErasedData) {
        self.data = Some(data);
        self.error = None;
        self.status = QueryStatus::Success;
        self.updated_at = Some(Instant::now());
        self.invalidated = false;
    }

    /// Records a failed fetch. Data from the last success is preserved; the
    /// entry reads as stale until a fetch succeeds, so the next read retries.
    pub fn record_error(&mut self, error: QueryError) {
        self.error = Some(error);
        self.status = QueryStatus::Error;
    }

    /// Replaces the data without touching fetch timestamps.
    pub fn replace_data(&mut self, data: ErasedData) {
        self.data = Some(data);
        if self.status != QueryStatus::Error {
            self.status = QueryStatus::Success;
        }
    }

    pub fn subscribe(&mut self) {
        self.subscribers += 1;
        self.idle_since = None;
    }

    /// Returns `true` when the last subscriber left.
    pub fn unsubscribe(&mut self) -> bool {
        self.subscribers = self.subscribers.saturating_sub(1);
        if self.subscribers == 0 {
            self.idle_since = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Checks if this entry should be garbage collected based on cache time.
    pub fn should_gc(&self, cache_time: Duration) -> bool {
        self.subscribers == 0
            && self.in_flight.is_none()
            && self
                .idle_since
                .is_some_and(|since| since.elapsed() >= cache_time)
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            status: self.status,
            updated_at: self.updated_at,
            invalidated: self.invalidated,
            invalidated_at: self.invalidated_at,
        }
    }

    pub fn restore(&mut self, snapshot: EntrySnapshot) {
        self.data = snapshot.data;
        self.error = snapshot.error;
        self.status = snapshot.status;
        self.updated_at = snapshot.updated_at;
        self.invalidated = snapshot.invalidated;
        self.invalidated_at = snapshot.invalidated_at;
    }
}

/// The observable state of an entry, captured before an optimistic patch.
#[derive(Clone)]
pub(crate) struct EntrySnapshot {
    pub data: Option<ErasedData>,
    pub error: Option<QueryError>,
    pub status: QueryStatus,
    pub updated_at: Option<Instant>,
    pub invalidated: bool,
    pub invalidated_at: u64,
}

impl PartialEq for EntrySnapshot {
    fn eq(&self, other: &Self) -> bool {
        let same_data = match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_data
            && self.error == other.error
            && self.status == other.status
            && self.updated_at == other.updated_at
            && self.invalidated == other.invalidated
            && self.invalidated_at == other.invalidated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: i32) -> ErasedData {
        Arc::new(value)
    }

    #[test]
    fn test_new_entry() {
        let entry = CacheEntry::new(Duration::from_secs(1));
        assert_eq!(entry.status, QueryStatus::Idle);
        assert!(entry.data.is_none());
        assert!(entry.is_stale());
        assert!(!entry.is_fetching());
    }

    #[test]
    fn test_fresh_after_success() {
        let mut entry = CacheEntry::new(Duration::from_secs(60));
        entry.record_success(data(42));
        assert!(!entry.is_stale());
        assert_eq!(entry.status, QueryStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_after_stale_time() {
        let mut entry = CacheEntry::new(Duration::from_millis(5));
        entry.record_success(data(42));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(entry.is_stale());
    }

    #[test]
    fn test_mark_stale_is_idempotent() {
        let mut entry = CacheEntry::new(Duration::from_secs(60));
        entry.record_success(data(42));
        assert!(entry.mark_stale(3));
        assert!(!entry.mark_stale(7));
        assert!(entry.is_stale());
        assert_eq!(entry.invalidated_at, 3);

        entry.record_success(data(100));
        assert!(!entry.invalidated);
    }

    #[test]
    fn test_fetches_issued_before_invalidation() {
        let mut entry = CacheEntry::new(Duration::from_secs(60));
        assert!(!entry.predates_invalidation(1));

        entry.mark_stale(4);
        assert!(entry.predates_invalidation(3));
        assert!(entry.predates_invalidation(4));
        assert!(!entry.predates_invalidation(5));

        entry.record_success(data(1));
        assert!(!entry.predates_invalidation(3));
    }

    #[test]
    fn test_error_keeps_data() {
        let mut entry = CacheEntry::new(Duration::from_secs(60));
        entry.record_success(data(42));
        entry.record_error(QueryError::Network("down".to_string()));

        assert_eq!(entry.status, QueryStatus::Error);
        let kept = entry.data.as_ref().and_then(|d| d.downcast_ref::<i32>());
        assert_eq!(kept, Some(&42));
        assert!(entry.is_stale(), "a failed fetch is retried on the next read");

        entry.record_success(data(43));
        assert!(!entry.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_gc() {
        let mut entry = CacheEntry::new(Duration::from_secs(60));
        entry.subscribe();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!entry.should_gc(Duration::from_secs(5)));

        assert!(entry.unsubscribe());
        assert!(!entry.should_gc(Duration::from_secs(5)));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(entry.should_gc(Duration::from_secs(5)));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut entry = CacheEntry::new(Duration::from_secs(60));
        entry.record_success(data(1));
        let before = entry.snapshot();

        entry.replace_data(data(2));
        entry.mark_stale(9);
        assert!(entry.snapshot() != before);

        entry.restore(before.clone());
        assert!(entry.snapshot() == before);
    }
}
