use std::time::Duration;

/// Configuration for query behavior.
///
/// This controls how queries cache data and when they consider it stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// How long data is considered fresh before becoming stale.
    ///
    /// When data is fresh, reads use cached data without refetching.
    /// Once stale, the next read or mount refetches while still exposing cached data.
    pub stale_time: Duration,

    /// How long an entry without subscribers is retained before it is collected.
    pub cache_time: Duration,

    /// Refetch stale entries when a new subscription mounts.
    pub refetch_on_mount: bool,

    /// Refetch stale subscribed entries on [`QueryClient::focus_gained`](super::QueryClient::focus_gained).
    pub refetch_on_focus: bool,

    /// Capacity of the cache event channel.
    pub event_capacity: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(0),      // immediately stale
            cache_time: Duration::from_secs(5 * 60), // 5 minutes
            refetch_on_mount: true,
            refetch_on_focus: true,
            event_capacity: 100,
        }
    }
}

impl QueryConfig {
    /// Creates a new query configuration with the given stale and cache times.
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
            refetch_on_mount: true,
            refetch_on_focus: true,
            event_capacity: 100,
        }
    }

    #[must_use]
    pub const fn with_refetch_on_mount(mut self, enabled: bool) -> Self {
        self.refetch_on_mount = enabled;
        self
    }

    #[must_use]
    pub const fn with_refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = enabled;
        self
    }

    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Per-query overrides of [`QueryConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Stale time for this key; `None` uses the client default.
    pub stale_time: Option<Duration>,
}

impl QueryOptions {
    /// Options using a specific stale time.
    #[must_use]
    pub const fn stale_after(stale_time: Duration) -> Self {
        Self {
            stale_time: Some(stale_time),
        }
    }

    pub(crate) fn resolve_stale_time(&self, config: &QueryConfig) -> Duration {
        self.stale_time.unwrap_or(config.stale_time)
    }
}
