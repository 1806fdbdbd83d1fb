//! HTTP query and mutation support with caching.
//!
//! This module is the data layer every view composes to, similar to SWR or
//! TanStack Query:
//!
//! - **Queries**: [`QueryClient`] keeps the last known good value per
//!   [`QueryKey`], deduplicates concurrent fetches, orders results by fetch
//!   version and keeps stale data when a refetch fails. [`Query`] is the
//!   subscription a view holds while mounted.
//! - **Mutations**: [`Mutation`] applies optimistic patches, rolls them back
//!   on failure and invalidates affected keys on success.
//! - **Cache management**: invalidation by key prefix, focus/mount refetch
//!   policy, and delayed collection of entries nobody subscribes to.
//!
//! # Example
//!
//! ```rust,ignore
//! use govai_query::prelude::*;
//! use govai_query::subscription::http::{Mutation, Query, QueryClient, QueryKey};
//!
//! let client = QueryClient::new();
//!
//! // In the view's subscriptions:
//! Subscription::new(Query::new(
//!     QueryKey::new(["company", "me"]),
//!     move || Box::pin(api.get_company()),
//!     client.clone(),
//! ))
//! .map(Message::Company);
//!
//! // On save:
//! Mutation::new("company.update", update)
//!     .affects(QueryKey::new(["company"]))
//!     .command(client.clone(), move |update| Box::pin(async move {
//!         api.update_company(&update).await
//!     }))
//!     .map(Message::CompanySaved);
//! ```

mod cache;
mod config;
mod key;
pub mod mutation;
pub mod query;

// Re-export main types
pub use cache::QueryStatus;
pub use config::{QueryConfig, QueryOptions};
pub use key::QueryKey;
pub use mutation::{Mutation, MutationRecord, MutationResult, MutationState};
pub use query::{
    CacheEvent, CacheEventKind, Query, QueryClient, QueryResult, QuerySnapshot, QueryState,
    SubscriptionGuard,
};
