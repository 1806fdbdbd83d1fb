//! Mutations: writes with optimistic patches, rollback and invalidation.
//!
//! A [`Mutation`] runs as a two-phase protocol against the [`QueryClient`]:
//!
//! 1. **Apply.** Every optimistic patch is applied to the cached data right
//!    away, so subscribed views show the change before the server answers.
//!    The prior state of each patched entry is captured in a
//!    [`MutationRecord`].
//! 2. **Commit or roll back.** On success, authoritative data from the
//!    response is merged over the patch and every affected key is
//!    invalidated. On failure, every captured entry is restored exactly and
//!    nothing is invalidated, so a refetch cannot mask the rollback.
//!
//! Concurrent mutations touching the same key are not coordinated: the last
//! write to land wins.
//!
//! # Example
//!
//! ```rust,ignore
//! use govai_query::subscription::http::{Mutation, QueryKey};
//!
//! let saved = Mutation::new("evaluations.update", patch)
//!     .optimistic::<Evaluation>(QueryKey::new(["opportunities", "detail", "e1"]), |e| {
//!         e.user_notes = Some("call CO".to_string());
//!     })
//!     .affects(QueryKey::new(["opportunities"]))
//!     .execute(&client, move |patch| Box::pin(async move {
//!         api.update_evaluation("e1", &patch).await
//!     }))
//!     .await?;
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::QueryError;
use crate::command::Command;

use super::cache::{EntrySnapshot, ErasedData};
use super::key::QueryKey;
use super::query::QueryClient;

type ErasedPatch = Arc<dyn Fn(&ErasedData) -> Option<ErasedData> + Send + Sync>;
type ErasedMerge<O> = Box<dyn Fn(&ErasedData, &O) -> Option<ErasedData> + Send + Sync>;

/// The state of a mutation result.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    /// Mutation is idle (not yet started).
    Idle,
    /// Mutation is in progress.
    Loading,
    /// Mutation succeeded with a result.
    Success(T),
    /// Mutation failed; optimistic changes were rolled back.
    Error(QueryError),
}

/// A mutation result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult<T> {
    /// The current state of the mutation.
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns `true` if the mutation is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, MutationState::Loading)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }
}

impl<T> From<Result<T, QueryError>> for MutationResult<T> {
    fn from(result: Result<T, QueryError>) -> Self {
        let state = match result {
            Ok(data) => MutationState::Success(data),
            Err(error) => MutationState::Error(error),
        };
        Self { state }
    }
}

#[derive(Clone)]
enum Target {
    Exact(QueryKey),
    Prefix(QueryKey),
}

impl Target {
    fn resolve(&self, client: &QueryClient) -> Vec<QueryKey> {
        match self {
            Self::Exact(key) => vec![key.clone()],
            Self::Prefix(prefix) => client.keys_matching(prefix),
        }
    }
}

/// Bookkeeping for one in-progress mutation.
///
/// Holds the prior state of every entry an optimistic patch touched; it is
/// consumed when the mutation settles.
pub struct MutationRecord {
    resource: String,
    affects: Vec<QueryKey>,
    snapshots: Vec<(QueryKey, EntrySnapshot)>,
}

impl MutationRecord {
    /// Keys that received an optimistic patch.
    pub fn patched_keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.snapshots.iter().map(|(key, _)| key)
    }

    fn rollback(self, client: &QueryClient) {
        // Reverse order so the oldest snapshot of a key patched twice wins
        for (key, snapshot) in self.snapshots.into_iter().rev() {
            debug!(key = %key, "rolling back optimistic patch");
            client.restore_entry(&key, snapshot);
        }
    }
}

/// A write against a resource (POST, PUT, PATCH, DELETE) with cache effects.
pub struct Mutation<I, O> {
    resource: String,
    input: I,
    patches: Vec<(Target, ErasedPatch)>,
    merges: Vec<(Target, ErasedMerge<O>)>,
    affects: Vec<QueryKey>,
}

impl<I, O> Mutation<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    /// Starts describing a mutation of `resource` with the given input.
    ///
    /// `resource` is a label used in logs.
    pub fn new(resource: impl Into<String>, input: I) -> Self {
        Self {
            resource: resource.into(),
            input,
            patches: Vec::new(),
            merges: Vec::new(),
            affects: Vec::new(),
        }
    }

    /// Patches the cached `T` under `key` before the write is sent.
    #[must_use]
    pub fn optimistic<T, F>(mut self, key: QueryKey, patch: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.patches.push((Target::Exact(key), erase_patch(patch)));
        self
    }

    /// Patches every cached `T` whose key starts with `prefix`.
    ///
    /// Entries under the prefix caching other types are left alone.
    #[must_use]
    pub fn optimistic_prefix<T, F>(mut self, prefix: QueryKey, patch: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.patches.push((Target::Prefix(prefix), erase_patch(patch)));
        self
    }

    /// Merges the server's response into the cached `T` under `key` on success.
    #[must_use]
    pub fn merge<T, F>(mut self, key: QueryKey, merge: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&mut T, &O) + Send + Sync + 'static,
    {
        self.merges.push((Target::Exact(key), erase_merge(merge)));
        self
    }

    /// Merges the server's response into every cached `T` under `prefix` on success.
    #[must_use]
    pub fn merge_prefix<T, F>(mut self, prefix: QueryKey, merge: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&mut T, &O) + Send + Sync + 'static,
    {
        self.merges.push((Target::Prefix(prefix), erase_merge(merge)));
        self
    }

    /// Invalidates every key starting with `prefix` once the write succeeds.
    #[must_use]
    pub fn affects(mut self, prefix: QueryKey) -> Self {
        self.affects.push(prefix);
        self
    }

    /// Runs the mutation.
    ///
    /// # Errors
    ///
    /// Returns the mutator's error after rolling back every optimistic patch.
    pub async fn execute<F>(self, client: &QueryClient, mutator: F) -> Result<O, QueryError>
    where
        F: FnOnce(I) -> BoxFuture<'static, Result<O, QueryError>> + Send + 'static,
    {
        let Self {
            resource,
            input,
            patches,
            merges,
            affects,
        } = self;

        let mut record = MutationRecord {
            resource,
            affects,
            snapshots: Vec::new(),
        };
        for (target, patch) in &patches {
            for key in target.resolve(client) {
                if let Some(snapshot) = client.patch_entry(&key, patch.as_ref()) {
                    record.snapshots.push((key, snapshot));
                }
            }
        }
        debug!(
            resource = %record.resource,
            patched = record.patched_keys().count(),
            "mutation started"
        );

        match mutator(input).await {
            Ok(output) => {
                for (target, merge) in &merges {
                    for key in target.resolve(client) {
                        let _ = client.patch_entry(&key, &|data: &ErasedData| merge(data, &output));
                    }
                }
                let invalidated: usize = record
                    .affects
                    .iter()
                    .map(|prefix| client.invalidate(prefix))
                    .sum();
                info!(resource = %record.resource, invalidated, "mutation succeeded");
                Ok(output)
            }
            Err(error) => {
                warn!(
                    resource = %record.resource,
                    %error,
                    rolled_back = record.snapshots.len(),
                    "mutation failed"
                );
                record.rollback(client);
                Err(error)
            }
        }
    }

    /// Runs the mutation as a [`Command`] producing its result as a message.
    pub fn command<F>(self, client: QueryClient, mutator: F) -> Command<Result<O, QueryError>>
    where
        F: FnOnce(I) -> BoxFuture<'static, Result<O, QueryError>> + Send + 'static,
    {
        Command::future(async move { self.execute(&client, mutator).await })
    }
}

fn erase_patch<T, F>(patch: F) -> ErasedPatch
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&mut T) + Send + Sync + 'static,
{
    Arc::new(move |data: &ErasedData| {
        let mut value = data.downcast_ref::<T>()?.clone();
        patch(&mut value);
        Some(Arc::new(value) as ErasedData)
    })
}

fn erase_merge<T, O, F>(merge: F) -> ErasedMerge<O>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&mut T, &O) + Send + Sync + 'static,
{
    Box::new(move |data: &ErasedData, output: &O| {
        let mut value = data.downcast_ref::<T>()?.clone();
        merge(&mut value, output);
        Some(Arc::new(value) as ErasedData)
    })
}
