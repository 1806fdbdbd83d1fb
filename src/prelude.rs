//! Prelude module for convenient imports.
//!
//! ```
//! use govai_query::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`GovAi`] - Typed queries and mutations for every resource
//! - [`QueryClient`], [`Query`], [`QueryKey`] - The query cache
//! - [`Mutation`] - Writes with optimistic patches
//! - [`Command`], [`Subscription`] - Effects and event sources for views
//! - [`Transport`], [`ClientConfig`] - HTTP plumbing

pub use crate::QueryError;
pub use crate::command::Command;
pub use crate::config::ClientConfig;
pub use crate::govai::GovAi;
pub use crate::pipeline::{PipelineBoard, PipelineStatus};
pub use crate::subscription::http::{
    Mutation, Query, QueryClient, QueryConfig, QueryKey, QueryOptions, QueryResult, QueryState,
};
pub use crate::subscription::{Subscription, SubscriptionManager};
pub use crate::transport::Transport;
pub use crate::upload::{DocumentUploader, UploadError};
