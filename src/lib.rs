//! # govai-query
//!
//! Client-side data layer for the GovAI contract discovery API: a typed REST
//! client, a query cache with SWR/TanStack-style semantics, optimistic
//! mutations and the document upload flow.
//!
//! ## Architecture
//!
//! Components, leaves first:
//!
//! 1. **Transport**: one HTTP request in, one parsed body or typed error out
//! 2. **Resource accessors**: one method per backend endpoint on [`GovAiApi`](api::GovAiApi)
//! 3. **Query cache**: [`QueryClient`](subscription::http::QueryClient) keeps the
//!    last known good value per key, deduplicates fetches and orders results
//!    by fetch version
//! 4. **Mutations**: [`Mutation`](subscription::http::Mutation) applies
//!    optimistic patches and commits or rolls them back
//! 5. **Views**: anything holding a [`Subscription`](subscription::Subscription)
//!    to a [`Query`](subscription::http::Query); views receive a new
//!    [`QueryResult`](subscription::http::QueryResult) every time their entry changes
//!
//! [`GovAi`](govai::GovAi) wires all of this together per resource so every
//! view gets the same loading, staleness and invalidation behavior.
//!
//! ## Example
//!
//! ```rust,no_run
//! use govai_query::prelude::*;
//! use govai_query::api::OpportunityFilters;
//! use govai_query::api::Recommendation;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let govai = GovAi::new(Transport::reqwest(ClientConfig::from_env()?)?);
//!
//! let filters = OpportunityFilters::new()
//!     .recommendation(Recommendation::Bid)
//!     .limit(20);
//! let page = govai.opportunities(&filters).fetch().await?;
//! println!("{} of {} opportunities", page.evaluations.len(), page.total);
//!
//! govai.set_pipeline_status("e1", PipelineStatus::Won).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod govai;
pub mod keys;
pub mod pipeline;
pub mod prelude;
pub mod subscription;
pub mod transport;
pub mod upload;

pub use error::QueryError;
