//! Query keys and stale times for every GovAI resource.
//!
//! Keys are namespaced by resource so a write can invalidate everything a
//! resource caches with one prefix:
//!
//! ```text
//! ["opportunities", "list", {filters}]     ["opportunities", "detail", id]
//! ["evaluations", "pipeline"]              ["evaluations", "stale-count"]
//! ["agencies", "list", {filters}]          ["agencies", "detail", id]
//! ["agencies", "recommended"]              ["agencies", "match", id]
//! ["documents"]  ["certifications"]  ["past-performance"]  ["company", "me"]
//! ```

use std::time::Duration;

use serde_json::{Map, Value};

use crate::api::{AgencyFilters, OpportunityFilters};
use crate::subscription::http::{QueryKey, QueryOptions};

/// Counters and other values that move whenever anything is rescored.
pub const STATS_STALE_TIME: Duration = Duration::from_secs(10);
/// Lists and details the user is working through.
pub const LIST_STALE_TIME: Duration = Duration::from_secs(30);
/// Agencies, the company profile and similar slow-changing data.
pub const REFERENCE_STALE_TIME: Duration = Duration::from_secs(5 * 60);

#[must_use]
pub const fn stats() -> QueryOptions {
    QueryOptions::stale_after(STATS_STALE_TIME)
}

#[must_use]
pub const fn lists() -> QueryOptions {
    QueryOptions::stale_after(LIST_STALE_TIME)
}

#[must_use]
pub const fn reference() -> QueryOptions {
    QueryOptions::stale_after(REFERENCE_STALE_TIME)
}

fn params(pairs: Vec<(&'static str, Value)>) -> Value {
    Value::Object(
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect::<Map<String, Value>>(),
    )
}

/// Everything cached about opportunities.
#[must_use]
pub fn opportunities() -> QueryKey {
    QueryKey::new(["opportunities"])
}

/// Every opportunity list, whatever its filters.
#[must_use]
pub fn opportunity_lists() -> QueryKey {
    QueryKey::new(["opportunities", "list"])
}

#[must_use]
pub fn opportunity_list(filters: &OpportunityFilters) -> QueryKey {
    opportunity_lists().with(params(filters.to_params()))
}

/// Every opportunity detail.
#[must_use]
pub fn opportunity_details() -> QueryKey {
    QueryKey::new(["opportunities", "detail"])
}

#[must_use]
pub fn opportunity_detail(id: &str) -> QueryKey {
    opportunity_details().with(id)
}

/// Everything cached about evaluations.
#[must_use]
pub fn evaluations() -> QueryKey {
    QueryKey::new(["evaluations"])
}

#[must_use]
pub fn pipeline() -> QueryKey {
    QueryKey::new(["evaluations", "pipeline"])
}

#[must_use]
pub fn stale_count() -> QueryKey {
    QueryKey::new(["evaluations", "stale-count"])
}

/// Everything cached about agencies.
#[must_use]
pub fn agencies() -> QueryKey {
    QueryKey::new(["agencies"])
}

#[must_use]
pub fn agency_list(filters: &AgencyFilters) -> QueryKey {
    QueryKey::new(["agencies", "list"]).with(params(filters.to_params()))
}

#[must_use]
pub fn agency_detail(id: &str) -> QueryKey {
    QueryKey::new(["agencies", "detail", id])
}

#[must_use]
pub fn recommended_agencies() -> QueryKey {
    QueryKey::new(["agencies", "recommended"])
}

#[must_use]
pub fn agency_match(id: &str) -> QueryKey {
    QueryKey::new(["agencies", "match", id])
}

#[must_use]
pub fn documents() -> QueryKey {
    QueryKey::new(["documents"])
}

#[must_use]
pub fn certifications() -> QueryKey {
    QueryKey::new(["certifications"])
}

#[must_use]
pub fn past_performance() -> QueryKey {
    QueryKey::new(["past-performance"])
}

/// Everything cached about the company.
#[must_use]
pub fn company() -> QueryKey {
    QueryKey::new(["company"])
}

#[must_use]
pub fn company_profile() -> QueryKey {
    QueryKey::new(["company", "me"])
}
