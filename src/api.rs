//! Resource accessors: one method per GovAI endpoint.
//!
//! Every accessor performs exactly one [`Transport`] call and parses the
//! response into an explicit type. Accessors never cache, retry or validate
//! business rules, and errors from the transport pass through unchanged.
//! Caching is the job of [`QueryClient`](crate::subscription::http::QueryClient);
//! [`GovAi`](crate::govai::GovAi) combines both.
//!
//! Payload enums accept values they do not know as an `Unknown` variant, so a
//! new server-side value does not break decoding. Missing required fields do,
//! with [`QueryError::Decode`](crate::QueryError::Decode).

pub mod agencies;
pub mod company;
pub mod documents;
pub mod evaluations;
pub mod opportunities;

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use crate::QueryError;
use crate::transport::Transport;

pub use agencies::{Agency, AgencyFilters, AgencyList, AgencyMatch, RecommendedAgency};
pub use company::{Company, CompanyUpdate};
pub use documents::{
    Certification, Document, DocumentType, Identified, NewCertification, NewDocument,
    NewPastPerformance, PastPerformance, UploadRequest, UploadTarget,
};
pub use evaluations::StaleCount;
pub use opportunities::{
    ActionMessage, Evaluation, EvaluationList, EvaluationPatch, Opportunity, OpportunityDetail,
    OpportunityFilters, Recommendation,
};

/// Typed access to the GovAI REST API.
///
/// Cloning is cheap; clones share the transport.
#[derive(Debug, Clone)]
pub struct GovAiApi {
    transport: Transport,
}

impl GovAiApi {
    #[must_use]
    pub const fn new(transport: Transport) -> Self {
        Self { transport }
    }

    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }
}

/// Renders filter values as query-string parameters.
///
/// Strings are sent bare; numbers and booleans use their JSON spelling.
fn query_params(pairs: Vec<(&'static str, Value)>) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name.to_string(), value)
        })
        .collect()
}

/// Joins path segments, percent-encoding each one so ids cannot add segments or a query.
fn path(segments: &[&str]) -> Result<String, QueryError> {
    let mut url = Url::parse("http://api.invalid/")
        .map_err(|e| QueryError::Validation(format!("bad URL: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| QueryError::Validation("URL cannot carry a path".to_string()))?
        .clear()
        .extend(segments);
    Ok(url.path().to_string())
}

/// Serializes a request payload.
fn body(payload: &impl Serialize) -> Result<Value, QueryError> {
    serde_json::to_value(payload).map_err(|e| QueryError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_params_spelling() {
        let params = query_params(vec![
            ("recommendation", json!("BID")),
            ("min_fit_score", json!(70.5)),
            ("is_forecast", json!(false)),
            ("limit", json!(20)),
        ]);
        let rendered: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        assert_eq!(
            rendered,
            vec![
                "recommendation=BID",
                "min_fit_score=70.5",
                "is_forecast=false",
                "limit=20"
            ]
        );
    }

    #[test]
    fn test_path_encodes_ids() {
        let encoded = |segments: &[&str]| path(segments).expect("valid path");
        assert_eq!(encoded(&["agencies", "a1", "match"]), "/agencies/a1/match");
        assert_eq!(
            encoded(&["opportunities", "a/b?c#d"]),
            "/opportunities/a%2Fb%3Fc%23d"
        );
        assert_eq!(encoded(&["documents", "x y%"]), "/documents/x%20y%25");
    }
}
