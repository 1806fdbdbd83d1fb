//! Opportunities, their evaluations, and the discovery trigger.

use std::fmt;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{GovAiApi, body, path, query_params};
use crate::QueryError;
use crate::pipeline::PipelineStatus;
use crate::transport::RequestOptions;

/// The model's bid recommendation for an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Bid,
    NoBid,
    Research,
    #[serde(other)]
    Unknown,
}

impl Recommendation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "BID",
            Self::NoBid => "NO_BID",
            Self::Research => "RESEARCH",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contract opportunity as published by the procurement source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notice_id: Option<String>,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub naics_code: Option<String>,
    #[serde(default)]
    pub set_aside: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub response_deadline: Option<String>,
    #[serde(default)]
    pub is_forecast: bool,
    #[serde(default)]
    pub url: Option<String>,
}

/// The scored evaluation of an opportunity against the company profile,
/// plus the user's own pipeline tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub opportunity_id: String,
    #[serde(default)]
    pub fit_score: Option<f64>,
    #[serde(default = "unknown_recommendation")]
    pub recommendation: Recommendation,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub user_saved: Option<PipelineStatus>,
    #[serde(default)]
    pub user_notes: Option<String>,
    #[serde(default)]
    pub is_stale: bool,
    #[serde(default)]
    pub opportunity: Option<Opportunity>,
}

const fn unknown_recommendation() -> Recommendation {
    Recommendation::Unknown
}

impl Evaluation {
    /// Title of the evaluated opportunity, if it was included.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.opportunity.as_ref().map(|o| o.title.as_str())
    }

    /// Takes the server's copy, keeping the embedded opportunity when the
    /// server left it out.
    pub fn merge_from(&mut self, server: &Self) {
        let opportunity = server.opportunity.clone().or_else(|| self.opportunity.take());
        *self = Self {
            opportunity,
            ..server.clone()
        };
    }

    fn matches(&self, needle: &str) -> bool {
        let opportunity = self.opportunity.as_ref();
        [
            opportunity.map(|o| o.title.as_str()),
            opportunity.and_then(|o| o.agency.as_deref()),
            opportunity.and_then(|o| o.notice_id.as_deref()),
            self.summary.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

/// One page of evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationList {
    pub evaluations: Vec<Evaluation>,
    pub total: u64,
}

impl EvaluationList {
    /// Filters this page by a free-text term, case-insensitively.
    ///
    /// Search runs on the page already fetched; it does not change the query
    /// and never issues a request. An empty term matches everything.
    #[must_use]
    pub fn search(&self, term: &str) -> Vec<&Evaluation> {
        let needle = term.trim().to_lowercase();
        self.evaluations
            .iter()
            .filter(|e| needle.is_empty() || e.matches(&needle))
            .collect()
    }

    /// Finds an evaluation on this page by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Evaluation> {
        self.evaluations.iter().find(|e| e.id == id)
    }
}

/// A single opportunity with its evaluation, when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityDetail {
    pub opportunity: Opportunity,
    #[serde(default)]
    pub evaluation: Option<Evaluation>,
}

/// Server-side filters for [`GovAiApi::list_opportunities`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpportunityFilters {
    pub recommendation: Option<Recommendation>,
    pub min_fit_score: Option<f64>,
    pub is_forecast: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl OpportunityFilters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendation = Some(recommendation);
        self
    }

    #[must_use]
    pub const fn min_fit_score(mut self, score: f64) -> Self {
        self.min_fit_score = Some(score);
        self
    }

    #[must_use]
    pub const fn forecast(mut self, is_forecast: bool) -> Self {
        self.is_forecast = Some(is_forecast);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The filters that are set, in request order.
    ///
    /// Used both for the query string and for the cache key, so the two can
    /// never disagree.
    #[must_use]
    pub fn to_params(&self) -> Vec<(&'static str, Value)> {
        [
            ("recommendation", self.recommendation.map(|r| json!(r.as_str()))),
            ("min_fit_score", self.min_fit_score.map(|s| json!(s))),
            ("is_forecast", self.is_forecast.map(Value::Bool)),
            ("limit", self.limit.map(|n| json!(n))),
            ("offset", self.offset.map(|n| json!(n))),
        ]
        .into_iter()
        .filter_map(|(name, value)| Some((name, value?)))
        .collect()
    }
}

/// User edits to an evaluation. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_saved: Option<PipelineStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_notes: Option<String>,
}

impl EvaluationPatch {
    /// A patch that moves the evaluation to `status`.
    #[must_use]
    pub const fn status(status: PipelineStatus) -> Self {
        Self {
            user_saved: Some(status),
            user_notes: None,
        }
    }

    /// A patch that replaces the user's notes.
    #[must_use]
    pub fn notes(notes: impl Into<String>) -> Self {
        Self {
            user_saved: None,
            user_notes: Some(notes.into()),
        }
    }

    /// Applies the patch locally, as the server would.
    pub fn apply_to(&self, evaluation: &mut Evaluation) {
        if let Some(status) = self.user_saved {
            evaluation.user_saved = Some(status);
        }
        if let Some(notes) = &self.user_notes {
            evaluation.user_notes = Some(notes.clone());
        }
    }
}

/// Acknowledgement returned by server-side triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMessage {
    pub message: String,
}

impl GovAiApi {
    /// `GET /opportunities`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn list_opportunities(
        &self,
        filters: &OpportunityFilters,
    ) -> Result<EvaluationList, QueryError> {
        let options = RequestOptions::new().params(query_params(filters.to_params()));
        self.transport
            .request(Method::GET, "/opportunities", options)
            .await
    }

    /// `GET /opportunities/{id}`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn get_opportunity(&self, id: &str) -> Result<OpportunityDetail, QueryError> {
        self.transport
            .request(Method::GET, &path(&["opportunities", id])?, RequestOptions::new())
            .await
    }

    /// `PUT /opportunities/evaluations/{id}`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn update_evaluation(
        &self,
        id: &str,
        patch: &EvaluationPatch,
    ) -> Result<Evaluation, QueryError> {
        let options = RequestOptions::new().json(body(patch)?);
        self.transport
            .request(Method::PUT, &path(&["opportunities", "evaluations", id])?, options)
            .await
    }

    /// `POST /actions/trigger-discovery?force_refresh=bool`
    ///
    /// Discovery runs server-side for a while, so this uses the long timeout.
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn trigger_discovery(&self, force_refresh: bool) -> Result<ActionMessage, QueryError> {
        let options = RequestOptions::new()
            .param("force_refresh", force_refresh)
            .timeout(self.transport.config().long_timeout);
        self.transport
            .request(Method::POST, "/actions/trigger-discovery", options)
            .await
    }
}
