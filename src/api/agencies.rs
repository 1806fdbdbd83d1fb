//! Agencies and how well they match the company.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{GovAiApi, path, query_params};
use crate::QueryError;
use crate::transport::RequestOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agency {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub opportunity_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyList {
    pub agencies: Vec<Agency>,
    pub total: u64,
}

/// How well an agency's buying pattern fits the company profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgencyMatch {
    pub agency_id: String,
    pub score: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub matching_naics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedAgency {
    pub agency: Agency,
    pub score: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Server-side filters for [`GovAiApi::list_agencies`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgencyFilters {
    pub department: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AgencyFilters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
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
    #[must_use]
    pub fn to_params(&self) -> Vec<(&'static str, Value)> {
        [
            ("department", self.department.as_ref().map(|d| json!(d))),
            ("limit", self.limit.map(|n| json!(n))),
            ("offset", self.offset.map(|n| json!(n))),
        ]
        .into_iter()
        .filter_map(|(name, value)| Some((name, value?)))
        .collect()
    }
}

impl GovAiApi {
    /// `GET /agencies`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn list_agencies(&self, filters: &AgencyFilters) -> Result<AgencyList, QueryError> {
        let options = RequestOptions::new().params(query_params(filters.to_params()));
        self.transport.request(Method::GET, "/agencies", options).await
    }

    /// `GET /agencies/{id}`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn get_agency(&self, id: &str) -> Result<Agency, QueryError> {
        self.transport
            .request(Method::GET, &path(&["agencies", id])?, RequestOptions::new())
            .await
    }

    /// `GET /agencies/recommended`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn recommended_agencies(&self) -> Result<Vec<RecommendedAgency>, QueryError> {
        self.transport
            .request(Method::GET, "/agencies/recommended", RequestOptions::new())
            .await
    }

    /// `GET /agencies/{id}/match`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn agency_match(&self, id: &str) -> Result<AgencyMatch, QueryError> {
        self.transport
            .request(Method::GET, &path(&["agencies", id, "match"])?, RequestOptions::new())
            .await
    }
}
