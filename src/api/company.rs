//! The signed-in user's company profile.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{GovAiApi, body};
use crate::QueryError;
use crate::transport::RequestOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub uei: Option<String>,
    #[serde(default)]
    pub cage_code: Option<String>,
    #[serde(default)]
    pub naics_codes: Vec<String>,
    #[serde(default)]
    pub set_asides: Vec<String>,
    #[serde(default)]
    pub capabilities: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// Profile edits. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cage_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub naics_codes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_asides: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl CompanyUpdate {
    /// Applies the update locally, as the server would.
    pub fn apply_to(&self, company: &mut Company) {
        if let Some(name) = &self.name {
            company.name.clone_from(name);
        }
        if let Some(uei) = &self.uei {
            company.uei = Some(uei.clone());
        }
        if let Some(cage_code) = &self.cage_code {
            company.cage_code = Some(cage_code.clone());
        }
        if let Some(naics_codes) = &self.naics_codes {
            company.naics_codes.clone_from(naics_codes);
        }
        if let Some(set_asides) = &self.set_asides {
            company.set_asides.clone_from(set_asides);
        }
        if let Some(capabilities) = &self.capabilities {
            company.capabilities = Some(capabilities.clone());
        }
        if let Some(website) = &self.website {
            company.website = Some(website.clone());
        }
    }
}

impl GovAiApi {
    /// `GET /company/me`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn get_company(&self) -> Result<Company, QueryError> {
        self.transport
            .request(Method::GET, "/company/me", RequestOptions::new())
            .await
    }

    /// `PUT /company`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn update_company(&self, update: &CompanyUpdate) -> Result<Company, QueryError> {
        let options = RequestOptions::new().json(body(update)?);
        self.transport.request(Method::PUT, "/company", options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::mock::MockBackend;
    use crate::transport::{StaticToken, Transport};
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn test_update_applies_only_set_fields() {
        let mut company = Company {
            id: "c1".to_string(),
            name: "Acme".to_string(),
            uei: Some("UEI1".to_string()),
            cage_code: None,
            naics_codes: vec!["541330".to_string()],
            set_asides: Vec::new(),
            capabilities: None,
            website: None,
        };
        CompanyUpdate {
            name: Some("Acme Federal".to_string()),
            naics_codes: Some(vec!["541330".to_string(), "541512".to_string()]),
            ..CompanyUpdate::default()
        }
        .apply_to(&mut company);

        assert_eq!(company.name, "Acme Federal");
        assert_eq!(company.naics_codes.len(), 2);
        assert_eq!(company.uei.as_deref(), Some("UEI1"));
    }

    #[tokio::test]
    async fn test_company_requests_are_authenticated() {
        let backend = MockBackend::new();
        backend.respond(
            Method::GET,
            "/api/v1/company/me",
            StatusCode::OK,
            json!({"id": "c1", "name": "Acme"}),
        );
        backend.respond(
            Method::PUT,
            "/api/v1/company",
            StatusCode::OK,
            json!({"id": "c1", "name": "Acme Federal"}),
        );

        let api = GovAiApi::new(
            Transport::new(backend.clone(), ClientConfig::new("http://api.test/api/v1"))
                .with_token_provider(StaticToken("jwt".to_string())),
        );
        let company = api.get_company().await.expect("company");
        assert_eq!(company.name, "Acme");

        let updated = api
            .update_company(&CompanyUpdate {
                name: Some("Acme Federal".to_string()),
                ..CompanyUpdate::default()
            })
            .await
            .expect("updated");
        assert_eq!(updated.name, "Acme Federal");

        let requests = backend.requests();
        assert!(requests.iter().all(|r| r.bearer_token() == Some("jwt")));
        assert_eq!(requests[1].json(), Some(&json!({"name": "Acme Federal"})));
    }
}
