//! Company documents, certifications and past performance records.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{GovAiApi, body, path};
use crate::QueryError;
use crate::transport::RequestOptions;

/// A stored record with a server-assigned id.
pub trait Identified {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    CapabilityStatement,
    PastPerformance,
    Certification,
    Resume,
    Other,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    #[serde(default = "unknown_document_type")]
    pub document_type: DocumentType,
    #[serde(default)]
    pub s3_key: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

const fn unknown_document_type() -> DocumentType {
    DocumentType::Unknown
}

/// Metadata registering an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    pub document_type: DocumentType,
    pub s3_key: String,
    pub content_type: String,
    pub file_size: u64,
}

/// Request for a presigned upload target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: String,
    pub document_type: DocumentType,
}

/// Where to PUT the file, and the storage key to register it under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub upload_url: String,
    pub s3_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certification {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub certification_number: Option<String>,
    #[serde(default)]
    pub issued_date: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCertification {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certification_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
}

impl NewCertification {
    /// Checks required fields before submit.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] when the name is blank.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.name.trim().is_empty() {
            return Err(QueryError::Validation("certification name is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastPerformance {
    pub id: String,
    pub contract_title: String,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub contract_number: Option<String>,
    #[serde(default)]
    pub contract_value: Option<f64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPastPerformance {
    pub contract_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewPastPerformance {
    /// Checks required fields before submit.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] when the title is blank or the
    /// contract value is negative.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.contract_title.trim().is_empty() {
            return Err(QueryError::Validation("contract title is required".to_string()));
        }
        if self.contract_value.is_some_and(|v| v < 0.0) {
            return Err(QueryError::Validation(
                "contract value cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl Identified for Document {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Certification {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for PastPerformance {
    fn id(&self) -> &str {
        &self.id
    }
}

impl GovAiApi {
    /// `GET /documents`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn list_documents(&self) -> Result<Vec<Document>, QueryError> {
        self.transport
            .request(Method::GET, "/documents", RequestOptions::new())
            .await
    }

    /// `POST /documents`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn create_document(&self, document: &NewDocument) -> Result<Document, QueryError> {
        let options = RequestOptions::new().json(body(document)?);
        self.transport.request(Method::POST, "/documents", options).await
    }

    /// `DELETE /documents/{id}`
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub async fn delete_document(&self, id: &str) -> Result<(), QueryError> {
        self.transport
            .request_empty(Method::DELETE, &path(&["documents", id])?, RequestOptions::new())
            .await
    }

    /// `POST /documents/upload`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn get_upload_url(&self, request: &UploadRequest) -> Result<UploadTarget, QueryError> {
        let options = RequestOptions::new().json(body(request)?);
        self.transport
            .request(Method::POST, "/documents/upload", options)
            .await
    }

    /// `GET /certifications`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn list_certifications(&self) -> Result<Vec<Certification>, QueryError> {
        self.transport
            .request(Method::GET, "/certifications", RequestOptions::new())
            .await
    }

    /// `POST /certifications`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn create_certification(
        &self,
        certification: &NewCertification,
    ) -> Result<Certification, QueryError> {
        let options = RequestOptions::new().json(body(certification)?);
        self.transport
            .request(Method::POST, "/certifications", options)
            .await
    }

    /// `DELETE /certifications/{id}`
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub async fn delete_certification(&self, id: &str) -> Result<(), QueryError> {
        self.transport
            .request_empty(
                Method::DELETE,
                &path(&["certifications", id])?,
                RequestOptions::new(),
            )
            .await
    }

    /// `GET /past-performance`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn list_past_performance(&self) -> Result<Vec<PastPerformance>, QueryError> {
        self.transport
            .request(Method::GET, "/past-performance", RequestOptions::new())
            .await
    }

    /// `POST /past-performance`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn create_past_performance(
        &self,
        record: &NewPastPerformance,
    ) -> Result<PastPerformance, QueryError> {
        let options = RequestOptions::new().json(body(record)?);
        self.transport
            .request(Method::POST, "/past-performance", options)
            .await
    }

    /// `DELETE /past-performance/{id}`
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub async fn delete_past_performance(&self, id: &str) -> Result<(), QueryError> {
        self.transport
            .request_empty(
                Method::DELETE,
                &path(&["past-performance", id])?,
                RequestOptions::new(),
            )
            .await
    }
}
