//! Document upload: request a target, transfer the file, register it.
//!
//! The three steps run strictly in order, each feeding the next. Each step
//! fails with its own [`UploadError`] variant. A failed registration leaves
//! the stored object without a record; that orphan is reported, not cleaned
//! up.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::QueryError;
use crate::api::{Document, DocumentType, GovAiApi, NewDocument, UploadRequest, UploadTarget};
use crate::command::Command;
use crate::keys;
use crate::subscription::http::QueryClient;

/// Which upload step failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// No upload URL could be obtained. Nothing was stored.
    #[error("could not get an upload URL: {0}")]
    Target(#[source] QueryError),

    /// The file transfer failed. No document was registered.
    #[error("upload failed: {0}")]
    Transfer(#[source] QueryError),

    /// The file is stored under `s3_key` but no document record was created.
    #[error("registration failed for stored file {s3_key}: {source}")]
    Registration {
        s3_key: String,
        #[source]
        source: QueryError,
    },
}

impl UploadError {
    /// The underlying request error.
    #[must_use]
    pub const fn cause(&self) -> &QueryError {
        match self {
            Self::Target(e) | Self::Transfer(e) | Self::Registration { source: e, .. } => e,
        }
    }
}

/// A file chosen for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: String,
    pub document_type: DocumentType,
    pub data: Vec<u8>,
}

/// Runs the upload flow and refreshes the cached document list on success.
#[derive(Debug, Clone)]
pub struct DocumentUploader {
    api: GovAiApi,
    client: QueryClient,
}

impl DocumentUploader {
    #[must_use]
    pub const fn new(api: GovAiApi, client: QueryClient) -> Self {
        Self { api, client }
    }

    /// Uploads `file` and returns the registered document.
    ///
    /// `["documents"]` is invalidated only after registration succeeds.
    ///
    /// # Errors
    ///
    /// Returns the [`UploadError`] variant of the step that failed.
    pub async fn upload(&self, file: UploadFile) -> Result<Document, UploadError> {
        let UploadFile {
            filename,
            content_type,
            document_type,
            data,
        } = file;

        let request = UploadRequest {
            filename: filename.clone(),
            content_type: content_type.clone(),
            document_type,
        };
        let UploadTarget { upload_url, s3_key } = self
            .api
            .get_upload_url(&request)
            .await
            .map_err(UploadError::Target)?;
        debug!(%s3_key, "upload target issued");

        let file_size = data.len() as u64;
        self.api
            .transport()
            .put_object(&upload_url, data, &content_type)
            .await
            .map_err(|e| {
                warn!(%s3_key, error = %e, "file transfer failed");
                UploadError::Transfer(e)
            })?;

        let registration = NewDocument {
            filename,
            document_type,
            s3_key: s3_key.clone(),
            content_type,
            file_size,
        };
        let document = match self.api.create_document(&registration).await {
            Ok(document) => document,
            Err(source) => {
                warn!(%s3_key, error = %source, "stored file left without a document record");
                return Err(UploadError::Registration { s3_key, source });
            }
        };

        self.client.invalidate(&keys::documents());
        info!(id = %document.id, %s3_key, "document uploaded");
        Ok(document)
    }

    /// Runs [`upload`](Self::upload) as a [`Command`].
    pub fn command(&self, file: UploadFile) -> Command<Result<Document, UploadError>> {
        let uploader = self.clone();
        Command::future(async move { uploader.upload(file).await })
    }
}
