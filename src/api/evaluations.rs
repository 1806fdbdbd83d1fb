//! Evaluation maintenance: stale counts, rescoring and single refreshes.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{GovAiApi, path};
use super::opportunities::{ActionMessage, Evaluation};
use crate::QueryError;
use crate::transport::RequestOptions;

/// Number of evaluations scored against an outdated company profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleCount {
    pub stale_count: u64,
}

impl GovAiApi {
    /// `GET /evaluations/stale-count`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn stale_count(&self) -> Result<StaleCount, QueryError> {
        self.transport
            .request(Method::GET, "/evaluations/stale-count", RequestOptions::new())
            .await
    }

    /// `POST /evaluations/rescore-all`, with the long timeout.
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn rescore_all(&self) -> Result<ActionMessage, QueryError> {
        let options = RequestOptions::new().timeout(self.transport.config().long_timeout);
        self.transport
            .request(Method::POST, "/evaluations/rescore-all", options)
            .await
    }

    /// `POST /evaluations/{id}/refresh`
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn refresh_evaluation(&self, id: &str) -> Result<Evaluation, QueryError> {
        self.transport
            .request(
                Method::POST,
                &path(&["evaluations", id, "refresh"])?,
                RequestOptions::new(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::opportunities::tests::evaluation_json;
    use crate::config::ClientConfig;
    use crate::transport::Transport;
    use crate::transport::mock::MockBackend;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    fn api(backend: &MockBackend) -> GovAiApi {
        GovAiApi::new(Transport::new(
            backend.clone(),
            ClientConfig::new("http://api.test/api/v1").with_long_timeout(Duration::from_secs(300)),
        ))
    }

    #[tokio::test]
    async fn test_stale_count() {
        let backend = MockBackend::new();
        backend.respond(
            Method::GET,
            "/api/v1/evaluations/stale-count",
            StatusCode::OK,
            json!({"stale_count": 12}),
        );
        let count = api(&backend).stale_count().await.expect("count");
        assert_eq!(count.stale_count, 12);
    }

    #[tokio::test]
    async fn test_rescore_all_uses_long_timeout() {
        let backend = MockBackend::new();
        backend.respond(
            Method::POST,
            "/api/v1/evaluations/rescore-all",
            StatusCode::OK,
            json!({"message": "Rescoring 12 evaluations"}),
        );
        let ack = api(&backend).rescore_all().await.expect("ack");
        assert_eq!(ack.message, "Rescoring 12 evaluations");
        assert_eq!(backend.requests()[0].timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_refresh_evaluation() {
        let backend = MockBackend::new();
        backend.respond(
            Method::POST,
            "/api/v1/evaluations/e7/refresh",
            StatusCode::OK,
            evaluation_json("e7", "Grid modernization", None),
        );
        let evaluation = api(&backend).refresh_evaluation("e7").await.expect("refreshed");
        assert_eq!(evaluation.id, "e7");
        assert_eq!(backend.count(&Method::POST, "/api/v1/evaluations/e7/refresh"), 1);
    }
}
