//! Scripted in-memory [`HttpBackend`] for tests.
//!
//! Routes are matched on method and URL path (query string ignored). Each
//! route holds a queue of responses: they are served in order and the last one
//! repeats, so a route scripted once answers every call the same way.
//!
//! ```
//! use govai_query::transport::mock::MockBackend;
//! use reqwest::{Method, StatusCode};
//! use serde_json::json;
//!
//! let backend = MockBackend::new();
//! backend.respond(Method::GET, "/api/v1/company/me", StatusCode::OK, json!({"id": "c1"}));
//! assert!(backend.requests().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use super::{HttpBackend, HttpRequest, HttpResponse};
use crate::QueryError;

#[derive(Debug, Clone)]
struct Scripted {
    delay: Option<Duration>,
    outcome: Result<HttpResponse, QueryError>,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<(Method, String), VecDeque<Scripted>>,
    requests: Vec<HttpRequest>,
}

/// A backend that answers from a script and records every request.
///
/// Clones share the script and the request log.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `method path` with a JSON body.
    pub fn respond(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.script(method, path, None, Ok(HttpResponse::json(status, &body)));
    }

    /// Like [`respond`](Self::respond), but the response takes `delay` to arrive.
    pub fn respond_after(
        &self,
        method: Method,
        path: &str,
        delay: Duration,
        status: StatusCode,
        body: Value,
    ) {
        self.script(method, path, Some(delay), Ok(HttpResponse::json(status, &body)));
    }

    /// Answers `method path` with an empty body.
    pub fn respond_empty(&self, method: Method, path: &str, status: StatusCode) {
        self.script(method, path, None, Ok(HttpResponse::new(status, Vec::new())));
    }

    /// Fails `method path` before any response, as a dropped connection would.
    pub fn fail(&self, method: Method, path: &str, error: QueryError) {
        self.script(method, path, None, Err(error));
    }

    /// Every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    /// Requests whose URL path equals `path`.
    #[must_use]
    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.url.path() == path)
            .cloned()
            .collect()
    }

    /// Number of requests received for `method path`.
    #[must_use]
    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == *method && r.url.path() == path)
            .count()
    }

    fn script(
        &self,
        method: Method,
        path: &str,
        delay: Option<Duration>,
        outcome: Result<HttpResponse, QueryError>,
    ) {
        self.lock()
            .routes
            .entry((method, path.to_string()))
            .or_default()
            .push_back(Scripted { delay, outcome });
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HttpBackend for MockBackend {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, QueryError>> {
        let scripted = {
            let mut state = self.lock();
            let route = (request.method.clone(), request.url.path().to_string());
            let next = state.routes.get_mut(&route).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });
            state.requests.push(request);
            next
        };

        async move {
            let Some(Scripted { delay, outcome }) = scripted else {
                return Ok(HttpResponse::json(
                    StatusCode::NOT_FOUND,
                    &json!({"detail": "no scripted response"}),
                ));
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;
    use reqwest::header::HeaderMap;

    fn get(path: &str) -> HttpRequest {
        HttpRequest {
            method: Method::GET,
            url: Url::parse(&format!("http://api.test{path}")).expect("valid url"),
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_queued_responses_then_last_repeats() {
        let backend = MockBackend::new();
        backend.respond(Method::GET, "/n", StatusCode::OK, json!(1));
        backend.respond(Method::GET, "/n", StatusCode::OK, json!(2));

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let response = backend.execute(get("/n?x=1")).await.expect("scripted");
            bodies.push(String::from_utf8(response.body).expect("utf8"));
        }
        assert_eq!(bodies, vec!["1", "2", "2"]);
        assert_eq!(backend.count(&Method::GET, "/n"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_route_is_not_found() {
        let backend = MockBackend::new();
        let response = backend.execute(get("/missing")).await.expect("response");
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(backend.requests_to("/missing").len(), 1);
    }

    #[tokio::test]
    async fn test_fail_returns_error() {
        let backend = MockBackend::new();
        backend.fail(
            Method::GET,
            "/down",
            QueryError::Network("connection reset".to_string()),
        );
        let err = backend.execute(get("/down")).await.expect_err("fails");
        assert_eq!(err, QueryError::Network("connection reset".to_string()));
    }
}
