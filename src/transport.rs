//! HTTP transport: one request in, one parsed body or typed error out.
//!
//! [`Transport`] owns the base URL, default headers, timeouts and bearer
//! token attachment. The wire itself sits behind the [`HttpBackend`] trait:
//! [`ReqwestBackend`] in production, [`mock::MockBackend`] in tests.
//!
//! The transport never retries; retry policy belongs to the caller.

pub mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::QueryError;
use crate::config::ClientConfig;

/// A fully resolved request handed to an [`HttpBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Path plus query string, e.g. `/opportunities?limit=20`.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    /// The bearer token attached to this request, if any.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    /// The JSON body, if this request carries one.
    #[must_use]
    pub const fn json(&self) -> Option<&Value> {
        match &self.body {
            Some(RequestBody::Json(value)) => Some(value),
            _ => None,
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Json(Value),
    Bytes { content_type: String, data: Vec<u8> },
}

/// Raw response handed back by an [`HttpBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A response with a JSON body.
    #[must_use]
    pub fn json(status: StatusCode, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }
}

/// The network seam: sends one request and returns the raw response.
///
/// Implementations map connection failures to [`QueryError::Network`] and
/// their own timeouts to [`QueryError::Timeout`]. Status codes are not
/// interpreted here.
pub trait HttpBackend: Send + Sync + 'static {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, QueryError>>;
}

/// [`HttpBackend`] over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    /// Creates a backend from the transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Network`] if the TLS backend cannot be initialized.
    pub fn new(config: &ClientConfig) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.long_timeout)
            .build()
            .map_err(|e| QueryError::Network(format!("HTTP client error: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, QueryError>> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(timeout);
        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Bytes { content_type, data }) => {
                builder.header(header::CONTENT_TYPE, content_type).body(data)
            }
            None => builder,
        };

        async move {
            let map_err = |e: reqwest::Error| {
                if e.is_timeout() {
                    QueryError::Timeout(timeout)
                } else {
                    QueryError::Network(e.to_string())
                }
            };
            let response = builder.send().await.map_err(map_err)?;
            let status = response.status();
            let body = response.bytes().await.map_err(map_err)?;
            Ok(HttpResponse::new(status, body.to_vec()))
        }
        .boxed()
    }
}

/// Source of the bearer token attached to authenticated requests.
///
/// Where the token is stored is up to the host application.
pub trait TokenProvider: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(pub String);

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Per-request options for [`Transport::request`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    pub token: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// Appends query parameters in order.
    #[must_use]
    pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: ToString,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.to_string())));
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the token for this request, overriding the transport's provider.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides the transport's default timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Thin HTTP client bound to the GovAI API base URL.
#[derive(Clone)]
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    config: ClientConfig,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("authenticated", &self.tokens.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a transport over `backend`.
    pub fn new(backend: impl HttpBackend, config: ClientConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
            tokens: None,
        }
    }

    /// Creates a transport over a reqwest client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn reqwest(config: ClientConfig) -> Result<Self, QueryError> {
        let backend = ReqwestBackend::new(&config)?;
        Ok(Self::new(backend, config))
    }

    /// Attaches tokens from `provider` to every request that does not carry its own.
    #[must_use]
    pub fn with_token_provider(mut self, provider: impl TokenProvider) -> Self {
        self.tokens = Some(Arc::new(provider));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one request against the API and parses the JSON body.
    ///
    /// # Errors
    ///
    /// - [`QueryError::Http`] for non-2xx responses
    /// - [`QueryError::Decode`] if the body is not a valid `T`
    /// - [`QueryError::Timeout`] / [`QueryError::Network`] from the backend
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, QueryError> {
        let response = self.send(method, path, options).await?;
        serde_json::from_slice(&response.body).map_err(|e| QueryError::Decode(e.to_string()))
    }

    /// Like [`request`](Self::request) but ignores the response body.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request), minus decoding.
    pub async fn request_empty(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<(), QueryError> {
        self.send(method, path, options).await.map(drop)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, QueryError> {
        let mut url = self.url(path)?;
        if !options.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&options.params);
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let token = options
            .token
            .or_else(|| self.tokens.as_ref().and_then(|p| p.token()));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| QueryError::Validation(format!("invalid token: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let request = HttpRequest {
            method,
            url,
            headers,
            body: options.body.map(RequestBody::Json),
            timeout: options.timeout.unwrap_or(self.config.timeout),
        };
        self.dispatch(request).await
    }

    /// Sends an anonymous raw `PUT` to an absolute URL, such as a presigned
    /// storage URL. No API headers or token are attached.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request), minus decoding.
    pub async fn put_object(
        &self,
        url: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), QueryError> {
        let url = Url::parse(url).map_err(|e| QueryError::Validation(format!("bad URL {url}: {e}")))?;
        let request = HttpRequest {
            method: Method::PUT,
            url,
            headers: HeaderMap::new(),
            body: Some(RequestBody::Bytes {
                content_type: content_type.to_string(),
                data,
            }),
            timeout: self.config.long_timeout,
        };
        self.dispatch(request).await.map(drop)
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, QueryError> {
        let method = request.method.clone();
        let path = request.url.path().to_string();
        let timeout = request.timeout;

        let response = tokio::time::timeout(timeout, self.backend.execute(request))
            .await
            .map_err(|_| QueryError::Timeout(timeout))??;

        debug!(%method, %path, status = response.status.as_u16(), "request completed");
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(QueryError::Http {
                status: response.status.as_u16(),
                detail: error_detail(response.status, &response.body),
            })
        }
    }

    fn url(&self, path: &str) -> Result<Url, QueryError> {
        let base = self.config.base_url.trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        };
        Url::parse(&joined).map_err(|e| QueryError::Validation(format!("bad URL {joined}: {e}")))
    }
}

/// Extracts a human-readable error from a failed response body.
///
/// Looks at `detail`, then `error`, then `message`. Validation error lists
/// (`[{"msg": ...}, ...]`) are joined with `"; "`. Falls back to a generic
/// message for the status.
#[must_use]
pub fn error_detail(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|field| value.get(field).and_then(describe))
        })
        .unwrap_or_else(|| generic_message(status).to_string())
}

fn describe(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let messages: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    other => other.get("msg").and_then(Value::as_str).map(str::to_string),
                })
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        Value::Object(_) => value.get("message").and_then(describe),
        _ => None,
    }
}

const fn generic_message(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "Bad request",
        401 => "Not authenticated",
        403 => "Not permitted",
        404 => "Not found",
        409 => "Conflict",
        422 => "Validation failed",
        429 => "Too many requests",
        500..=599 => "Server error",
        _ => "Request failed",
    }
}
