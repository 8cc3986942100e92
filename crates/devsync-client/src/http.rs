//! Authenticated request/response layer.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Response};
use url::Url;

use crate::error::{Error, Result};
use crate::token::SharedTokenManager;

/// Default timeout for requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Content type for partial updates.
pub const MERGE_PATCH_JSON: &str = "application/merge-patch+json";

/// HTTP client that attaches a fresh bearer token to every request.
///
/// With a provider that does not use sessions requests are sent without
/// an `Authorization` header.
///
/// Token staleness is resolved through the shared [`TokenManager`], so any
/// number of concurrently dispatched requests wait on a single refresh.
/// Failed application requests are never retried here.
///
/// [`TokenManager`]: crate::token::TokenManager
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    http: reqwest::Client,
    base_url: Url,
    tokens: SharedTokenManager,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client rooted at `base_url`.
    pub fn new(base_url: &str, tokens: SharedTokenManager) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("devsync-client/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(http, base_url, tokens, DEFAULT_TIMEOUT)
    }

    /// Create a client from a preconfigured `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        tokens: SharedTokenManager,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(HttpInner {
                http,
                base_url: normalize_base_url(base_url)?,
                tokens,
                timeout,
            }),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Token manager used for every request.
    pub fn tokens(&self) -> &SharedTokenManager {
        &self.inner.tokens
    }

    /// Build a URL for an API path.
    pub fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner.base_url.join(path).map_err(Error::from)
    }

    /// Send an authenticated request.
    ///
    /// Non-2xx responses become [`Error::NotFound`], [`Error::Conflict`] or
    /// [`Error::Http`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        headers: Option<HeaderMap>,
    ) -> Result<Response> {
        self.dispatch(method, path, body, headers, Some(self.inner.timeout))
            .await
    }

    /// Like [`send`](Self::send) but without a total timeout, for
    /// long-lived streaming responses.
    pub async fn send_streaming(&self, method: Method, path: &str) -> Result<Response> {
        self.dispatch(method, path, None, None, None).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        headers: Option<HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let url = self.url(path)?;
        let token = self.inner.tokens.authorization().await?;

        tracing::debug!(%method, %url, authenticated = token.is_some(), "dispatching request");

        let mut request = self.inner.http.request(method, url);
        if let Some(token) = token {
            let auth = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| Error::Auth("token is not a valid header value".to_string()))?;
            request = request.header(AUTHORIZATION, auth);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(extract_error(path, response).await)
        }
    }

    /// Make a GET request.
    pub(crate) async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None, None).await?;
        decode_json(path, response).await
    }

    /// Make a POST request.
    pub(crate) async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self.send(Method::POST, path, Some(body), None).await?;
        decode_json(path, response).await
    }

    /// Make a PUT request.
    pub(crate) async fn put<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self.send(Method::PUT, path, Some(body), None).await?;
        decode_json(path, response).await
    }

    /// Make a JSON merge-patch request.
    pub(crate) async fn merge_patch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(MERGE_PATCH_JSON));
        let response = self
            .send(Method::PATCH, path, Some(body), Some(headers))
            .await?;
        decode_json(path, response).await
    }

    /// Make a DELETE request.
    pub(crate) async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, None, None).await?;
        Ok(())
    }
}

/// Parse and normalize a base URL so relative joins keep its path.
pub(crate) fn normalize_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

/// Read a successful response body and decode it as JSON.
///
/// Only reading the body is a transport concern; a body that is not JSON
/// (a login page, a proxy error) is [`Error::Json`].
async fn decode_json<T: serde::de::DeserializeOwned>(path: &str, response: Response) -> Result<T> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(path, error = %e, "response body is not valid JSON");
        Error::Json(e)
    })
}

/// Extract an error from a failed response.
async fn extract_error(path: &str, response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status, path, "request failed");

    match status {
        404 => Error::NotFound(if body.is_empty() {
            path.to_string()
        } else {
            body
        }),
        409 => Error::Conflict(body),
        _ => Error::Http { status, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Credential, NoAuthProvider, StaticTokenProvider, TokenManager, TokenProvider};
    use async_trait::async_trait;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn static_client(base: &str) -> HttpClient {
        let tokens = Arc::new(TokenManager::new(Arc::new(StaticTokenProvider::new("abc"))));
        HttpClient::new(base, tokens).unwrap()
    }

    #[derive(Debug)]
    struct ExpiringProvider {
        current: RwLock<Credential>,
        refreshes: AtomicU32,
    }

    #[async_trait]
    impl TokenProvider for ExpiringProvider {
        fn current_token(&self) -> Option<Credential> {
            Some(self.current.read().clone())
        }

        async fn refresh(&self, _min_validity: Duration) -> Result<Credential> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let fresh = Credential::expiring_in("fresh", Duration::from_secs(600));
            *self.current.write() = fresh.clone();
            Ok(fresh)
        }
    }

    #[test]
    fn test_url_building() {
        let client = static_client("http://localhost:8080/api");
        assert_eq!(client.base_url().as_str(), "http://localhost:8080/api/");

        let url = client.url("workspace/namespace/ns1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/workspace/namespace/ns1");

        let url = client.url("/workspace").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/workspace");
    }

    #[test]
    fn test_invalid_base_url() {
        let tokens = Arc::new(TokenManager::new(Arc::new(StaticTokenProvider::new("abc"))));
        assert!(matches!(
            HttpClient::new("not a url", tokens),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_bearer_header_attached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/workspace"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = static_client(&server.uri());
        let list: Vec<serde_json::Value> = client.get("workspace").await.unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/taken"))
            .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
            .mount(&server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = static_client(&server.uri());

        let err = client.delete("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref p) if p == "missing"));

        let err = client
            .post::<serde_json::Value>("taken", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ref b) if b == "already exists"));

        let err = client.get::<serde_json::Value>("broken").await.unwrap_err();
        match err {
            Error::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_merge_patch_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(header("content-type", MERGE_PATCH_JSON))
            .and(body_json(serde_json::json!({ "started": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = static_client(&server.uri());
        let value: serde_json::Value = client
            .merge_patch("workspace/namespace/ns/ws", &serde_json::json!({ "started": true }))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_concurrent_requests_refresh_once() {
        let server = MockServer::start().await;
        Mock::given(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(5)
            .mount(&server)
            .await;

        let provider = Arc::new(ExpiringProvider {
            current: RwLock::new(Credential::expiring_in("stale", Duration::from_secs(1))),
            refreshes: AtomicU32::new(0),
        });
        let tokens = Arc::new(TokenManager::new(provider.clone()));
        let client = HttpClient::new(&server.uri(), tokens).unwrap();

        let results = futures::future::join_all(
            (0..5).map(|_| client.get::<serde_json::Value>("workspace")),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_prevents_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let tokens = Arc::new(TokenManager::new(Arc::new(StaticTokenProvider::anonymous())));
        let client = HttpClient::new(&server.uri(), tokens).unwrap();
        let err = client.get::<serde_json::Value>("workspace").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn test_non_json_success_body_is_json_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/workspace"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>login</html>"),
            )
            .mount(&server)
            .await;

        let client = static_client(&server.uri());
        let err = client.get::<serde_json::Value>("workspace").await.unwrap_err();
        assert!(matches!(err, Error::Json(_)), "got {:?}", err);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_no_auth_sends_without_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/workspace"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = Arc::new(TokenManager::new(Arc::new(NoAuthProvider)));
        let client = HttpClient::new(&server.uri(), tokens).unwrap();
        let list: Vec<serde_json::Value> = client.get("workspace").await.unwrap();
        assert!(list.is_empty());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let client = static_client("http://127.0.0.1:9");
        let err = client.get::<serde_json::Value>("workspace").await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert!(err.is_transient());
    }
}
