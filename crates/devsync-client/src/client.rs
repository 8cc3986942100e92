//! Workspace synchronization façade.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use futures::{Stream, StreamExt};
use reqwest::Method;
use serde_json::{Value, json};

use crate::decoder::watch_events;
use crate::error::{Error, Result};
use crate::events::{ChangeEvent, SharedEventSink, from_watch_event};
use crate::http::{DEFAULT_TIMEOUT, HttpClient};
use crate::model::{WorkspaceRecord, normalize};
use crate::subscriber::{ChangeFeedSubscriber, ReconnectPolicy};
use crate::token::{
    SharedTokenManager, SharedTokenProvider, StaticTokenProvider, TokenManager,
};

/// Status polls issued after a create that returned no status.
pub const DEFAULT_CREATE_POLL_ATTEMPTS: u32 = 5;

/// Fixed delay between create status polls.
pub const DEFAULT_CREATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How `list` treats a namespace that fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListPolicy {
    /// Keep the namespaces that succeeded and report the rest.
    #[default]
    Partial,
    /// Fail the whole call on the first namespace error.
    FailFast,
}

/// Result of a multi-namespace list.
#[derive(Debug, Default)]
pub struct ListOutcome {
    pub workspaces: Vec<WorkspaceRecord>,
    /// Namespaces that could not be listed, with the reason.
    pub errors: Vec<(String, Error)>,
}

impl ListOutcome {
    /// Whether every namespace was listed.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Client for listing, creating, mutating and watching workspaces.
///
/// Cheap to clone; clones share the HTTP connection pool, the token
/// manager and the push-channel subscriptions.
///
/// # Example
///
/// ```no_run
/// use devsync_client::{WorkspaceSyncClient, channel_sink};
///
/// # async fn example() -> devsync_client::Result<()> {
/// let client = WorkspaceSyncClient::builder()
///     .base_url("http://localhost:8080/api")
///     .bearer_token("secret")
///     .build()?;
///
/// let outcome = client.list(&["alice-che"]).await?;
/// for workspace in &outcome.workspaces {
///     println!("{} {}", workspace.name, workspace.status);
/// }
///
/// let (sink, mut events) = channel_sink();
/// client.subscribe(["alice-che"], sink)?;
/// while let Some(event) = events.recv().await {
///     println!("{} -> {}", event.workspace_id, event.status());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkspaceSyncClient {
    http: HttpClient,
    subscriber: Arc<ChangeFeedSubscriber>,
    list_policy: ListPolicy,
    create_poll_attempts: u32,
    create_poll_interval: Duration,
}

impl WorkspaceSyncClient {
    /// Create a new client builder.
    pub fn builder() -> WorkspaceSyncClientBuilder {
        WorkspaceSyncClientBuilder::new()
    }

    /// Underlying authenticated HTTP client.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Push-channel subscriber shared by all clones.
    pub fn subscriber(&self) -> &ChangeFeedSubscriber {
        &self.subscriber
    }

    pub fn list_policy(&self) -> ListPolicy {
        self.list_policy
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// List workspaces across `namespaces` using the configured policy.
    pub async fn list<S: AsRef<str>>(&self, namespaces: &[S]) -> Result<ListOutcome> {
        self.list_with(namespaces, self.list_policy).await
    }

    /// List workspaces across `namespaces`, one concurrent request each.
    ///
    /// With [`ListPolicy::Partial`] the call itself does not fail; namespaces
    /// that could not be listed are reported in [`ListOutcome::errors`].
    pub async fn list_with<S: AsRef<str>>(
        &self,
        namespaces: &[S],
        policy: ListPolicy,
    ) -> Result<ListOutcome> {
        let requests = namespaces.iter().map(|ns| self.list_namespace(ns.as_ref()));

        match policy {
            ListPolicy::FailFast => {
                let pages = try_join_all(requests).await?;
                Ok(ListOutcome {
                    workspaces: pages.into_iter().flatten().collect(),
                    errors: Vec::new(),
                })
            }
            ListPolicy::Partial => {
                let pages = join_all(requests).await;
                let mut outcome = ListOutcome::default();
                for (ns, page) in namespaces.iter().zip(pages) {
                    match page {
                        Ok(records) => outcome.workspaces.extend(records),
                        Err(e) => {
                            tracing::warn!(namespace = ns.as_ref(), error = %e, "listing namespace failed");
                            outcome.errors.push((ns.as_ref().to_string(), e));
                        }
                    }
                }
                Ok(outcome)
            }
        }
    }

    async fn list_namespace(&self, namespace: &str) -> Result<Vec<WorkspaceRecord>> {
        let body: Value = self
            .http
            .get(&format!("workspace/namespace/{}", namespace))
            .await?;

        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut object) => match object.remove("items") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(Error::UnrecognizedFormat(
                        "list response has no items array".to_string(),
                    ));
                }
            },
            _ => {
                return Err(Error::UnrecognizedFormat(
                    "list response is neither an array nor a list object".to_string(),
                ));
            }
        };

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match normalize(item) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(namespace, error = %e, "dropping unrecognized workspace"),
            }
        }
        tracing::debug!(namespace, count = records.len(), "listed workspaces");
        Ok(records)
    }

    /// Fetch one workspace. A missing workspace is [`Error::NotFound`].
    pub async fn get(&self, namespace: &str, name: &str) -> Result<WorkspaceRecord> {
        let raw: Value = self
            .http
            .get(&format!("workspace/namespace/{}/{}", namespace, name))
            .await?;
        normalize(raw)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a workspace from `devfile`.
    ///
    /// If the backend answers before a status is populated, the workspace
    /// is polled a bounded number of times with a fixed delay. When no
    /// status shows up the call fails with [`Error::CreatePending`]; the
    /// workspace itself has been accepted.
    pub async fn create(&self, devfile: &Value, namespace: Option<&str>) -> Result<WorkspaceRecord> {
        let path = match namespace {
            Some(ns) => format!("workspace/namespace/{}", ns),
            None => "workspace".to_string(),
        };
        let raw: Value = self.http.post(&path, devfile).await?;
        let created = normalize(raw)?;
        if created.has_status() {
            return Ok(created);
        }

        let ns = if created.namespace.is_empty() {
            namespace.unwrap_or_default().to_string()
        } else {
            created.namespace.clone()
        };
        tracing::debug!(namespace = %ns, name = %created.name, "create accepted, polling for status");

        for attempt in 1..=self.create_poll_attempts {
            tokio::time::sleep(self.create_poll_interval).await;
            match self.get(&ns, &created.name).await {
                Ok(record) if record.has_status() => return Ok(record),
                Ok(_) => tracing::debug!(attempt, "status not populated yet"),
                Err(e) if e.is_not_found() => tracing::debug!(attempt, "workspace not visible yet"),
                Err(e) => return Err(e),
            }
        }

        Err(Error::CreatePending {
            namespace: ns,
            name: created.name,
            attempts: self.create_poll_attempts,
        })
    }

    /// Replace a workspace's devfile.
    pub async fn update(&self, namespace: &str, name: &str, devfile: &Value) -> Result<WorkspaceRecord> {
        let raw: Value = self
            .http
            .put(&format!("workspace/namespace/{}/{}", namespace, name), devfile)
            .await?;
        normalize(raw)
    }

    /// Delete a workspace. Deleting one that is already gone succeeds.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .http
            .delete(&format!("workspace/namespace/{}/{}", namespace, name))
            .await
        {
            Err(e) if e.is_not_found() => {
                tracing::debug!(namespace, name, "workspace already deleted");
                Ok(())
            }
            other => other,
        }
    }

    /// Merge-patch the `started` flag of `workspace`.
    pub async fn set_started(&self, workspace: &WorkspaceRecord, started: bool) -> Result<WorkspaceRecord> {
        let raw: Value = self
            .http
            .merge_patch(
                &format!("workspace/namespace/{}/{}", workspace.namespace, workspace.name),
                &json!({ "started": started }),
            )
            .await?;
        normalize(raw)
    }

    pub async fn start(&self, workspace: &WorkspaceRecord) -> Result<WorkspaceRecord> {
        self.set_started(workspace, true).await
    }

    pub async fn stop(&self, workspace: &WorkspaceRecord) -> Result<WorkspaceRecord> {
        self.set_started(workspace, false).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Change feeds
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a push channel per namespace, all delivering into `sink`.
    ///
    /// Namespaces that are already subscribed get a fresh channel.
    pub fn subscribe<I, S>(&self, namespaces: I, sink: SharedEventSink) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ns in namespaces {
            self.subscriber.subscribe(ns.as_ref(), Arc::clone(&sink))?;
        }
        Ok(())
    }

    /// Close the push channel for `namespace`.
    pub fn unsubscribe(&self, namespace: &str) -> bool {
        self.subscriber.unsubscribe(namespace)
    }

    pub fn unsubscribe_all(&self) {
        self.subscriber.unsubscribe_all();
    }

    /// Namespaces whose push channel closed abnormally.
    pub fn failing_channels(&self) -> Vec<String> {
        self.subscriber.failing_channels()
    }

    /// Stream changes for `namespace` over a long-lived HTTP watch.
    ///
    /// Records that fail to decode or normalize are logged and skipped. An
    /// `ERROR` record or a transport failure is yielded once and ends the
    /// stream.
    pub async fn watch(
        &self,
        namespace: &str,
    ) -> Result<impl Stream<Item = Result<ChangeEvent>> + Send + 'static> {
        let response = self
            .http
            .send_streaming(
                Method::GET,
                &format!("workspace/namespace/{}?watch=true", namespace),
            )
            .await?;
        tracing::info!(namespace, "watch stream open");

        let namespace = namespace.to_string();
        let records = watch_events(response.bytes_stream());

        Ok(async_stream::stream! {
            futures::pin_mut!(records);
            while let Some(record) = records.next().await {
                let record = match record {
                    Ok(record) => record,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                match from_watch_event(&namespace, record) {
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => {}
                    Err(e @ Error::Http { .. }) => {
                        yield Err(e);
                        return;
                    }
                    Err(e) => tracing::warn!(namespace = %namespace, error = %e, "skipping unrecognized watch record"),
                }
            }
        })
    }
}

impl std::fmt::Debug for WorkspaceSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceSyncClient")
            .field("base_url", &self.http.base_url().as_str())
            .field("list_policy", &self.list_policy)
            .field("create_poll_attempts", &self.create_poll_attempts)
            .field("create_poll_interval", &self.create_poll_interval)
            .finish()
    }
}

/// Builder for [`WorkspaceSyncClient`].
pub struct WorkspaceSyncClientBuilder {
    base_url: Option<String>,
    tokens: Option<SharedTokenManager>,
    timeout: Duration,
    user_agent: Option<String>,
    list_policy: ListPolicy,
    create_poll_attempts: u32,
    create_poll_interval: Duration,
    reconnect: Option<ReconnectPolicy>,
}

impl WorkspaceSyncClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            tokens: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
            list_policy: ListPolicy::default(),
            create_poll_attempts: DEFAULT_CREATE_POLL_ATTEMPTS,
            create_poll_interval: DEFAULT_CREATE_POLL_INTERVAL,
            reconnect: None,
        }
    }

    /// Set the backend API root, e.g. `https://che.example.com/api`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Use `provider` behind a default [`TokenManager`].
    pub fn token_provider(self, provider: SharedTokenProvider) -> Self {
        self.token_manager(Arc::new(TokenManager::new(provider)))
    }

    /// Use an already configured token manager.
    pub fn token_manager(mut self, tokens: SharedTokenManager) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Authenticate with a fixed bearer token.
    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.token_provider(Arc::new(StaticTokenProvider::new(token)))
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn list_policy(mut self, policy: ListPolicy) -> Self {
        self.list_policy = policy;
        self
    }

    pub fn create_poll_attempts(mut self, attempts: u32) -> Self {
        self.create_poll_attempts = attempts;
        self
    }

    pub fn create_poll_interval(mut self, interval: Duration) -> Self {
        self.create_poll_interval = interval;
        self
    }

    /// Re-open abnormally closed push channels.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<WorkspaceSyncClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;
        let tokens = self
            .tokens
            .ok_or_else(|| Error::Config("a token provider is required".to_string()))?;

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("devsync-client/{}", env!("CARGO_PKG_VERSION")));
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;
        let http = HttpClient::with_client(http, &base_url, Arc::clone(&tokens), self.timeout)?;

        let mut subscriber = ChangeFeedSubscriber::new(http.base_url(), tokens)?;
        if let Some(policy) = self.reconnect {
            subscriber = subscriber.with_reconnect(policy);
        }

        Ok(WorkspaceSyncClient {
            http,
            subscriber: Arc::new(subscriber),
            list_policy: self.list_policy,
            create_poll_attempts: self.create_poll_attempts,
            create_poll_interval: self.create_poll_interval,
        })
    }
}

impl Default for WorkspaceSyncClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkspaceStatus;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dev_workspace(ns: &str, name: &str, phase: Option<&str>) -> Value {
        let mut workspace = json!({
            "kind": "DevWorkspace",
            "metadata": { "name": name, "namespace": ns, "uid": format!("uid-{}", name) },
            "spec": { "started": phase.is_some() }
        });
        if let Some(phase) = phase {
            workspace["status"] = json!({ "phase": phase, "workspaceId": format!("id-{}", name) });
        }
        workspace
    }

    fn client_for(server: &MockServer) -> WorkspaceSyncClient {
        WorkspaceSyncClient::builder()
            .base_url(format!("{}/api", server.uri()))
            .bearer_token("test-token")
            .create_poll_interval(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_base_url_and_tokens() {
        assert!(matches!(
            WorkspaceSyncClient::builder().bearer_token("t").build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            WorkspaceSyncClient::builder().base_url("http://localhost").build(),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_list_partial_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([dev_workspace("ns1", "ws1", Some("Running"))])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns2"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client.list(&["ns1", "ns2"]).await.unwrap();

        assert!(!outcome.is_complete());
        assert_eq!(outcome.workspaces.len(), 1);
        assert_eq!(outcome.workspaces[0].name, "ws1");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].0, "ns2");
        assert!(outcome.errors[0].1.is_server_error());

        let failed = client.list_with(&["ns1", "ns2"], ListPolicy::FailFast).await;
        assert!(matches!(failed, Err(Error::Http { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_list_accepts_item_lists_and_drops_bad_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "DevWorkspaceList",
                "items": [
                    dev_workspace("ns1", "ws1", Some("Stopped")),
                    { "kind": "Pod", "metadata": { "name": "nope" } },
                    {
                        "id": "legacy-1",
                        "status": "RUNNING",
                        "devfile": { "metadata": { "name": "ws2" } },
                        "attributes": { "infrastructureNamespace": "ns1" }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let outcome = client_for(&server).list(&["ns1"]).await.unwrap();
        assert!(outcome.is_complete());
        let names: Vec<_> = outcome.workspaces.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["ws1", "ws2"]);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server).get("ns1", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_returns_immediate_status() {
        let server = MockServer::start().await;
        let devfile = json!({ "metadata": { "name": "ws1" } });
        Mock::given(method("POST"))
            .and(path("/api/workspace/namespace/ns1"))
            .and(body_json(devfile.clone()))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(dev_workspace("ns1", "ws1", Some("Starting"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let record = client_for(&server)
            .create(&devfile, Some("ns1"))
            .await
            .unwrap();
        assert_eq!(record.status, WorkspaceStatus::Starting);
        assert_eq!(record.id, "id-ws1");
    }

    #[tokio::test]
    async fn test_create_polls_until_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workspace/namespace/ns1"))
            .respond_with(ResponseTemplate::new(201).set_body_json(dev_workspace("ns1", "ws1", None)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1/ws1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(dev_workspace("ns1", "ws1", None)))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1/ws1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(dev_workspace("ns1", "ws1", Some("Starting"))),
            )
            .mount(&server)
            .await;

        let record = client_for(&server)
            .create(&json!({}), Some("ns1"))
            .await
            .unwrap();
        assert_eq!(record.status, WorkspaceStatus::Starting);

        let polls = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "GET")
            .count();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn test_create_pending_after_bounded_polls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workspace"))
            .respond_with(ResponseTemplate::new(201).set_body_json(dev_workspace("ns1", "ws1", None)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1/ws1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(dev_workspace("ns1", "ws1", None)))
            .expect(5)
            .mount(&server)
            .await;

        let err = client_for(&server).create(&json!({}), None).await.unwrap_err();
        match err {
            Error::CreatePending {
                namespace,
                name,
                attempts,
            } => {
                assert_eq!(namespace, "ns1");
                assert_eq!(name, "ws1");
                assert_eq!(attempts, DEFAULT_CREATE_POLL_ATTEMPTS);
            }
            other => panic!("expected CreatePending, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/workspace/namespace/ns1/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/workspace/namespace/ns1/ws1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/workspace/namespace/ns1/locked"))
            .respond_with(ResponseTemplate::new(409).set_body_string("in use"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.delete("ns1", "gone").await.unwrap();
        client.delete("ns1", "ws1").await.unwrap();
        assert!(client.delete("ns1", "locked").await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_set_started_merges_flag() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/workspace/namespace/ns1/ws1"))
            .and(header("content-type", "application/merge-patch+json"))
            .and(body_json(json!({ "started": true })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(dev_workspace("ns1", "ws1", Some("Starting"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let stopped = normalize(dev_workspace("ns1", "ws1", Some("Stopped"))).unwrap();
        let record = client.start(&stopped).await.unwrap();
        assert_eq!(record.started, Some(true));
        assert_eq!(record.status, WorkspaceStatus::Starting);
    }

    #[tokio::test]
    async fn test_update_replaces_devfile() {
        let server = MockServer::start().await;
        let devfile = dev_workspace("ns1", "ws1", None);
        Mock::given(method("PUT"))
            .and(path("/api/workspace/namespace/ns1/ws1"))
            .and(body_json(devfile.clone()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(dev_workspace("ns1", "ws1", Some("Stopped"))),
            )
            .mount(&server)
            .await;

        let record = client_for(&server)
            .update("ns1", "ws1", &devfile)
            .await
            .unwrap();
        assert_eq!(record.status, WorkspaceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_watch_streams_change_events() {
        let server = MockServer::start().await;
        let body = [
            json!({ "type": "ADDED", "object": dev_workspace("ns1", "ws1", Some("Starting")) }).to_string(),
            json!({ "type": "BOOKMARK", "object": {} }).to_string(),
            "not json".to_string(),
            json!({ "type": "MODIFIED", "object": { "kind": "Pod" } }).to_string(),
            json!({ "type": "MODIFIED", "object": dev_workspace("ns1", "ws1", Some("Running")) }).to_string(),
        ]
        .join("\n");
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1"))
            .and(query_param("watch", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let events: Vec<_> = client_for(&server)
            .watch("ns1")
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        let first = events[0].as_ref().unwrap();
        let second = events[1].as_ref().unwrap();
        assert_eq!(first.kind, crate::events::ChangeKind::Added);
        assert_eq!(second.status(), WorkspaceStatus::Running);
        assert_eq!(second.namespace, "ns1");
    }

    #[tokio::test]
    async fn test_watch_error_record_ends_stream() {
        let server = MockServer::start().await;
        let body = [
            json!({ "type": "ERROR", "object": { "code": 410, "message": "expired" } }).to_string(),
            json!({ "type": "ADDED", "object": dev_workspace("ns1", "ws1", Some("Running")) }).to_string(),
        ]
        .join("\n");
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1"))
            .and(query_param("watch", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let events: Vec<_> = client_for(&server)
            .watch("ns1")
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(Error::Http { status: 410, .. })));
    }
}
