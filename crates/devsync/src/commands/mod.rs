//! CLI command handlers.

pub mod config;
pub mod watch;
pub mod workspaces;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use devsync_client::{
    ListPolicy, NoAuthProvider, OidcTokenProvider, SharedTokenProvider, StaticTokenProvider,
    TokenManager, WorkspaceSyncClient,
};
use devsync_config::{AuthConfig, ClientConfig, ConfigError};

/// Environment variable read for a bearer token when no auth is configured.
pub const TOKEN_ENV: &str = "DEVSYNC_TOKEN";

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Named context override.
    pub context: Option<String>,
    /// Server URL override.
    pub server: Option<String>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// A connected client plus the namespaces the context tracks.
pub struct Connection {
    pub client: WorkspaceSyncClient,
    pub namespaces: Vec<String>,
}

impl Connection {
    /// `explicit` if non-empty, else the context's namespaces.
    pub fn namespaces_or(&self, explicit: Vec<String>) -> Result<Vec<String>> {
        let namespaces = if explicit.is_empty() {
            self.namespaces.clone()
        } else {
            explicit
        };
        if namespaces.is_empty() {
            return Err(anyhow!(
                "no namespaces given; pass -n NAMESPACE or set namespaces on the context"
            ));
        }
        Ok(namespaces)
    }
}

impl Context {
    /// Build a client from the client config and command-line overrides.
    pub fn connect(&self) -> Result<Connection> {
        let config = devsync_config::load_client_config().context("failed to load client config")?;
        self.connect_with(&config)
    }

    fn connect_with(&self, config: &ClientConfig) -> Result<Connection> {
        let selected = match config.select(self.context.as_deref()) {
            Ok(context) => Some(context),
            Err(ConfigError::NoCurrentContext) if self.server.is_some() => None,
            Err(e) => return Err(e.into()),
        };

        let server = self
            .server
            .clone()
            .or_else(|| selected.map(|c| c.server.clone()))
            .ok_or_else(|| anyhow!("no server configured"))?;
        let auth = selected
            .and_then(|c| c.auth.clone())
            .unwrap_or_else(|| AuthConfig::bearer_env(TOKEN_ENV));
        let timeout = selected
            .map(|c| config.timeout_for(c))
            .unwrap_or(config.defaults.timeout);

        let defaults = &config.defaults;
        let tokens = TokenManager::new(token_provider(&auth)?)
            .with_cooldown(Duration::from_secs(defaults.refresh_cooldown))
            .with_min_validity(Duration::from_secs(defaults.min_token_validity))
            .on_auth_failure(|reason| {
                tracing::error!(error = %reason, "session expired, log in again to refresh credentials");
            });

        tracing::debug!(server = %server, context = ?selected.map(|c| &c.name), "connecting");
        let client = WorkspaceSyncClient::builder()
            .base_url(server)
            .token_manager(Arc::new(tokens))
            .timeout(Duration::from_secs(timeout))
            .list_policy(list_policy(defaults.list_policy))
            .create_poll_attempts(defaults.create_poll_attempts)
            .create_poll_interval(Duration::from_millis(defaults.create_poll_interval_ms))
            .build()
            .context("failed to build client")?;

        Ok(Connection {
            client,
            namespaces: selected.map(|c| c.namespaces.clone()).unwrap_or_default(),
        })
    }
}

/// Config-file list policy as the client's.
fn list_policy(policy: devsync_config::ListPolicy) -> ListPolicy {
    match policy {
        devsync_config::ListPolicy::Partial => ListPolicy::Partial,
        devsync_config::ListPolicy::FailFast => ListPolicy::FailFast,
    }
}

/// Turn configured auth into a token provider.
///
/// `none` talks to single-user backends: no bearer header and no push
/// handshake.
fn token_provider(auth: &AuthConfig) -> Result<SharedTokenProvider> {
    let provider: SharedTokenProvider = match auth {
        AuthConfig::None => Arc::new(NoAuthProvider),
        AuthConfig::Bearer { .. } => match auth.resolve()? {
            Some(token) => Arc::new(StaticTokenProvider::new(token)),
            None => Arc::new(StaticTokenProvider::anonymous()),
        },
        AuthConfig::Oidc {
            token_url,
            client_id,
            ..
        } => {
            let refresh_token = auth
                .resolve()?
                .ok_or_else(|| anyhow!("no refresh token available for OIDC auth"))?;
            Arc::new(OidcTokenProvider::new(
                token_url.as_str(),
                client_id.as_str(),
                refresh_token,
            ))
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx(context: Option<&str>, server: Option<&str>) -> Context {
        Context {
            context: context.map(str::to_string),
            server: server.map(str::to_string),
            json_output: false,
            verbose: false,
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::from_yaml(
            r#"
current-context: local
contexts:
  - name: local
    server: http://localhost:8080/api
    namespaces: [alice-che]
    auth:
      type: none
  - name: other
    server: http://other:8080/api
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_uses_current_context() {
        let connection = ctx(None, None).connect_with(&config()).unwrap();
        assert_eq!(
            connection.client.http().base_url().as_str(),
            "http://localhost:8080/api/"
        );
        assert_eq!(connection.namespaces, vec!["alice-che"]);
    }

    #[tokio::test]
    async fn test_server_override_and_named_context() {
        let connection = ctx(Some("other"), Some("http://override:1/api"))
            .connect_with(&config())
            .unwrap();
        assert_eq!(
            connection.client.http().base_url().as_str(),
            "http://override:1/api/"
        );
        assert!(connection.namespaces.is_empty());
        assert!(connection.namespaces_or(Vec::new()).is_err());
        assert_eq!(
            connection.namespaces_or(vec!["ns1".to_string()]).unwrap(),
            vec!["ns1"]
        );
    }

    #[tokio::test]
    async fn test_server_without_config() {
        let connection = ctx(None, Some("http://localhost:1/api"))
            .connect_with(&ClientConfig::new())
            .unwrap();
        assert!(connection.namespaces.is_empty());

        assert!(ctx(None, None).connect_with(&ClientConfig::new()).is_err());
        assert!(ctx(Some("missing"), None).connect_with(&config()).is_err());
    }

    #[tokio::test]
    async fn test_auth_none_reaches_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/namespace/ns1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let api = format!("{}/api", server.uri());
        let connection = ctx(Some("local"), Some(&api)).connect_with(&config()).unwrap();
        let outcome = connection.client.list(&["ns1"]).await.unwrap();

        assert!(outcome.is_complete());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[test]
    fn test_list_policy_from_config() {
        assert_eq!(list_policy(devsync_config::ListPolicy::Partial), ListPolicy::Partial);
        assert_eq!(list_policy(devsync_config::ListPolicy::FailFast), ListPolicy::FailFast);

        let config = ClientConfig::from_yaml("defaults:\n  list-policy: fail-fast\n").unwrap();
        let connection = ctx(None, Some("http://localhost:1/api"))
            .connect_with(&config)
            .unwrap();
        assert_eq!(connection.client.list_policy(), ListPolicy::FailFast);
    }
}
