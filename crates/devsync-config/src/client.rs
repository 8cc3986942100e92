//! Client configuration for connecting to workspace backends.
//!
//! Implements a kubeconfig-style configuration with named contexts:
//!
//! ```yaml
//! api-version: v1
//! kind: ClientConfig
//!
//! current-context: local
//!
//! contexts:
//!   - name: local
//!     server: http://localhost:8080/api
//!     namespaces: [alice-che]
//!     auth:
//!       type: bearer
//!       token-env: DEVSYNC_TOKEN
//!   - name: prod
//!     server: https://che.example.com/api
//!     auth:
//!       type: oidc
//!       token-url: https://sso.example.com/realms/che/protocol/openid-connect/token
//!       client-id: che-public
//!       refresh-token-file: ~/.config/devsync/refresh-token
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::paths::{expand_path, xdg_config_dir};
use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Client Config
// ─────────────────────────────────────────────────────────────────────────────

/// API version for the client config file format.
pub const API_VERSION: &str = "v1";

/// Kind identifier for client config files.
pub const KIND: &str = "ClientConfig";

/// Default config filename.
const CLIENT_CONFIG_FILE: &str = "client.yaml";

/// Root client configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    /// API version (always "v1" currently).
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Config kind (always "ClientConfig").
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Name of the current/default context.
    #[serde(default)]
    pub current_context: Option<String>,

    /// Named connection contexts.
    #[serde(default)]
    pub contexts: Vec<Context>,

    /// Settings applied to all contexts.
    #[serde(default)]
    pub defaults: ClientDefaults,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

impl ClientConfig {
    /// Create an empty client config.
    pub fn new() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            ..Default::default()
        }
    }

    /// Parse from a YAML string.
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        serde_yaml::from_str(yaml_str).map_err(|e| ConfigError::ParseYaml(e.to_string()))
    }

    /// Serialize to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::ParseYaml(e.to_string()))
    }

    /// Get the current context, if set and valid.
    pub fn current(&self) -> Option<&Context> {
        self.current_context
            .as_ref()
            .and_then(|name| self.get_context(name))
    }

    /// Pick the context to use: `name` if given, else the current one.
    pub fn select(&self, name: Option<&str>) -> Result<&Context> {
        match name.or(self.current_context.as_deref()) {
            Some(name) => self
                .get_context(name)
                .ok_or_else(|| ConfigError::ContextNotFound(name.to_string())),
            None => Err(ConfigError::NoCurrentContext),
        }
    }

    /// Get a context by name.
    pub fn get_context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }

    /// Get a mutable context by name.
    pub fn get_context_mut(&mut self, name: &str) -> Option<&mut Context> {
        self.contexts.iter_mut().find(|c| c.name == name)
    }

    /// Add or update a context.
    pub fn set_context(&mut self, context: Context) {
        if let Some(existing) = self.get_context_mut(&context.name) {
            *existing = context;
        } else {
            self.contexts.push(context);
        }
    }

    /// Remove a context by name.
    pub fn remove_context(&mut self, name: &str) -> Option<Context> {
        let pos = self.contexts.iter().position(|c| c.name == name)?;
        if self.current_context.as_deref() == Some(name) {
            self.current_context = None;
        }
        Some(self.contexts.remove(pos))
    }

    /// Set the current context by name.
    ///
    /// Returns an error if the context doesn't exist.
    pub fn use_context(&mut self, name: &str) -> Result<()> {
        if self.get_context(name).is_some() {
            self.current_context = Some(name.to_string());
            Ok(())
        } else {
            Err(ConfigError::ContextNotFound(name.to_string()))
        }
    }

    /// List all context names.
    pub fn context_names(&self) -> Vec<&str> {
        self.contexts.iter().map(|c| c.name.as_str()).collect()
    }

    /// Request timeout for `context` in seconds, applying defaults.
    pub fn timeout_for(&self, context: &Context) -> u64 {
        context.timeout.unwrap_or(self.defaults.timeout)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// A named connection context (server + namespaces + auth bundle).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Context {
    /// Unique name for this context.
    pub name: String,

    /// Backend API root (e.g., "https://che.example.com/api").
    pub server: String,

    /// Namespaces tracked by default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Authentication configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// Request timeout override (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Context {
    /// Create a new context with just a name and server URL.
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            namespaces: Vec::new(),
            auth: None,
            timeout: None,
        }
    }

    /// Set the tracked namespaces.
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Set the auth configuration.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication configuration for a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthConfig {
    /// No authentication.
    None,

    /// Fixed bearer token.
    #[serde(rename_all = "kebab-case")]
    Bearer {
        /// Path to file containing the bearer token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_file: Option<PathBuf>,
        /// Environment variable containing the token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_env: Option<String>,
    },

    /// OpenID Connect refresh-token grant.
    #[serde(rename_all = "kebab-case")]
    Oidc {
        /// Token endpoint of the identity provider.
        token_url: String,
        /// Public client ID.
        client_id: String,
        /// Path to file containing the refresh token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token_file: Option<PathBuf>,
        /// Environment variable containing the refresh token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token_env: Option<String>,
    },
}

impl AuthConfig {
    /// Bearer auth reading the token from a file.
    pub fn bearer_file(path: impl Into<PathBuf>) -> Self {
        Self::Bearer {
            token_file: Some(path.into()),
            token_env: None,
        }
    }

    /// Bearer auth reading the token from an environment variable.
    pub fn bearer_env(var: impl Into<String>) -> Self {
        Self::Bearer {
            token_file: None,
            token_env: Some(var.into()),
        }
    }

    /// Resolve the configured secret.
    ///
    /// For bearer auth this is the access token, for OIDC the refresh
    /// token. The file is tried first, then the environment variable.
    pub fn resolve(&self) -> Result<Option<String>> {
        match self {
            AuthConfig::None => Ok(None),
            AuthConfig::Bearer {
                token_file,
                token_env,
            } => read_secret(token_file.as_deref(), token_env.as_deref()),
            AuthConfig::Oidc {
                refresh_token_file,
                refresh_token_env,
                ..
            } => read_secret(refresh_token_file.as_deref(), refresh_token_env.as_deref()),
        }
    }
}

fn read_secret(file: Option<&Path>, env: Option<&str>) -> Result<Option<String>> {
    if let Some(path) = file {
        let expanded = expand_path(path);
        if expanded.exists() {
            let secret = std::fs::read_to_string(&expanded)
                .map_err(|e| ConfigError::ReadFile {
                    path: expanded.display().to_string(),
                    source: e,
                })?
                .trim()
                .to_string();
            return Ok(Some(secret));
        }
    }
    if let Some(var) = env
        && let Ok(secret) = std::env::var(var)
    {
        return Ok(Some(secret));
    }
    Ok(None)
}

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// How multi-namespace listing treats a failing namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListPolicy {
    #[default]
    Partial,
    FailFast,
}

/// Settings applied to all contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientDefaults {
    /// Request timeout in seconds.
    pub timeout: u64,

    /// Minimum seconds between token refreshes.
    pub refresh_cooldown: u64,

    /// Refresh tokens expiring within this many seconds.
    pub min_token_validity: u64,

    /// Status polls after a create that returned no status.
    pub create_poll_attempts: u32,

    /// Delay between create status polls, in milliseconds.
    pub create_poll_interval_ms: u64,

    pub list_policy: ListPolicy,
}

impl Default for ClientDefaults {
    fn default() -> Self {
        Self {
            timeout: 30,
            refresh_cooldown: 30,
            min_token_validity: 5,
            create_poll_attempts: 5,
            create_poll_interval_ms: 1000,
            list_policy: ListPolicy::Partial,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading / Saving
// ─────────────────────────────────────────────────────────────────────────────

/// Get the path to the client config file.
pub fn client_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(CLIENT_CONFIG_FILE))
}

/// Load the client configuration.
///
/// Returns a default config if the file doesn't exist.
pub fn load_client_config() -> Result<ClientConfig> {
    load_client_config_from(client_config_path().as_deref())
}

/// Load client config from a specific path.
pub fn load_client_config_from(path: Option<&Path>) -> Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::new());
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no client config, using defaults");
        return Ok(ClientConfig::new());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;

    ClientConfig::from_yaml(&contents)
}

/// Save the client configuration.
pub fn save_client_config(config: &ClientConfig) -> Result<()> {
    let path = client_config_path()
        .ok_or_else(|| ConfigError::Other("Could not determine config directory".to_string()))?;
    save_client_config_to(config, &path)
}

/// Save client config to a specific path.
pub fn save_client_config_to(config: &ClientConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_yaml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), "saved client config");

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
