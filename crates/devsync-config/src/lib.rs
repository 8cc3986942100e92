//! Client configuration for devsync.
//!
//! Kubeconfig-style YAML with named contexts, each bundling a backend
//! server, the namespaces to track and how to authenticate:
//! - `current-context` for default selection
//! - bearer-token and OpenID Connect refresh-token auth
//! - shared defaults for timeouts, token refresh and create polling

pub mod client;
pub mod error;
pub mod paths;

pub use client::{
    AuthConfig, ClientConfig, ClientDefaults, Context, ListPolicy, client_config_path,
    load_client_config, load_client_config_from, save_client_config, save_client_config_to,
};
pub use error::{ConfigError, Result};
pub use paths::{expand_path, log_dir, xdg_config_dir};
