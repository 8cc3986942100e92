//! Synchronization core for cloud development workspace backends.
//!
//! This crate keeps a client-side view of workspaces in sync with a
//! workspace backend that speaks either the legacy workspace API or the
//! DevWorkspace resource API.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use devsync_client::{OidcTokenProvider, TokenManager, WorkspaceSyncClient, channel_sink};
//!
//! # async fn example() -> devsync_client::Result<()> {
//! let provider = OidcTokenProvider::new(
//!     "https://sso.example.com/realms/che/protocol/openid-connect/token",
//!     "che-public",
//!     "refresh-token",
//! );
//! let tokens = Arc::new(
//!     TokenManager::new(Arc::new(provider)).on_auth_failure(|reason| {
//!         eprintln!("session expired, log in again: {}", reason);
//!     }),
//! );
//!
//! let client = WorkspaceSyncClient::builder()
//!     .base_url("https://che.example.com/api")
//!     .token_manager(tokens)
//!     .build()?;
//!
//! let workspace = client.get("alice-che", "my-ws").await?;
//! client.start(&workspace).await?;
//!
//! let (sink, mut events) = channel_sink();
//! client.subscribe(["alice-che"], sink)?;
//! while let Some(event) = events.recv().await {
//!     println!("{} is now {}", event.workspace_id, event.status());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - **token**: credential providers and the coalescing [`TokenManager`]
//! - **http**: authenticated requests with error classification
//! - **decoder**: incremental newline-delimited JSON decoding
//! - **model**: normalization of both backend shapes into [`WorkspaceRecord`]
//! - **events** / **subscriber**: per-namespace push channels
//! - **client**: the [`WorkspaceSyncClient`] façade

pub mod client;
pub mod decoder;
pub mod error;
pub mod events;
pub mod http;
pub mod model;
pub mod subscriber;
pub mod token;

pub use client::{
    ListOutcome, ListPolicy, WorkspaceSyncClient, WorkspaceSyncClientBuilder,
    DEFAULT_CREATE_POLL_ATTEMPTS, DEFAULT_CREATE_POLL_INTERVAL,
};
pub use decoder::{LineError, StreamDecoder, WatchEvent, WatchEventType};
pub use error::{Error, Result};
pub use events::{
    ChangeEvent, ChangeKind, ChangePayload, EventSink, SharedEventSink, StatusChange,
    channel_sink,
};
pub use http::HttpClient;
pub use model::{
    BackendKind, DevfileMetadata, RuntimeInfo, WorkspaceAttributes, WorkspaceRecord,
    WorkspaceStatus, classify, normalize,
};
pub use subscriber::{ChangeFeedSubscriber, ChannelState, ReconnectPolicy};
pub use token::{
    Credential, NoAuthProvider, OidcTokenProvider, SharedTokenManager, SharedTokenProvider,
    StaticTokenProvider, TokenManager, TokenProvider,
};
