//! WebSocket change feed, one channel per namespace.
//!
//! Each subscribed namespace gets its own connection task. The task opens
//! `{base}/workspace/namespace/{ns}/subscribe`, sends the bearer handshake
//! (skipped when the token provider does not use sessions) and then routes every text frame through [`from_push_message`] into the
//! caller's [`EventSink`].
//!
//! Delivery is gated per subscription: once [`ChangeFeedSubscriber::unsubscribe`]
//! returns, the sink registered for that namespace is never called again,
//! even for frames already read off the socket.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::error::{Error, Result};
use crate::events::{SharedEventSink, from_push_message};
use crate::token::SharedTokenManager;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Lifecycle of one namespace channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Socket is being opened or re-opened.
    Connecting,
    /// Handshake sent, events flowing.
    Open,
    /// Channel is finished and will not deliver again.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Exponential backoff for re-opening abnormally closed channels.
///
/// Channels are not re-opened unless a policy is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after the first failure before giving up.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Handshake<'a> {
    keycloak_token: &'a str,
}

/// Delivery gate shared between a subscription handle and its task.
type Gate = Arc<Mutex<bool>>;

struct Subscription {
    id: u64,
    gate: Gate,
    state: watch::Receiver<ChannelState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivery now and ask the task to close its socket.
    fn close(mut self) {
        *self.gate.lock() = false;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

#[derive(Default)]
struct Registry {
    subscriptions: HashMap<String, Subscription>,
    failing: BTreeSet<String>,
    next_id: u64,
}

impl Registry {
    /// Whether subscription `id` is still the live one for `namespace`.
    fn owns(&self, namespace: &str, id: u64) -> bool {
        self.subscriptions
            .get(namespace)
            .is_some_and(|s| s.id == id)
    }
}

/// Manages push channels keyed by namespace.
pub struct ChangeFeedSubscriber {
    ws_base: Url,
    tokens: SharedTokenManager,
    reconnect: Option<ReconnectPolicy>,
    registry: Arc<Mutex<Registry>>,
}

impl ChangeFeedSubscriber {
    /// Create a subscriber for the backend at `base_url` (http or ws scheme).
    pub fn new(base_url: &Url, tokens: SharedTokenManager) -> Result<Self> {
        Ok(Self {
            ws_base: http_to_ws_url(base_url)?,
            tokens,
            reconnect: None,
            registry: Arc::new(Mutex::new(Registry::default())),
        })
    }

    /// Re-open abnormally closed channels according to `policy`.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Channel URL for `namespace`.
    pub fn channel_url(&self, namespace: &str) -> Result<Url> {
        Ok(self
            .ws_base
            .join(&format!("workspace/namespace/{}/subscribe", namespace))?)
    }

    /// Open a channel for `namespace` delivering into `sink`.
    ///
    /// An existing channel for the namespace is closed first and its sink
    /// receives nothing further. Must be called within a Tokio runtime.
    pub fn subscribe(&self, namespace: &str, sink: SharedEventSink) -> Result<()> {
        let url = self.channel_url(namespace)?;

        let gate: Gate = Arc::new(Mutex::new(true));
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let replaced = {
            let mut registry = self.registry.lock();
            registry.next_id += 1;
            let id = registry.next_id;

            let task = tokio::spawn(run_channel(ChannelTask {
                id,
                namespace: namespace.to_string(),
                url,
                tokens: Arc::clone(&self.tokens),
                sink,
                gate: Arc::clone(&gate),
                state: state_tx,
                reconnect: self.reconnect.clone(),
                registry: Arc::clone(&self.registry),
                shutdown: shutdown_rx,
            }));

            registry.subscriptions.insert(
                namespace.to_string(),
                Subscription {
                    id,
                    gate,
                    state: state_rx,
                    shutdown: Some(shutdown_tx),
                    task,
                },
            )
        };

        if let Some(previous) = replaced {
            tracing::debug!(namespace, "replacing existing change feed");
            previous.close();
        }
        tracing::info!(namespace, "change feed subscribed");
        Ok(())
    }

    /// Close the channel for `namespace`. Returns false if none was open.
    ///
    /// No event for this subscription is dispatched after this returns.
    pub fn unsubscribe(&self, namespace: &str) -> bool {
        let removed = {
            let mut registry = self.registry.lock();
            registry.failing.remove(namespace);
            registry.subscriptions.remove(namespace)
        };

        match removed {
            Some(subscription) => {
                subscription.close();
                tracing::info!(namespace, "change feed unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Close every channel.
    pub fn unsubscribe_all(&self) {
        let drained: Vec<_> = {
            let mut registry = self.registry.lock();
            registry.failing.clear();
            registry.subscriptions.drain().collect()
        };
        for (_, subscription) in drained {
            subscription.close();
        }
    }

    /// Current state of the channel for `namespace`, if subscribed.
    pub fn state(&self, namespace: &str) -> Option<ChannelState> {
        self.registry
            .lock()
            .subscriptions
            .get(namespace)
            .map(|s| *s.state.borrow())
    }

    /// Watch state transitions of the channel for `namespace`.
    pub fn state_changes(&self, namespace: &str) -> Option<watch::Receiver<ChannelState>> {
        self.registry
            .lock()
            .subscriptions
            .get(namespace)
            .map(|s| s.state.clone())
    }

    /// Namespaces with a live subscription, sorted.
    pub fn subscribed_namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .registry
            .lock()
            .subscriptions
            .keys()
            .cloned()
            .collect();
        namespaces.sort();
        namespaces
    }

    /// Namespaces whose channel closed abnormally and has not re-opened.
    pub fn failing_channels(&self) -> Vec<String> {
        self.registry.lock().failing.iter().cloned().collect()
    }
}

impl Drop for ChangeFeedSubscriber {
    fn drop(&mut self) {
        let drained: Vec<_> = self.registry.lock().subscriptions.drain().collect();
        for (_, subscription) in drained {
            *subscription.gate.lock() = false;
            subscription.task.abort();
        }
    }
}

impl fmt::Debug for ChangeFeedSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeedSubscriber")
            .field("ws_base", &self.ws_base.as_str())
            .field("reconnect", &self.reconnect)
            .field("namespaces", &self.subscribed_namespaces())
            .finish()
    }
}

/// Convert an HTTP(S) base URL to the matching WebSocket scheme.
pub fn http_to_ws_url(base_url: &Url) -> Result<Url> {
    let scheme = match base_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Config(format!(
                "unsupported URL scheme for change feed: {}",
                other
            )));
        }
    };

    let mut url = base_url.clone();
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("cannot convert {} to a WebSocket URL", base_url)))?;
    Ok(url)
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel task
// ─────────────────────────────────────────────────────────────────────────────

struct ChannelTask {
    id: u64,
    namespace: String,
    url: Url,
    tokens: SharedTokenManager,
    sink: SharedEventSink,
    gate: Gate,
    state: watch::Sender<ChannelState>,
    reconnect: Option<ReconnectPolicy>,
    registry: Arc<Mutex<Registry>>,
    shutdown: oneshot::Receiver<()>,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Unsubscribed,
    ServerClosed,
    Abnormal(String),
    AuthFailed(String),
}

async fn run_channel(task: ChannelTask) {
    let ChannelTask {
        id,
        namespace,
        url,
        tokens,
        sink,
        gate,
        state,
        reconnect,
        registry,
        mut shutdown,
    } = task;

    let mut attempt = 0u32;
    let outcome = loop {
        let _ = state.send(ChannelState::Connecting);
        tracing::debug!(namespace = %namespace, url = %url, "opening change feed");

        let connected = tokio::select! {
            _ = &mut shutdown => break Outcome::Unsubscribed,
            connected = connect(&url, &tokens) => connected,
        };

        let outcome = match connected {
            Ok(ws) => {
                attempt = 0;
                {
                    let mut registry = registry.lock();
                    if registry.owns(&namespace, id) {
                        registry.failing.remove(&namespace);
                    }
                }
                let _ = state.send(ChannelState::Open);
                tracing::info!(namespace = %namespace, "change feed open");
                pump(ws, &namespace, &sink, &gate, &mut shutdown).await
            }
            Err(e) if e.is_auth_error() => Outcome::AuthFailed(e.to_string()),
            Err(e) => Outcome::Abnormal(e.to_string()),
        };

        let Outcome::Abnormal(reason) = outcome else {
            break outcome;
        };
        let Some(policy) = reconnect.as_ref().filter(|p| attempt < p.max_attempts) else {
            break Outcome::Abnormal(reason);
        };

        attempt += 1;
        let backoff = policy.backoff(attempt);
        tracing::warn!(
            namespace = %namespace,
            error = %reason,
            attempt,
            "change feed lost, reconnecting in {:?}",
            backoff
        );
        tokio::select! {
            _ = &mut shutdown => break Outcome::Unsubscribed,
            _ = tokio::time::sleep(backoff) => {}
        }
    };

    *gate.lock() = false;
    record_outcome(&mut registry.lock(), &namespace, id, &outcome);
    let _ = state.send(ChannelState::Closed);
}

/// Fold a finished channel into the registry.
///
/// Only the task that still owns the namespace entry may touch it; a task
/// that was unsubscribed or replaced leaves both the entry and the failing
/// set alone.
fn record_outcome(registry: &mut Registry, namespace: &str, id: u64, outcome: &Outcome) {
    let owned = registry.owns(namespace, id);
    match outcome {
        Outcome::Abnormal(reason) | Outcome::AuthFailed(reason) => {
            tracing::warn!(namespace, error = %reason, "change feed failed");
            if owned {
                registry.failing.insert(namespace.to_string());
            }
        }
        Outcome::ServerClosed => {
            tracing::info!(namespace, "change feed closed by server");
        }
        Outcome::Unsubscribed => {}
    }
    if owned {
        registry.subscriptions.remove(namespace);
    }
}

async fn connect(url: &Url, tokens: &SharedTokenManager) -> Result<WsStream> {
    let token = tokens.authorization().await?;
    let (mut ws, _) = connect_async(url.as_str()).await?;

    if let Some(token) = token {
        let handshake = serde_json::to_string(&Handshake {
            keycloak_token: &token,
        })?;
        ws.send(Message::Text(handshake.into())).await?;
    }
    Ok(ws)
}

/// Drive an open socket until it closes or shutdown is requested.
async fn pump(
    ws: WsStream,
    namespace: &str,
    sink: &SharedEventSink,
    gate: &Gate,
    shutdown: &mut oneshot::Receiver<()>,
) -> Outcome {
    let (mut ws_sink, mut ws_stream) = ws.split();

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = ws_sink.send(Message::Close(None)).await;
                return Outcome::Unsubscribed;
            }

            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => deliver(namespace, &text, sink, gate),
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => return close_outcome(frame),
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(namespace, "ignoring binary change feed frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Outcome::Abnormal(e.to_string()),
                None => return Outcome::Abnormal("connection dropped".to_string()),
            }
        }
    }
}

fn close_outcome(frame: Option<CloseFrame>) -> Outcome {
    match frame {
        None => Outcome::ServerClosed,
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
            Outcome::ServerClosed
        }
        Some(frame) => Outcome::Abnormal(format!(
            "closed with code {}: {}",
            u16::from(frame.code),
            frame.reason.as_str()
        )),
    }
}

/// Decode one text frame and dispatch it if the gate is still open.
fn deliver(namespace: &str, text: &str, sink: &SharedEventSink, gate: &Gate) {
    let message = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(namespace, error = %e, "dropping non-JSON change message");
            return;
        }
    };

    match from_push_message(namespace, message) {
        Ok(Some(event)) => {
            let open = gate.lock();
            if *open {
                sink.dispatch(event);
            } else {
                tracing::debug!(namespace, "dropping change after close");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(namespace, error = %e, "dropping undecodable change message"),
    }
}
