//! Typed change events and their routing from wire messages.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::decoder::{WatchEvent, WatchEventType};
use crate::error::{Error, Result};
use crate::model::{DEV_WORKSPACE_KIND, WorkspaceRecord, WorkspaceStatus, normalize};

/// What happened to the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// A bare status transition pushed by the legacy backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: WorkspaceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<WorkspaceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a change event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangePayload {
    /// Full workspace state after the change.
    Workspace(WorkspaceRecord),
    /// Status transition only.
    Status(StatusChange),
}

/// One change to one workspace in one namespace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub namespace: String,
    pub workspace_id: String,
    pub kind: ChangeKind,
    pub payload: ChangePayload,
}

impl ChangeEvent {
    /// The workspace record, when the event carries one.
    pub fn workspace(&self) -> Option<&WorkspaceRecord> {
        match &self.payload {
            ChangePayload::Workspace(record) => Some(record),
            ChangePayload::Status(_) => None,
        }
    }

    /// Status after the change.
    pub fn status(&self) -> WorkspaceStatus {
        match &self.payload {
            ChangePayload::Workspace(record) => record.status,
            ChangePayload::Status(change) => change.status,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Receiver of change events, supplied by the state layer.
///
/// `dispatch` is called synchronously, in arrival order per namespace, and
/// must not call back into the subscriber that invoked it.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: ChangeEvent);
}

impl<F> EventSink for F
where
    F: Fn(ChangeEvent) + Send + Sync,
{
    fn dispatch(&self, event: ChangeEvent) {
        self(event)
    }
}

/// Shared sink handle.
pub type SharedEventSink = Arc<dyn EventSink>;

/// A sink forwarding into an unbounded channel.
pub fn channel_sink() -> (SharedEventSink, mpsc::UnboundedReceiver<ChangeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: SharedEventSink = Arc::new(move |event: ChangeEvent| {
        if tx.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    });
    (sink, rx)
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

/// Map a decoded watch record to a change event.
///
/// Bookmarks yield `None`. An `ERROR` record becomes [`Error::Http`] carrying
/// the status the backend reported.
pub fn from_watch_event(namespace: &str, event: WatchEvent) -> Result<Option<ChangeEvent>> {
    let kind = match event.kind {
        WatchEventType::Added => ChangeKind::Added,
        WatchEventType::Modified => ChangeKind::Modified,
        WatchEventType::Deleted => ChangeKind::Deleted,
        WatchEventType::Bookmark => return Ok(None),
        WatchEventType::Error => {
            let status = event
                .object
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(500);
            let body = event
                .object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(Error::Http { status, body });
        }
    };

    let record = normalize(watched_resource(namespace, event.object))?;
    Ok(Some(ChangeEvent {
        namespace: namespace.to_string(),
        workspace_id: record.id.clone(),
        kind,
        payload: ChangePayload::Workspace(record),
    }))
}

/// Watch objects are DevWorkspace resources; the watch may omit `kind`
/// and `metadata.namespace`, which are filled in here.
fn watched_resource(namespace: &str, mut object: Value) -> Value {
    let is_legacy = object.get("id").is_some() && object.get("devfile").is_some();
    if let Some(fields) = object.as_object_mut().filter(|_| !is_legacy)
        && !fields.contains_key("kind")
        && let Some(Value::Object(metadata)) = fields.get_mut("metadata")
    {
        metadata
            .entry("namespace")
            .or_insert_with(|| Value::String(namespace.to_string()));
        fields.insert(
            "kind".to_string(),
            Value::String(DEV_WORKSPACE_KIND.to_string()),
        );
    }
    object
}

/// Map a push-channel text message to a change event.
///
/// Accepts either a watch envelope (`{type, object}`) or a status message
/// (`{workspaceId, status, prevStatus?, error?}`).
pub fn from_push_message(namespace: &str, message: Value) -> Result<Option<ChangeEvent>> {
    if message.get("type").is_some() && message.get("object").is_some() {
        let event: WatchEvent = serde_json::from_value(message)
            .map_err(|e| Error::UnrecognizedFormat(format!("malformed watch envelope: {}", e)))?;
        return from_watch_event(namespace, event);
    }

    let Some(workspace_id) = message.get("workspaceId").and_then(Value::as_str) else {
        return Err(Error::UnrecognizedFormat(
            "push message has neither an object nor a workspaceId".to_string(),
        ));
    };

    let phase = |key: &str| {
        message
            .get(key)
            .and_then(Value::as_str)
            .map(WorkspaceStatus::from_phase)
    };

    Ok(Some(ChangeEvent {
        namespace: namespace.to_string(),
        workspace_id: workspace_id.to_string(),
        kind: ChangeKind::Modified,
        payload: ChangePayload::Status(StatusChange {
            status: phase("status").unwrap_or(WorkspaceStatus::Unknown),
            previous: phase("prevStatus"),
            error: message
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_watch_event_to_change() {
        let event: WatchEvent = serde_json::from_value(json!({
            "type": "DELETED",
            "object": {
                "kind": "DevWorkspace",
                "metadata": { "name": "ws1", "namespace": "ns1", "uid": "u1" }
            }
        }))
        .unwrap();

        let change = from_watch_event("ns1", event).unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Deleted);
        assert_eq!(change.workspace_id, "u1");
        assert_eq!(change.workspace().unwrap().name, "ws1");
    }

    #[test]
    fn test_watch_object_without_kind() {
        let event: WatchEvent = serde_json::from_value(json!({
            "type": "ADDED",
            "object": { "metadata": { "name": "ws1" } }
        }))
        .unwrap();

        let change = from_watch_event("ns1", event).unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Added);
        let record = change.workspace().unwrap();
        assert_eq!(record.name, "ws1");
        assert_eq!(record.namespace, "ns1");
        assert_eq!(change.workspace_id, "ns1/ws1");

        let pod = WatchEvent {
            kind: WatchEventType::Modified,
            object: json!({ "kind": "Pod", "metadata": { "name": "p" } }),
        };
        assert!(matches!(
            from_watch_event("ns1", pod),
            Err(Error::UnrecognizedFormat(_))
        ));
    }

    #[test]
    fn test_bookmark_and_error_records() {
        let bookmark = WatchEvent {
            kind: WatchEventType::Bookmark,
            object: json!({}),
        };
        assert!(from_watch_event("ns1", bookmark).unwrap().is_none());

        let gone = WatchEvent {
            kind: WatchEventType::Error,
            object: json!({ "code": 410, "message": "too old resource version" }),
        };
        match from_watch_event("ns1", gone) {
            Err(Error::Http { status, body }) => {
                assert_eq!(status, 410);
                assert_eq!(body, "too old resource version");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_status_push_message() {
        let change = from_push_message(
            "ns1",
            json!({ "workspaceId": "w1", "status": "RUNNING", "prevStatus": "STARTING" }),
        )
        .unwrap()
        .unwrap();

        assert_eq!(change.kind, ChangeKind::Modified);
        assert_eq!(change.workspace_id, "w1");
        assert_eq!(change.status(), WorkspaceStatus::Running);
        assert!(change.workspace().is_none());
        match change.payload {
            ChangePayload::Status(s) => assert_eq!(s.previous, Some(WorkspaceStatus::Starting)),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_envelope_push_message() {
        let change = from_push_message(
            "ns1",
            json!({
                "type": "ADDED",
                "object": { "id": "w2", "status": "STOPPED", "devfile": { "metadata": { "name": "ws2" } } }
            }),
        )
        .unwrap()
        .unwrap();
        assert_eq!(change.kind, ChangeKind::Added);
        assert_eq!(change.workspace_id, "w2");
        assert_eq!(change.status(), WorkspaceStatus::Stopped);
    }

    #[test]
    fn test_unroutable_message() {
        assert!(matches!(
            from_push_message("ns1", json!({ "hello": "world" })),
            Err(Error::UnrecognizedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = channel_sink();
        let change = from_push_message("ns1", json!({ "workspaceId": "w1", "status": "STOPPED" }))
            .unwrap()
            .unwrap();
        sink.dispatch(change.clone());
        assert_eq!(rx.recv().await.unwrap(), change);
    }
}
