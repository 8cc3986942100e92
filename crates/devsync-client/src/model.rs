//! Workspace model normalization.
//!
//! The backend serves workspaces in two shapes:
//!
//! - the legacy workspace API object (`id`, `status`, `devfile`, `runtime`)
//! - the `DevWorkspace` custom resource (`kind`, `metadata`, `spec`, `status`)
//!
//! [`normalize`] is the only place that looks at either raw shape; everything
//! else in the crate works with [`WorkspaceRecord`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Discriminator value of the custom-resource shape.
pub const DEV_WORKSPACE_KIND: &str = "DevWorkspace";

// ─────────────────────────────────────────────────────────────────────────────
// Canonical model
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Terminating,
    /// The backend has not reported a status yet.
    Unknown,
}

impl WorkspaceStatus {
    /// Parse a legacy status or a DevWorkspace phase, case-insensitively.
    pub fn from_phase(phase: &str) -> Self {
        match phase.to_uppercase().as_str() {
            "STARTING" => Self::Starting,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "STOPPED" => Self::Stopped,
            "ERROR" | "FAILED" | "FAILING" => Self::Error,
            "TERMINATING" => Self::Terminating,
            other => {
                tracing::debug!(phase = other, "unmapped workspace phase");
                Self::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Terminating => "TERMINATING",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which backend representation a record was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Legacy,
    DevWorkspace,
}

/// Devfile identity carried by a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevfileMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
}

/// Runtime details of a started workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub status: WorkspaceStatus,
    #[serde(default)]
    pub active_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ide_url: Option<String>,
}

/// Bookkeeping attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceAttributes {
    pub infrastructure_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

/// Canonical workspace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    pub id: String,
    pub namespace: String,
    pub name: String,
    pub status: WorkspaceStatus,
    pub kind: BackendKind,
    pub devfile_metadata: DevfileMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInfo>,
    #[serde(default)]
    pub attributes: WorkspaceAttributes,
    /// Desired run state (`spec.started`), DevWorkspace only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
}

impl WorkspaceRecord {
    /// Whether the backend has reported a status.
    pub fn has_status(&self) -> bool {
        self.status != WorkspaceStatus::Unknown
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkspaceStatus::Running
    }

    /// URL of the IDE session, when running.
    pub fn ide_url(&self) -> Option<&str> {
        self.runtime.as_ref().and_then(|r| r.ide_url.as_deref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DevWorkspace {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: DevWorkspaceSpec,
    #[serde(default)]
    status: Option<DevWorkspaceStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: Option<String>,
    generate_name: Option<String>,
    namespace: Option<String>,
    uid: Option<String>,
    creation_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DevWorkspaceSpec {
    started: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevWorkspaceStatus {
    workspace_id: Option<String>,
    phase: Option<String>,
    #[serde(alias = "mainUrl")]
    ide_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyWorkspace {
    id: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    status: Option<String>,
    devfile: LegacyDevfile,
    #[serde(default)]
    attributes: LegacyAttributes,
    #[serde(default)]
    runtime: Option<LegacyRuntime>,
}

#[derive(Debug, Deserialize)]
struct LegacyDevfile {
    #[serde(default)]
    metadata: LegacyDevfileMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDevfileMeta {
    name: Option<String>,
    generate_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyAttributes {
    infrastructure_namespace: Option<String>,
    created: Option<Value>,
    updated: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRuntime {
    status: Option<String>,
    active_env: Option<String>,
    #[serde(default)]
    machines: BTreeMap<String, LegacyMachine>,
}

#[derive(Debug, Deserialize)]
struct LegacyMachine {
    #[serde(default)]
    servers: BTreeMap<String, LegacyServer>,
}

#[derive(Debug, Deserialize)]
struct LegacyServer {
    url: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification and conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Decide which backend shape `raw` is.
pub fn classify(raw: &Value) -> Result<BackendKind> {
    let object = raw
        .as_object()
        .ok_or_else(|| Error::UnrecognizedFormat("expected a JSON object".to_string()))?;

    match object.get("kind").and_then(Value::as_str) {
        Some(DEV_WORKSPACE_KIND) => Ok(BackendKind::DevWorkspace),
        Some(other) => Err(Error::UnrecognizedFormat(format!(
            "unsupported kind '{}'",
            other
        ))),
        None if object.contains_key("id") && object.contains_key("devfile") => {
            Ok(BackendKind::Legacy)
        }
        None => Err(Error::UnrecognizedFormat(
            "object is neither a DevWorkspace nor a legacy workspace".to_string(),
        )),
    }
}

/// Whether `raw` (a workspace or a devfile) is a DevWorkspace resource.
pub fn is_dev_workspace(raw: &Value) -> bool {
    raw.get("kind").and_then(Value::as_str) == Some(DEV_WORKSPACE_KIND)
}

/// Convert either backend shape into a [`WorkspaceRecord`].
pub fn normalize(raw: Value) -> Result<WorkspaceRecord> {
    match classify(&raw)? {
        BackendKind::DevWorkspace => {
            let workspace: DevWorkspace = serde_json::from_value(raw)
                .map_err(|e| Error::UnrecognizedFormat(format!("malformed DevWorkspace: {}", e)))?;
            Ok(from_dev_workspace(workspace))
        }
        BackendKind::Legacy => {
            let workspace: LegacyWorkspace = serde_json::from_value(raw).map_err(|e| {
                Error::UnrecognizedFormat(format!("malformed legacy workspace: {}", e))
            })?;
            Ok(from_legacy(workspace))
        }
    }
}

fn from_dev_workspace(workspace: DevWorkspace) -> WorkspaceRecord {
    let DevWorkspace {
        metadata,
        spec,
        status,
    } = workspace;
    let status = status.unwrap_or_default();

    let namespace = metadata.namespace.unwrap_or_default();
    let name = metadata
        .name
        .clone()
        .or_else(|| metadata.generate_name.clone())
        .unwrap_or_default();

    let id = status
        .workspace_id
        .or(metadata.uid)
        .unwrap_or_else(|| format!("{}/{}", namespace, name));

    let phase = status.phase.as_deref().map(WorkspaceStatus::from_phase);
    let runtime = match (phase, status.ide_url) {
        (Some(phase), Some(url)) => Some(RuntimeInfo {
            status: phase,
            active_env: String::new(),
            ide_url: Some(url),
        }),
        _ => None,
    };

    WorkspaceRecord {
        id,
        status: phase.unwrap_or(WorkspaceStatus::Unknown),
        kind: BackendKind::DevWorkspace,
        devfile_metadata: DevfileMetadata {
            name: name.clone(),
            generate_name: metadata.generate_name,
        },
        runtime,
        attributes: WorkspaceAttributes {
            infrastructure_namespace: namespace.clone(),
            created: metadata.creation_timestamp,
            updated: None,
        },
        started: spec.started,
        namespace,
        name,
    }
}

fn from_legacy(workspace: LegacyWorkspace) -> WorkspaceRecord {
    let LegacyWorkspace {
        id,
        namespace,
        status,
        devfile,
        attributes,
        runtime,
    } = workspace;

    let namespace = namespace
        .or_else(|| attributes.infrastructure_namespace.clone())
        .unwrap_or_default();
    let name = devfile
        .metadata
        .name
        .clone()
        .or_else(|| devfile.metadata.generate_name.clone())
        .unwrap_or_default();
    let status = status
        .as_deref()
        .map(WorkspaceStatus::from_phase)
        .unwrap_or(WorkspaceStatus::Unknown);

    let runtime = runtime.map(|runtime| RuntimeInfo {
        status: runtime
            .status
            .as_deref()
            .map(WorkspaceStatus::from_phase)
            .unwrap_or(status),
        active_env: runtime.active_env.unwrap_or_default(),
        ide_url: ide_server_url(&runtime.machines),
    });

    WorkspaceRecord {
        id,
        status,
        kind: BackendKind::Legacy,
        devfile_metadata: DevfileMetadata {
            name: name.clone(),
            generate_name: devfile.metadata.generate_name,
        },
        runtime,
        attributes: WorkspaceAttributes {
            infrastructure_namespace: attributes
                .infrastructure_namespace
                .unwrap_or_else(|| namespace.clone()),
            created: attributes.created.map(scalar_to_string),
            updated: attributes.updated.map(scalar_to_string),
        },
        started: None,
        namespace,
        name,
    }
}

/// First server tagged `type: ide` across all machines.
fn ide_server_url(machines: &BTreeMap<String, LegacyMachine>) -> Option<String> {
    machines
        .values()
        .flat_map(|machine| machine.servers.values())
        .find(|server| server.attributes.get("type").and_then(Value::as_str) == Some("ide"))
        .and_then(|server| server.url.clone())
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
