//! Commands and per-cluster command sets

use crate::ids::{idempotency_key, ClusterId, CommandId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Per-cluster change counter; starts at 1 and grows by one per mutation
pub type ResourceVersion = u64;

/// Resource coordinates or operation parameters, opaque to the store
pub type Fields = BTreeMap<String, Value>;

/// Kind of administrative operation carried by a command
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandType {
    RestartPod,
    DeletePod,
    ScaleWorkload,
    UpdateImage,
    CordonNode,
    UncordonNode,
    GetLogs,
    /// A kind this build does not know; carried through untouched
    Custom(String),
}

impl CommandType {
    /// Kebab-case wire name
    pub fn as_str(&self) -> &str {
        match self {
            CommandType::RestartPod => "restart-pod",
            CommandType::DeletePod => "delete-pod",
            CommandType::ScaleWorkload => "scale-workload",
            CommandType::UpdateImage => "update-image",
            CommandType::CordonNode => "cordon-node",
            CommandType::UncordonNode => "uncordon-node",
            CommandType::GetLogs => "get-logs",
            CommandType::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for CommandType {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "restart-pod" => CommandType::RestartPod,
            "delete-pod" => CommandType::DeletePod,
            "scale-workload" => CommandType::ScaleWorkload,
            "update-image" => CommandType::UpdateImage,
            "cordon-node" => CommandType::CordonNode,
            "uncordon-node" => CommandType::UncordonNode,
            "get-logs" => CommandType::GetLogs,
            _ => CommandType::Custom(kind),
        }
    }
}

impl From<&str> for CommandType {
    fn from(kind: &str) -> Self {
        Self::from(kind.to_string())
    }
}

impl From<CommandType> for String {
    fn from(kind: CommandType) -> Self {
        match kind {
            CommandType::Custom(kind) => kind,
            other => other.as_str().to_string(),
        }
    }
}

/// Lifecycle marker reserved for incremental-diff protocols.
///
/// Every enqueue is currently an append, so this is always `Add`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOp {
    #[default]
    Add,
    Update,
    Cancel,
}

/// One administrative operation to apply to one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique command identifier, used to correlate the ack
    pub id: CommandId,

    /// Operation kind
    #[serde(rename = "type")]
    pub command_type: CommandType,

    /// Resource coordinates (namespace, kind, name, node)
    #[serde(default)]
    pub target: Fields,

    /// Operation parameters
    #[serde(default)]
    pub args: Fields,

    /// Idempotency fingerprint of the operation's semantic content
    pub idem: String,

    /// Lifecycle marker
    #[serde(default)]
    pub op: CommandOp,

    /// Who asked for the operation ("api", "ai-tool", "webhook", ...)
    #[serde(default)]
    pub source: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Command {
    /// Build a command with a fresh ID and its computed fingerprint
    pub fn new(
        cluster_id: &ClusterId,
        command_type: CommandType,
        target: Fields,
        args: Fields,
        source: impl Into<String>,
    ) -> Self {
        let idem = Self::fingerprint(cluster_id, &command_type, &target, &args);
        Self {
            id: CommandId::generate(),
            command_type,
            target,
            args,
            idem,
            op: CommandOp::Add,
            source: source.into(),
            created_at: Utc::now(),
        }
    }

    /// Fingerprint of action + cluster + target fields + argument fields.
    ///
    /// Each field contributes a `"key"=value` part with both sides in JSON,
    /// in key order, after a section marker naming the map it came from.
    /// Equal maps always produce the same key; a value that changes field,
    /// section or JSON type produces a different one.
    pub fn fingerprint(
        cluster_id: &ClusterId,
        command_type: &CommandType,
        target: &Fields,
        args: &Fields,
    ) -> String {
        let target_parts = field_parts(target);
        let arg_parts = field_parts(args);

        let mut parts: Vec<&dyn fmt::Display> =
            Vec::with_capacity(target_parts.len() + arg_parts.len() + 4);
        parts.push(command_type);
        parts.push(cluster_id);
        parts.push(&TARGET_SECTION);
        parts.extend(target_parts.iter().map(|p| p as &dyn fmt::Display));
        parts.push(&ARGS_SECTION);
        parts.extend(arg_parts.iter().map(|p| p as &dyn fmt::Display));

        idempotency_key(&parts)
    }

    /// Look up a string-valued target coordinate
    pub fn target_str(&self, key: &str) -> Option<&str> {
        self.target.get(key).and_then(Value::as_str)
    }
}

const TARGET_SECTION: &str = "target";
const ARGS_SECTION: &str = "args";

/// Render each field as `"key"=value`; quoting keeps markers and fields apart
fn field_parts(fields: &Fields) -> Vec<String> {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", Value::from(key.as_str()), value))
        .collect()
}

/// The pending queue for one cluster
///
/// `commands` is the full current pending snapshot, not an append log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSet {
    /// Cluster this set belongs to
    pub cluster_id: ClusterId,

    /// Resource version, bumped by exactly one per mutation
    #[serde(rename = "rv")]
    pub resource_version: ResourceVersion,

    /// Pending commands
    pub commands: Vec<Command>,
}

impl CommandSet {
    /// A freshly created set: version 1, nothing pending
    pub fn new(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            resource_version: 1,
            commands: Vec::new(),
        }
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of pending commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether `command_id` is still pending
    pub fn contains(&self, command_id: &CommandId) -> bool {
        self.commands.iter().any(|c| &c.id == command_id)
    }
}
