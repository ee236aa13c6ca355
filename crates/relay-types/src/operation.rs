//! Typed catalogue of administrative operations
//!
//! Each operation renders itself to the opaque `(type, target, args)` triple
//! the store carries, and can be read back from a received [`Command`] on
//! the agent side.

use crate::command::{Command, CommandType, Fields};
use crate::error::OperationError;
use crate::ids::ClusterId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Target key for the namespace coordinate
pub const TARGET_NAMESPACE: &str = "namespace";
/// Target key for the resource kind coordinate
pub const TARGET_KIND: &str = "kind";
/// Target key for the resource name coordinate
pub const TARGET_NAME: &str = "name";
/// Target key for the node coordinate
pub const TARGET_NODE: &str = "node";

const POD_KIND: &str = "Pod";

/// A supported administrative operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Operation {
    /// Delete a pod so its controller recreates it
    RestartPod { namespace: String, pod: String },

    /// Delete a pod outright
    DeletePod { namespace: String, pod: String },

    /// Change a workload's replica count
    ScaleWorkload {
        namespace: String,
        kind: String,
        name: String,
        replicas: u32,
    },

    /// Point one container of a workload at a new image
    UpdateImage {
        namespace: String,
        kind: String,
        name: String,
        container: String,
        image: String,
    },

    /// Mark a node unschedulable
    CordonNode { node: String },

    /// Mark a node schedulable again
    UncordonNode { node: String },

    /// Fetch a pod's recent log lines
    GetLogs {
        namespace: String,
        pod: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tail_lines: Option<u32>,
    },
}

impl Operation {
    pub fn command_type(&self) -> CommandType {
        match self {
            Operation::RestartPod { .. } => CommandType::RestartPod,
            Operation::DeletePod { .. } => CommandType::DeletePod,
            Operation::ScaleWorkload { .. } => CommandType::ScaleWorkload,
            Operation::UpdateImage { .. } => CommandType::UpdateImage,
            Operation::CordonNode { .. } => CommandType::CordonNode,
            Operation::UncordonNode { .. } => CommandType::UncordonNode,
            Operation::GetLogs { .. } => CommandType::GetLogs,
        }
    }

    /// Whether callers block on the agent's result.
    ///
    /// Only log retrieval returns data; everything else is fire-and-forget.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Operation::GetLogs { .. })
    }

    /// Resource coordinates for the command's `target` map
    pub fn target(&self) -> Fields {
        let mut target = Fields::new();
        match self {
            Operation::RestartPod { namespace, pod }
            | Operation::DeletePod { namespace, pod }
            | Operation::GetLogs { namespace, pod, .. } => {
                target.insert(TARGET_NAMESPACE.into(), json!(namespace));
                target.insert(TARGET_KIND.into(), json!(POD_KIND));
                target.insert(TARGET_NAME.into(), json!(pod));
            }
            Operation::ScaleWorkload {
                namespace,
                kind,
                name,
                ..
            }
            | Operation::UpdateImage {
                namespace,
                kind,
                name,
                ..
            } => {
                target.insert(TARGET_NAMESPACE.into(), json!(namespace));
                target.insert(TARGET_KIND.into(), json!(kind));
                target.insert(TARGET_NAME.into(), json!(name));
            }
            Operation::CordonNode { node } | Operation::UncordonNode { node } => {
                target.insert(TARGET_NODE.into(), json!(node));
            }
        }
        target
    }

    /// Operation parameters for the command's `args` map
    pub fn args(&self) -> Fields {
        let mut args = Fields::new();
        match self {
            Operation::ScaleWorkload { replicas, .. } => {
                args.insert("replicas".into(), json!(replicas));
            }
            Operation::UpdateImage {
                container, image, ..
            } => {
                args.insert("container".into(), json!(container));
                args.insert("image".into(), json!(image));
            }
            Operation::GetLogs {
                container,
                tail_lines,
                ..
            } => {
                if let Some(container) = container {
                    args.insert("container".into(), json!(container));
                }
                if let Some(tail_lines) = tail_lines {
                    args.insert("tail_lines".into(), json!(tail_lines));
                }
            }
            Operation::RestartPod { .. }
            | Operation::DeletePod { .. }
            | Operation::CordonNode { .. }
            | Operation::UncordonNode { .. } => {}
        }
        args
    }

    /// Build the command that carries this operation to `cluster_id`
    pub fn to_command(&self, cluster_id: &ClusterId, source: impl Into<String>) -> Command {
        Command::new(cluster_id, self.command_type(), self.target(), self.args(), source)
    }

    /// Read a received command back as a typed operation
    pub fn from_command(command: &Command) -> Result<Self, OperationError> {
        let reader = FieldReader {
            command_type: &command.command_type,
        };
        let target = &command.target;
        let args = &command.args;

        let op = match command.command_type {
            CommandType::RestartPod => Operation::RestartPod {
                namespace: reader.string(target, TARGET_NAMESPACE)?,
                pod: reader.string(target, TARGET_NAME)?,
            },
            CommandType::DeletePod => Operation::DeletePod {
                namespace: reader.string(target, TARGET_NAMESPACE)?,
                pod: reader.string(target, TARGET_NAME)?,
            },
            CommandType::ScaleWorkload => Operation::ScaleWorkload {
                namespace: reader.string(target, TARGET_NAMESPACE)?,
                kind: reader.string(target, TARGET_KIND)?,
                name: reader.string(target, TARGET_NAME)?,
                replicas: reader.count(args, "replicas")?.ok_or(OperationError::MissingField {
                    command_type: command.command_type.clone(),
                    field: "replicas",
                })?,
            },
            CommandType::UpdateImage => Operation::UpdateImage {
                namespace: reader.string(target, TARGET_NAMESPACE)?,
                kind: reader.string(target, TARGET_KIND)?,
                name: reader.string(target, TARGET_NAME)?,
                container: reader.string(args, "container")?,
                image: reader.string(args, "image")?,
            },
            CommandType::CordonNode => Operation::CordonNode {
                node: reader.string(target, TARGET_NODE)?,
            },
            CommandType::UncordonNode => Operation::UncordonNode {
                node: reader.string(target, TARGET_NODE)?,
            },
            CommandType::GetLogs => Operation::GetLogs {
                namespace: reader.string(target, TARGET_NAMESPACE)?,
                pod: reader.string(target, TARGET_NAME)?,
                container: reader.optional_string(args, "container")?,
                tail_lines: reader.count(args, "tail_lines")?,
            },
            CommandType::Custom(_) => {
                return Err(OperationError::UnsupportedType(command.command_type.clone()))
            }
        };
        Ok(op)
    }
}

struct FieldReader<'a> {
    command_type: &'a CommandType,
}

impl FieldReader<'_> {
    fn string(&self, fields: &Fields, field: &'static str) -> Result<String, OperationError> {
        self.optional_string(fields, field)?
            .ok_or_else(|| OperationError::MissingField {
                command_type: self.command_type.clone(),
                field,
            })
    }

    fn optional_string(
        &self,
        fields: &Fields,
        field: &'static str,
    ) -> Result<Option<String>, OperationError> {
        match fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(field, format!("expected string, got {}", other))),
        }
    }

    fn count(&self, fields: &Fields, field: &'static str) -> Result<Option<u32>, OperationError> {
        match fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    self.invalid(field, format!("expected non-negative integer, got {}", value))
                }),
        }
    }

    fn invalid(&self, field: &'static str, reason: String) -> OperationError {
        OperationError::InvalidField {
            command_type: self.command_type.clone(),
            field,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(replicas: u32) -> Operation {
        Operation::ScaleWorkload {
            namespace: "ns1".into(),
            kind: "Deployment".into(),
            name: "a".into(),
            replicas,
        }
    }

    #[test]
    fn test_scale_renders_target_and_args() {
        let op = scale(3);
        assert_eq!(op.command_type(), CommandType::ScaleWorkload);
        assert_eq!(op.target()[TARGET_KIND], json!("Deployment"));
        assert_eq!(op.args()["replicas"], json!(3));
        assert!(!op.is_synchronous());
    }

    #[test]
    fn test_same_operation_same_fingerprint() {
        let cluster = ClusterId::new("c1");
        let first = scale(3).to_command(&cluster, "api");
        let again = scale(3).to_command(&cluster, "ai-tool");
        let other = scale(4).to_command(&cluster, "api");

        assert_ne!(first.id, again.id);
        assert_eq!(first.idem, again.idem);
        assert_ne!(first.idem, other.idem);
    }

    #[test]
    fn test_log_options_do_not_share_fingerprint() {
        let cluster = ClusterId::new("c1");
        let logs = |container: Option<&str>, tail_lines: Option<u32>| Operation::GetLogs {
            namespace: "default".into(),
            pod: "api-0".into(),
            container: container.map(String::from),
            tail_lines,
        };

        let by_container = logs(Some("50"), None).to_command(&cluster, "api");
        let by_tail = logs(None, Some(50)).to_command(&cluster, "api");
        assert_ne!(by_container.idem, by_tail.idem);
    }

    #[test]
    fn test_get_logs_is_synchronous() {
        let op = Operation::GetLogs {
            namespace: "default".into(),
            pod: "api-0".into(),
            container: None,
            tail_lines: Some(50),
        };
        assert!(op.is_synchronous());
        assert!(!op.args().contains_key("container"));
    }

    #[test]
    fn test_operation_read_back_from_command() {
        let cluster = ClusterId::new("east");
        let ops = vec![
            Operation::RestartPod {
                namespace: "default".into(),
                pod: "api-0".into(),
            },
            scale(2),
            Operation::UpdateImage {
                namespace: "shop".into(),
                kind: "StatefulSet".into(),
                name: "db".into(),
                container: "postgres".into(),
                image: "postgres:16".into(),
            },
            Operation::CordonNode {
                node: "node-7".into(),
            },
            Operation::GetLogs {
                namespace: "default".into(),
                pod: "api-0".into(),
                container: Some("app".into()),
                tail_lines: Some(100),
            },
        ];

        for op in ops {
            let command = op.to_command(&cluster, "test");
            assert_eq!(Operation::from_command(&command).unwrap(), op);
        }
    }

    #[test]
    fn test_missing_replicas_rejected() {
        let mut command = scale(3).to_command(&ClusterId::new("c1"), "api");
        command.args.clear();

        let err = Operation::from_command(&command).unwrap_err();
        assert_eq!(
            err,
            OperationError::MissingField {
                command_type: CommandType::ScaleWorkload,
                field: "replicas",
            }
        );
    }

    #[test]
    fn test_negative_replicas_rejected() {
        let mut command = scale(3).to_command(&ClusterId::new("c1"), "api");
        command.args.insert("replicas".into(), json!(-1));

        assert!(matches!(
            Operation::from_command(&command),
            Err(OperationError::InvalidField { field: "replicas", .. })
        ));
    }

    #[test]
    fn test_custom_type_unsupported() {
        let command = Command::new(
            &ClusterId::new("c1"),
            CommandType::Custom("drain-node".into()),
            Fields::new(),
            Fields::new(),
            "api",
        );
        assert!(matches!(
            Operation::from_command(&command),
            Err(OperationError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_operation_json_tagging() {
        let op: Operation =
            serde_json::from_value(json!({"action": "cordon-node", "node": "n1"})).unwrap();
        assert_eq!(op, Operation::CordonNode { node: "n1".into() });
    }
}
