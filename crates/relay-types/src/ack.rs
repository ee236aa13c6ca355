//! Acknowledgment results reported by agents

use crate::ids::CommandId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of executing one command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Succeeded,
    Failed,
    /// The agent chose not to run it (e.g. recognised as a duplicate)
    Skipped,
}

impl AckStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, AckStatus::Succeeded)
    }
}

impl std::fmt::Display for AckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AckStatus::Succeeded => "succeeded",
            AckStatus::Failed => "failed",
            AckStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One command's outcome as reported by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResult {
    /// Command this result belongs to
    pub command_id: CommandId,

    /// Execution outcome
    pub status: AckStatus,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// Machine-readable failure code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Payload produced by the command (log text for `get-logs`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Execution attempt, starting at 1
    #[serde(default = "default_attempt")]
    pub attempt: u32,
}

fn default_attempt() -> u32 {
    1
}

impl AckResult {
    pub fn new(command_id: CommandId, status: AckStatus) -> Self {
        Self {
            command_id,
            status,
            message: String::new(),
            error_code: None,
            output: None,
            started_at: None,
            finished_at: None,
            attempt: default_attempt(),
        }
    }

    pub fn succeeded(command_id: CommandId) -> Self {
        Self::new(command_id, AckStatus::Succeeded)
    }

    pub fn failed(
        command_id: CommandId,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_code: Some(error_code.into()),
            message: message.into(),
            ..Self::new(command_id, AckStatus::Failed)
        }
    }

    pub fn skipped(command_id: CommandId, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::new(command_id, AckStatus::Skipped)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self.finished_at = Some(finished_at);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_carries_code() {
        let result = AckResult::failed(CommandId::new("c-1"), "NotFound", "pod missing");
        assert_eq!(result.status, AckStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("NotFound"));
        assert!(!result.status.is_success());
    }

    #[test]
    fn test_minimal_ack_deserializes() {
        let result: AckResult =
            serde_json::from_str(r#"{"command_id":"abc","status":"succeeded"}"#).unwrap();
        assert_eq!(result.command_id, CommandId::new("abc"));
        assert!(result.status.is_success());
        assert_eq!(result.attempt, 1);
        assert!(result.message.is_empty());
    }
}
