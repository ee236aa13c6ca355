//! Error types for the command plane
//!
//! The store itself never fails; every wait reports a plain timeout. These
//! errors exist for callers that want the timeout expressed as a domain
//! failure, and for configuration.

use relay_types::{ClusterId, CommandId};
use thiserror::Error;

/// Command plane error type
#[derive(Debug, Error)]
pub enum ControlError {
    /// No ack for the command arrived before the deadline
    #[error("timed out waiting for agent response (cluster {cluster_id}, command {command_id})")]
    AgentTimeout {
        cluster_id: ClusterId,
        command_id: CommandId,
    },

    /// The caller's cancellation signal fired before the wait finished
    #[error("Wait cancelled")]
    Cancelled,

    /// Configuration could not be loaded or applied
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for command plane operations
pub type Result<T> = std::result::Result<T, ControlError>;

impl From<config::ConfigError> for ControlError {
    fn from(err: config::ConfigError) -> Self {
        ControlError::Config(err.to_string())
    }
}

impl ControlError {
    pub fn agent_timeout(cluster_id: &ClusterId, command_id: &CommandId) -> Self {
        Self::AgentTimeout {
            cluster_id: cluster_id.clone(),
            command_id: command_id.clone(),
        }
    }

    /// Whether the failure was a deadline expiring (as opposed to cancellation)
    pub fn is_timeout(&self) -> bool {
        matches!(self, ControlError::AgentTimeout { .. })
    }
}
