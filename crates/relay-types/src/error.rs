//! Error types for building operations

use crate::command::CommandType;
use thiserror::Error;

/// Raised when a command's target/args cannot be read as a typed operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// Command kind has no typed counterpart
    #[error("Unsupported command type: {0}")]
    UnsupportedType(CommandType),

    /// Required field missing from target or args
    #[error("Missing field '{field}' for {command_type}")]
    MissingField {
        command_type: CommandType,
        field: &'static str,
    },

    /// Field present but of the wrong shape
    #[error("Invalid field '{field}' for {command_type}: {reason}")]
    InvalidField {
        command_type: CommandType,
        field: &'static str,
        reason: String,
    },
}
