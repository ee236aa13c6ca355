//! Relay Types - Core types for the multi-cluster command plane
//!
//! Relay carries administrative operations from a central coordinator down to
//! the per-cluster agents that execute them, and carries their outcomes back.
//!
//! ## Architectural Boundaries
//!
//! - **relay-types** owns: the command data model, identifiers, fingerprints
//! - **relay-control** owns: the versioned store, waiter registries, facade
//! - **Agents** own: executing commands against their cluster and acking
//!
//! ## Key Concepts
//!
//! - **Command**: One operation to apply to one cluster
//! - **CommandSet**: A cluster's pending snapshot plus its resource version
//! - **AckResult**: An agent's report of one command's outcome
//! - **Operation**: Typed catalogue of the supported administrative actions
//! - **Idempotency key**: Deterministic fingerprint of an operation's content

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod ack;
pub mod command;
pub mod error;
pub mod ids;
pub mod operation;

// Re-export main types
pub use ack::{AckResult, AckStatus};
pub use command::{Command, CommandOp, CommandSet, CommandType, Fields, ResourceVersion};
pub use error::OperationError;
pub use ids::{idempotency_key, ClusterId, CommandId, IDEMPOTENCY_KEY_LEN};
pub use operation::Operation;
