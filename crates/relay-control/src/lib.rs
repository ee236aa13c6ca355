//! # Relay Control Plane
//!
//! In-memory coordination between the central coordinator and the agents
//! running inside each managed cluster.
//!
//! ## Overview
//!
//! Collaborators (HTTP handlers, the AI tool executor) enqueue commands for
//! a cluster and optionally block until that command's result comes back.
//! Agents long-poll their cluster's [`CommandSet`](relay_types::CommandSet)
//! by resource version and report outcomes in ack batches.
//!
//! ## Key Components
//!
//! - [`CommandPlane`]: Facade used by every caller
//! - [`CommandStore`]: Versioned per-cluster sets plus waiter registries
//! - [`CommandGateway`]: Narrow trait collaborators depend on
//! - [`EventBus`]: Broadcast stream of plane events
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_control::{CommandPlane, PlaneConfig};
//! use relay_types::{AckResult, ClusterId, Operation};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let plane = CommandPlane::new(PlaneConfig::default());
//! let cluster = ClusterId::new("east");
//!
//! // Coordinator side
//! let op = Operation::RestartPod { namespace: "default".into(), pod: "api-0".into() };
//! let command = plane.submit(&cluster, &op, "api");
//!
//! // Agent side
//! let set = plane.poll(&cluster, 1, Duration::from_secs(30)).await;
//! plane.apply_ack(&cluster, vec![AckResult::succeeded(command.id.clone())]);
//! assert_eq!(set.resource_version, 2);
//! # }
//! ```
//!
//! ## Delivery semantics
//!
//! Delivery is at-least-once and results are never replayed: an ack
//! reaches only the waiters registered when it is applied. Every ack batch
//! clears the cluster's whole pending set.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

mod correlation;
mod notify;

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod plane;
pub mod store;
pub mod telemetry;

// Re-exports
pub use config::{LoggingConfig, PlaneConfig};
pub use error::{ControlError, Result};
pub use events::{EventBus, PlaneEvent, PlaneEventEnvelope};
pub use gateway::CommandGateway;
pub use plane::{CommandPlane, Dispatch};
pub use store::{AckOutcome, CommandStore, Delivery, EnqueueOutcome, PlaneStats, ResultWatch};
pub use telemetry::init_tracing;
