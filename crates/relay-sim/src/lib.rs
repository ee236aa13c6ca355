//! Relay simulation library
//!
//! Simulated cluster agents and a command driver that exercise the command
//! plane in-process, without any network transport:
//! - Agents long-poll, execute and ack
//! - The driver mixes fire-and-forget and synchronous operations

pub mod agent;
pub mod driver;

pub use agent::{AgentConfig, AgentStats, SimulatedAgent};
pub use driver::{drive, DriverConfig, DriverSummary};
