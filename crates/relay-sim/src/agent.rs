//! Simulated cluster agent
//!
//! Mirrors what a real agent does against its cluster: long-poll the
//! command set, run every command it has not processed yet, then report
//! one ack batch. Delivery is at-least-once, so the agent remembers the IDs
//! of the latest snapshot and skips the ones it already ran. Within one
//! snapshot, a fire-and-forget command whose idempotency key repeats an
//! earlier one is acked as skipped.

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use relay_control::CommandPlane;
use relay_types::{
    AckResult, ClusterId, Command, CommandId, CommandSet, Operation, ResourceVersion,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

const DEFAULT_TAIL_LINES: u32 = 10;

/// Agent tuning
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Long-poll timeout requested per round
    pub poll_timeout: Duration,
    /// Probability that a command fails, 0.0..=1.0
    pub fail_rate: f64,
    /// RNG seed for reproducible runs
    pub seed: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(30),
            fail_rate: 0.0,
            seed: 0,
        }
    }
}

/// What an agent did over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub polls: u64,
    pub acks: u64,
    pub executed: u64,
    pub failed: u64,
    /// Commands seen again in a later snapshot and not re-run
    pub redelivered: u64,
    /// Fire-and-forget commands repeating a fingerprint within one snapshot
    pub skipped_duplicates: u64,
}

/// One in-process agent bound to one cluster
pub struct SimulatedAgent {
    plane: Arc<CommandPlane>,
    cluster_id: ClusterId,
    config: AgentConfig,
    last_rv: ResourceVersion,
    processed: HashSet<CommandId>,
    seen_idem: HashSet<String>,
    rng: StdRng,
    stats: AgentStats,
}

impl SimulatedAgent {
    pub fn new(plane: Arc<CommandPlane>, cluster_id: ClusterId, config: AgentConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            plane,
            cluster_id,
            config,
            last_rv: 0,
            processed: HashSet::new(),
            seen_idem: HashSet::new(),
            rng,
            stats: AgentStats::default(),
        }
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    /// Poll, execute and ack until `shutdown` flips to `true`
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AgentStats {
        info!(cluster_id = %self.cluster_id, "Simulated agent started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let set = tokio::select! {
                set = self.plane.poll(&self.cluster_id, self.last_rv, self.config.poll_timeout) => set,
                _ = shutdown.changed() => break,
            };
            self.stats.polls += 1;

            if let Some(results) = self.handle(set) {
                self.plane.apply_ack(&self.cluster_id, results);
                self.stats.acks += 1;
            }
        }

        info!(cluster_id = %self.cluster_id, stats = ?self.stats, "Simulated agent stopped");
        self.stats
    }

    /// Process one long-poll response; returns the ack batch to report, if
    /// anything new was found.
    ///
    /// Only the IDs of this snapshot are remembered afterwards; an applied
    /// ack clears the set, so older IDs cannot come back.
    pub fn handle(&mut self, set: CommandSet) -> Option<Vec<AckResult>> {
        if set.resource_version <= self.last_rv {
            return None;
        }
        self.last_rv = set.resource_version;

        let current: HashSet<CommandId> = set.commands.iter().map(|c| c.id.clone()).collect();
        let fresh: Vec<Command> = set
            .commands
            .into_iter()
            .filter(|c| !self.processed.contains(&c.id))
            .collect();
        let redelivered = current.len().saturating_sub(fresh.len());
        self.processed = current;
        self.stats.redelivered += redelivered as u64;

        if fresh.is_empty() {
            return None;
        }

        self.seen_idem.clear();
        debug!(
            cluster_id = %self.cluster_id,
            rv = self.last_rv,
            fresh = fresh.len(),
            "Executing command batch"
        );
        Some(fresh.iter().map(|c| self.execute(c)).collect())
    }

    pub fn stats(&self) -> &AgentStats {
        &self.stats
    }

    fn execute(&mut self, command: &Command) -> AckResult {
        let started = Utc::now();

        let operation = match Operation::from_command(command) {
            Ok(op) => op,
            Err(e) => {
                self.stats.failed += 1;
                return AckResult::failed(command.id.clone(), "Unsupported", e.to_string())
                    .with_timing(started, Utc::now());
            }
        };

        // Synchronous callers each wait for their own output
        if !operation.is_synchronous() && !self.seen_idem.insert(command.idem.clone()) {
            self.stats.skipped_duplicates += 1;
            return AckResult::skipped(command.id.clone(), "duplicate of a pending command")
                .with_timing(started, Utc::now());
        }

        let fail_rate = self.config.fail_rate.clamp(0.0, 1.0);
        if self.rng.gen_bool(fail_rate) {
            self.stats.failed += 1;
            return AckResult::failed(command.id.clone(), "SimulatedFailure", "injected failure")
                .with_timing(started, Utc::now());
        }

        self.stats.executed += 1;
        let result = match &operation {
            Operation::GetLogs {
                namespace,
                pod,
                tail_lines,
                ..
            } => {
                let lines = tail_lines.unwrap_or(DEFAULT_TAIL_LINES);
                let output = (1..=lines)
                    .map(|i| format!("{} {}/{} simulated log line {}", started.to_rfc3339(), namespace, pod, i))
                    .collect::<Vec<_>>()
                    .join("\n");
                AckResult::succeeded(command.id.clone()).with_output(output)
            }
            other => AckResult::succeeded(command.id.clone()).with_message(describe(other)),
        };
        result.with_timing(started, Utc::now())
    }
}

fn describe(operation: &Operation) -> String {
    match operation {
        Operation::RestartPod { namespace, pod } => format!("restarted {}/{}", namespace, pod),
        Operation::DeletePod { namespace, pod } => format!("deleted {}/{}", namespace, pod),
        Operation::ScaleWorkload {
            namespace,
            kind,
            name,
            replicas,
        } => format!("scaled {} {}/{} to {}", kind, namespace, name, replicas),
        Operation::UpdateImage {
            namespace,
            name,
            container,
            image,
            ..
        } => format!("set {}/{} container {} to {}", namespace, name, container, image),
        Operation::CordonNode { node } => format!("cordoned {}", node),
        Operation::UncordonNode { node } => format!("uncordoned {}", node),
        Operation::GetLogs { namespace, pod, .. } => format!("fetched logs of {}/{}", namespace, pod),
    }
}
