//! Command driver for the simulation
//!
//! Plays the part of the coordinator's collaborators: submits a random mix
//! of operations across clusters through `dispatch`, the same path HTTP
//! handlers and the AI tool executor take.

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use relay_control::{CommandPlane, Dispatch};
use relay_types::{ClusterId, Operation};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const NAMESPACES: &[&str] = &["default", "shop", "payments"];
const WORKLOADS: &[&str] = &["api", "web", "worker"];
const IMAGES: &[&str] = &["registry.local/app:1.4.2", "registry.local/app:1.5.0"];

/// Driver tuning
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Number of operations to submit
    pub commands: usize,
    /// Pause between submissions
    pub pace: Duration,
    /// RNG seed for reproducible runs
    pub seed: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            commands: 30,
            pace: Duration::from_millis(50),
            seed: 7,
        }
    }
}

/// Outcome counts for one driver run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSummary {
    /// Fire-and-forget operations accepted
    pub queued: u64,
    /// Synchronous operations that came back successful
    pub completed: u64,
    /// Synchronous operations the agent reported as failed or skipped
    pub failed: u64,
    /// Synchronous operations with no answer before the deadline
    pub timed_out: u64,
}

impl DriverSummary {
    pub fn submitted(&self) -> u64 {
        self.queued + self.completed + self.failed + self.timed_out
    }
}

/// Submit `config.commands` operations round-robin over `clusters`
pub async fn drive(
    plane: Arc<CommandPlane>,
    clusters: &[ClusterId],
    config: &DriverConfig,
) -> DriverSummary {
    let mut summary = DriverSummary::default();
    if clusters.is_empty() {
        return summary;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    for i in 0..config.commands {
        let cluster_id = &clusters[i % clusters.len()];
        let operation = sample_operation(&mut rng);

        match plane.dispatch(cluster_id, &operation, "sim-driver").await {
            Ok(Dispatch::Queued { command }) => {
                summary.queued += 1;
                info!(
                    cluster_id = %cluster_id,
                    command_id = %command.id,
                    command_type = %command.command_type,
                    "Operation queued"
                );
            }
            Ok(Dispatch::Completed { command, result }) => {
                if result.status.is_success() {
                    summary.completed += 1;
                } else {
                    summary.failed += 1;
                }
                info!(
                    cluster_id = %cluster_id,
                    command_id = %command.id,
                    status = %result.status,
                    output_bytes = result.output.as_ref().map_or(0, String::len),
                    "Operation completed"
                );
            }
            Err(e) if e.is_timeout() => {
                summary.timed_out += 1;
                warn!(cluster_id = %cluster_id, error = %e, "Operation timed out");
            }
            Err(e) => warn!(cluster_id = %cluster_id, error = %e, "Operation abandoned"),
        }

        sleep(config.pace).await;
    }

    summary
}

fn sample_operation(rng: &mut StdRng) -> Operation {
    let namespace = pick(rng, NAMESPACES);
    let workload = pick(rng, WORKLOADS);
    let node = format!("node-{}", rng.gen_range(1..=4));

    match rng.gen_range(0..6) {
        0 => Operation::RestartPod {
            namespace,
            pod: format!("{}-{}", workload, rng.gen_range(0..3)),
        },
        1 => Operation::ScaleWorkload {
            namespace,
            kind: "Deployment".to_string(),
            name: workload,
            replicas: rng.gen_range(1..=5),
        },
        2 => Operation::UpdateImage {
            namespace,
            kind: "Deployment".to_string(),
            name: workload.clone(),
            container: workload,
            image: pick(rng, IMAGES),
        },
        3 if rng.gen_bool(0.5) => Operation::CordonNode { node },
        3 => Operation::UncordonNode { node },
        _ => Operation::GetLogs {
            namespace,
            pod: format!("{}-0", workload),
            container: None,
            tail_lines: Some(rng.gen_range(5..=20)),
        },
    }
}

fn pick(rng: &mut StdRng, choices: &[&str]) -> String {
    choices.choose(rng).copied().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, SimulatedAgent};
    use relay_control::PlaneConfig;
    use tokio::sync::watch;

    #[test]
    fn test_sampling_is_reproducible() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            assert_eq!(sample_operation(&mut a), sample_operation(&mut b));
        }
    }

    #[tokio::test]
    async fn test_no_clusters_no_work() {
        let plane = Arc::new(CommandPlane::default());
        let summary = drive(plane, &[], &DriverConfig::default()).await;
        assert_eq!(summary.submitted(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drive_against_live_agent() {
        let plane = Arc::new(CommandPlane::new(PlaneConfig {
            result_timeout_secs: 2,
            ..PlaneConfig::default()
        }));
        let cluster = ClusterId::new("east");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let agent = SimulatedAgent::new(plane.clone(), cluster.clone(), AgentConfig::default());
        let agent_handle = tokio::spawn(agent.run(shutdown_rx));

        let config = DriverConfig {
            commands: 6,
            pace: Duration::from_millis(20),
            seed: 1,
        };
        let summary = drive(plane.clone(), &[cluster], &config).await;

        shutdown_tx.send(true).unwrap();
        let stats = agent_handle.await.unwrap();

        assert_eq!(summary.submitted(), 6);
        assert!(stats.polls > 0);
        assert!(stats.acks > 0);
    }
}
