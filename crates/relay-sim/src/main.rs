//! Relay simulator - drives the command plane with in-process agents
//!
//! Spins up one simulated agent per cluster, submits a mix of
//! fire-and-forget and synchronous operations, and reports what came back.

use anyhow::Context;
use clap::Parser;
use relay_control::{init_tracing, CommandPlane, PlaneConfig};
use relay_sim::{drive, AgentConfig, AgentStats, DriverConfig, SimulatedAgent};
use relay_types::ClusterId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Relay command plane simulator
#[derive(Parser)]
#[command(name = "relayctl-sim")]
#[command(about = "Relay - simulate agents against the command plane", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<String>,

    /// Number of simulated clusters
    #[arg(long, default_value_t = 3)]
    clusters: usize,

    /// Number of operations to submit
    #[arg(long, default_value_t = 30)]
    commands: usize,

    /// Probability that an agent fails a command
    #[arg(long, default_value_t = 0.1)]
    fail_rate: f64,

    /// Pause between submissions, in milliseconds
    #[arg(long, default_value_t = 50)]
    pace_ms: u64,

    /// RNG seed
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Log level
    #[arg(long, env = "RELAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "RELAY_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = PlaneConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    init_tracing(&config.logging)?;

    let plane = Arc::new(CommandPlane::new(config));
    let clusters: Vec<ClusterId> = (1..=cli.clusters)
        .map(|i| ClusterId::new(format!("cluster-{}", i)))
        .collect();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agents: Vec<_> = clusters
        .iter()
        .enumerate()
        .map(|(i, cluster_id)| {
            let agent = SimulatedAgent::new(
                plane.clone(),
                cluster_id.clone(),
                AgentConfig {
                    poll_timeout: plane.config().long_poll_timeout(),
                    fail_rate: cli.fail_rate,
                    seed: cli.seed.wrapping_add(i as u64),
                },
            );
            tokio::spawn(agent.run(shutdown_rx.clone()))
        })
        .collect();

    let driver = DriverConfig {
        commands: cli.commands,
        pace: Duration::from_millis(cli.pace_ms),
        seed: cli.seed,
    };

    let summary = tokio::select! {
        summary = drive(plane.clone(), &clusters, &driver) => summary,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down agents");
            Default::default()
        }
    };

    shutdown_tx.send(true).ok();
    let mut totals = AgentStats::default();
    for handle in agents {
        let stats = handle.await.context("agent task panicked")?;
        totals.polls += stats.polls;
        totals.acks += stats.acks;
        totals.executed += stats.executed;
        totals.failed += stats.failed;
        totals.redelivered += stats.redelivered;
        totals.skipped_duplicates += stats.skipped_duplicates;
    }

    let plane_stats = plane.stats();
    println!(
        r#"
  Relay simulation summary
  ------------------------
  Submitted:           {}
    queued:            {}
    completed:         {}
    failed:            {}
    timed out:         {}
  Agent executions:    {}
    failed:            {}
    duplicates:        {}
    redelivered:       {}
  Agent polls / acks:  {} / {}
  Still pending:       {}
"#,
        summary.submitted(),
        summary.queued,
        summary.completed,
        summary.failed,
        summary.timed_out,
        totals.executed,
        totals.failed,
        totals.skipped_duplicates,
        totals.redelivered,
        totals.polls,
        totals.acks,
        plane_stats.pending_commands,
    );

    Ok(())
}
