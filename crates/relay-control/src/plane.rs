//! Main CommandPlane implementation
//!
//! The CommandPlane is the single entry point collaborators use: HTTP
//! handlers and the AI tool executor enqueue commands and await results,
//! agent-facing endpoints long-poll and apply ack batches.

use crate::config::PlaneConfig;
use crate::error::{ControlError, Result};
use crate::events::{EventBus, PlaneEvent, PlaneEventEnvelope};
use crate::store::{AckOutcome, CommandStore, EnqueueOutcome, PlaneStats, ResultWatch};
use relay_types::{
    AckResult, ClusterId, Command, CommandId, CommandSet, CommandType, Fields, Operation,
    ResourceVersion,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument};

/// How a dispatched operation concluded
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Fire-and-forget: the command is queued, its ID is for audit only
    Queued { command: Command },
    /// Synchronous: the agent reported back in time
    Completed { command: Command, result: AckResult },
}

impl Dispatch {
    /// The command that was enqueued
    pub fn command(&self) -> &Command {
        match self {
            Dispatch::Queued { command } | Dispatch::Completed { command, .. } => command,
        }
    }

    /// The agent's result, for completed synchronous operations
    pub fn result(&self) -> Option<&AckResult> {
        match self {
            Dispatch::Queued { .. } => None,
            Dispatch::Completed { result, .. } => Some(result),
        }
    }
}

/// Command distribution and acknowledgment plane shared by the process
pub struct CommandPlane {
    store: CommandStore,
    events: EventBus,
    config: PlaneConfig,
}

impl CommandPlane {
    /// Create a plane with empty state
    pub fn new(config: PlaneConfig) -> Self {
        Self {
            store: CommandStore::new(),
            events: EventBus::new(config.event_channel_capacity),
            config,
        }
    }

    /// Configuration the plane was built with
    pub fn config(&self) -> &PlaneConfig {
        &self.config
    }

    /// Subscribe to the plane's event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaneEventEnvelope> {
        self.events.subscribe()
    }

    /// Point-in-time store and waiter counters
    pub fn stats(&self) -> PlaneStats {
        self.store.stats()
    }

    // ========== Collaborator side ==========

    /// Build a command with a fresh ID and fingerprint and enqueue it.
    ///
    /// The returned command carries the ID needed to await its result.
    #[instrument(skip_all, fields(cluster_id = %cluster_id, command_type = %command_type))]
    pub fn create_command(
        &self,
        cluster_id: &ClusterId,
        command_type: CommandType,
        target: Fields,
        args: Fields,
        source: &str,
    ) -> Command {
        let command = Command::new(cluster_id, command_type, target, args, source);
        self.enqueue(cluster_id, command.clone());
        command
    }

    /// Enqueue a typed operation
    pub fn submit(&self, cluster_id: &ClusterId, operation: &Operation, source: &str) -> Command {
        self.create_command(
            cluster_id,
            operation.command_type(),
            operation.target(),
            operation.args(),
            source,
        )
    }

    /// Enqueue an already built command
    pub fn enqueue(&self, cluster_id: &ClusterId, command: Command) -> CommandSet {
        let summary = EnqueueSummary::of(&command);
        let outcome = self.store.enqueue_with_outcome(cluster_id, command);
        self.record_enqueue(cluster_id, summary, &outcome);
        outcome.set
    }

    /// Wait for the ack of `command_id`; `None` once `timeout` elapses.
    ///
    /// Only acks applied after this call starts are observed.
    pub async fn await_result(
        &self,
        cluster_id: &ClusterId,
        command_id: &CommandId,
        timeout: Duration,
    ) -> Option<AckResult> {
        self.store.wait_for_result(cluster_id, command_id, timeout).await
    }

    /// [`await_result`](Self::await_result), abandoned early when `cancel`
    /// flips to `true`
    pub async fn await_result_or_cancel(
        &self,
        cluster_id: &ClusterId,
        command_id: &CommandId,
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<AckResult>> {
        race_cancel(self.await_result(cluster_id, command_id, timeout), cancel).await
    }

    /// Enqueue a typed operation and, for synchronous operations, wait for
    /// its result using the configured result timeout.
    ///
    /// The result waiter is registered together with the enqueue, so a fast
    /// agent cannot ack before the caller listens.
    #[instrument(skip_all, fields(cluster_id = %cluster_id, command_type = %operation.command_type()))]
    pub async fn dispatch(
        &self,
        cluster_id: &ClusterId,
        operation: &Operation,
        source: &str,
    ) -> Result<Dispatch> {
        let command = operation.to_command(cluster_id, source);

        if !operation.is_synchronous() {
            self.enqueue(cluster_id, command.clone());
            return Ok(Dispatch::Queued { command });
        }

        let watch = self.enqueue_watched(cluster_id, command.clone());
        match self.await_watched(watch, self.config.result_timeout()).await {
            Some(result) => Ok(Dispatch::Completed { command, result }),
            None => Err(ControlError::agent_timeout(cluster_id, &command.id)),
        }
    }

    /// Enqueue `command` with its result waiter registered atomically
    pub fn enqueue_watched(&self, cluster_id: &ClusterId, command: Command) -> ResultWatch {
        let summary = EnqueueSummary::of(&command);
        let (outcome, watch) = self.store.enqueue_watched(cluster_id, command);
        self.record_enqueue(cluster_id, summary, &outcome);
        watch
    }

    /// Wait on a watch from [`enqueue_watched`](Self::enqueue_watched);
    /// a timed-out registration is dropped straight away
    pub async fn await_watched(&self, watch: ResultWatch, timeout: Duration) -> Option<AckResult> {
        self.store.wait_watched(watch, timeout).await
    }

    // ========== Agent side ==========

    /// Current set for `cluster_id`, created on first sight
    pub fn ensure_set(&self, cluster_id: &ClusterId) -> CommandSet {
        self.store.ensure_set(cluster_id)
    }

    /// Non-blocking half of long-poll
    pub fn peek(&self, cluster_id: &ClusterId, since_rv: ResourceVersion) -> Option<CommandSet> {
        self.store.peek(cluster_id, since_rv)
    }

    /// Block until the next mutation of `cluster_id` or `timeout`
    pub async fn wait_for_change(
        &self,
        cluster_id: &ClusterId,
        timeout: Duration,
    ) -> Option<CommandSet> {
        self.store.wait_for_change(cluster_id, timeout).await
    }

    /// [`wait_for_change`](Self::wait_for_change), abandoned early when
    /// `cancel` flips to `true`
    pub async fn wait_for_change_or_cancel(
        &self,
        cluster_id: &ClusterId,
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<CommandSet>> {
        race_cancel(self.wait_for_change(cluster_id, timeout), cancel).await
    }

    /// Agent long-poll: return as soon as the set moves past `since_rv`,
    /// otherwise after `timeout` (capped at the configured long-poll bound)
    /// return the unchanged set for the agent to compare against.
    pub async fn poll(
        &self,
        cluster_id: &ClusterId,
        since_rv: ResourceVersion,
        timeout: Duration,
    ) -> CommandSet {
        let timeout = timeout.min(self.config.long_poll_timeout());
        match self
            .store
            .wait_for_change_since(cluster_id, since_rv, timeout)
            .await
        {
            Some(set) => set,
            None => self.store.ensure_set(cluster_id),
        }
    }

    /// Apply an agent's ack batch.
    ///
    /// Clears the cluster's whole pending set, wakes long-poll waiters and
    /// releases any caller waiting on one of the acked commands.
    #[instrument(skip_all, fields(cluster_id = %cluster_id, results = results.len()))]
    pub fn apply_ack(&self, cluster_id: &ClusterId, results: Vec<AckResult>) -> CommandSet {
        let outcome = self.store.apply_ack_with_outcome(cluster_id, results);
        self.record_ack(cluster_id, &outcome);
        outcome.set
    }

    // ========== Internal ==========

    fn record_enqueue(
        &self,
        cluster_id: &ClusterId,
        summary: EnqueueSummary,
        outcome: &EnqueueOutcome,
    ) {
        let rv = outcome.set.resource_version;
        info!(
            cluster_id = %cluster_id,
            command_id = %summary.command_id,
            command_type = %summary.command_type,
            rv,
            pending = outcome.set.len(),
            "Command enqueued"
        );

        self.events.publish(
            cluster_id,
            rv,
            PlaneEvent::CommandEnqueued {
                command_id: summary.command_id,
                command_type: summary.command_type,
                idem: summary.idem,
                source: summary.source,
            },
        );
    }

    fn record_ack(&self, cluster_id: &ClusterId, outcome: &AckOutcome) {
        let rv = outcome.set.resource_version;
        info!(
            cluster_id = %cluster_id,
            rv,
            results = outcome.deliveries.len(),
            cleared = outcome.cleared,
            "Ack batch applied"
        );

        self.events.publish(
            cluster_id,
            rv,
            PlaneEvent::AckApplied {
                results: outcome.deliveries.len(),
                cleared: outcome.cleared,
                woken_watchers: outcome.woken,
            },
        );

        for delivery in &outcome.deliveries {
            let event = if delivery.waiters > 0 {
                PlaneEvent::ResultDelivered {
                    command_id: delivery.command_id.clone(),
                    status: delivery.status,
                    waiters: delivery.waiters,
                }
            } else {
                debug!(
                    cluster_id = %cluster_id,
                    command_id = %delivery.command_id,
                    "Result arrived with no waiter"
                );
                PlaneEvent::ResultUnclaimed {
                    command_id: delivery.command_id.clone(),
                    status: delivery.status,
                }
            };
            self.events.publish(cluster_id, rv, event);
        }
    }
}

impl Default for CommandPlane {
    fn default() -> Self {
        Self::new(PlaneConfig::default())
    }
}

/// Fields of a command kept for the event published after the lock drops
struct EnqueueSummary {
    command_id: CommandId,
    command_type: CommandType,
    idem: String,
    source: String,
}

impl EnqueueSummary {
    fn of(command: &Command) -> Self {
        Self {
            command_id: command.id.clone(),
            command_type: command.command_type.clone(),
            idem: command.idem.clone(),
            source: command.source.clone(),
        }
    }
}

/// Drive `wait` unless `cancel` turns `true` first
async fn race_cancel<T>(
    wait: impl Future<Output = Option<T>>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Option<T>> {
    tokio::select! {
        outcome = wait => Ok(outcome),
        _ = cancelled(cancel) => Err(ControlError::Cancelled),
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender can never cancel
    let closed = cancel.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
