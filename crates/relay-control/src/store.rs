//! Versioned per-cluster command store
//!
//! The store owns every cluster's [`CommandSet`] together with the two waiter
//! registries, all behind one mutex. Critical sections only copy snapshots,
//! bump counters and make non-blocking sends; nothing waits while holding
//! the lock. Waiting happens on the returned mailboxes after release.

use crate::correlation::ResultWaiters;
use crate::notify::ChangeWaiters;
use parking_lot::Mutex;
use relay_types::{
    AckResult, AckStatus, ClusterId, Command, CommandId, CommandSet, ResourceVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Pending wait for one command's ack, registered ahead of time
#[derive(Debug)]
pub struct ResultWatch {
    cluster_id: ClusterId,
    command_id: CommandId,
    rx: oneshot::Receiver<AckResult>,
}

impl ResultWatch {
    /// Command this watch waits on
    pub fn command_id(&self) -> &CommandId {
        &self.command_id
    }

    /// Wait up to `timeout` for the ack; `None` when the deadline passes.
    ///
    /// A timed-out registration lingers until the cluster's next ack or
    /// registration; [`CommandStore::wait_watched`] removes it at once.
    pub async fn wait(self, timeout: Duration) -> Option<AckResult> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

/// What an enqueue did
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub set: CommandSet,
    /// Change waiters that were still listening
    pub woken: usize,
}

/// Per-result delivery record from an ack batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub command_id: CommandId,
    pub status: AckStatus,
    /// Waiters that received the result; zero means it was dropped
    pub waiters: usize,
}

/// What an ack application did
#[derive(Debug, Clone)]
pub struct AckOutcome {
    pub set: CommandSet,
    /// Pending commands discarded by the clear
    pub cleared: usize,
    pub woken: usize,
    pub deliveries: Vec<Delivery>,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneStats {
    pub clusters: usize,
    pub pending_commands: usize,
    pub change_waiters: usize,
    pub result_waiters: usize,
}

enum ChangeCheck {
    Ready(CommandSet),
    Pending(oneshot::Receiver<()>),
}

#[derive(Debug, Default)]
struct Inner {
    sets: HashMap<ClusterId, CommandSet>,
    changes: ChangeWaiters,
    results: ResultWaiters,
}

impl Inner {
    fn set_mut(&mut self, cluster_id: &ClusterId) -> &mut CommandSet {
        self.sets
            .entry(cluster_id.clone())
            .or_insert_with(|| CommandSet::new(cluster_id.clone()))
    }

    fn append(&mut self, cluster_id: &ClusterId, command: Command) -> EnqueueOutcome {
        let set = self.set_mut(cluster_id);
        set.commands.push(command);
        set.resource_version += 1;
        let set = set.clone();

        let woken = self.changes.notify(cluster_id);
        debug!(
            cluster_id = %cluster_id,
            rv = set.resource_version,
            woken,
            "Command set grew, watchers signalled"
        );

        EnqueueOutcome { set, woken }
    }
}

/// Process-wide store of per-cluster command sets
#[derive(Debug, Default)]
pub struct CommandStore {
    inner: Mutex<Inner>,
}

impl CommandStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current set for `cluster_id`, created at version 1 on first sight
    pub fn ensure_set(&self, cluster_id: &ClusterId) -> CommandSet {
        self.inner.lock().set_mut(cluster_id).clone()
    }

    /// Append `command`, bump the version and wake change waiters
    pub fn enqueue(&self, cluster_id: &ClusterId, command: Command) -> CommandSet {
        self.enqueue_with_outcome(cluster_id, command).set
    }

    /// [`enqueue`](Self::enqueue), also reporting how many watchers woke
    pub fn enqueue_with_outcome(&self, cluster_id: &ClusterId, command: Command) -> EnqueueOutcome {
        self.inner.lock().append(cluster_id, command)
    }

    /// Enqueue `command` with a result waiter already registered for it.
    ///
    /// Both happen under the same lock, so an agent cannot ack the command
    /// before anyone is listening.
    pub fn enqueue_watched(
        &self,
        cluster_id: &ClusterId,
        command: Command,
    ) -> (EnqueueOutcome, ResultWatch) {
        let mut inner = self.inner.lock();
        let rx = inner.results.register(cluster_id, &command.id);
        let watch = ResultWatch {
            cluster_id: cluster_id.clone(),
            command_id: command.id.clone(),
            rx,
        };
        let outcome = inner.append(cluster_id, command);
        (outcome, watch)
    }

    /// Snapshot of the set if its version moved past `since_rv`
    pub fn peek(&self, cluster_id: &ClusterId, since_rv: ResourceVersion) -> Option<CommandSet> {
        let mut inner = self.inner.lock();
        let set = inner.set_mut(cluster_id);
        if set.resource_version > since_rv {
            Some(set.clone())
        } else {
            None
        }
    }

    /// Clear the pending set, bump the version, wake change waiters and
    /// hand each result to whoever is waiting for it.
    ///
    /// The whole pending set is cleared, including commands that have no
    /// result in `results`. An empty batch still moves the version.
    pub fn apply_ack(&self, cluster_id: &ClusterId, results: Vec<AckResult>) -> CommandSet {
        self.apply_ack_with_outcome(cluster_id, results).set
    }

    /// [`apply_ack`](Self::apply_ack), also reporting clears and deliveries
    pub fn apply_ack_with_outcome(
        &self,
        cluster_id: &ClusterId,
        results: Vec<AckResult>,
    ) -> AckOutcome {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let set = inner.set_mut(cluster_id);
        let cleared = set.commands.len();
        set.commands.clear();
        set.resource_version += 1;
        let set = set.clone();

        let woken = inner.changes.notify(cluster_id);

        let mut deliveries = Vec::with_capacity(results.len());
        for result in &results {
            let waiters = inner.results.deliver(cluster_id, result);
            deliveries.push(Delivery {
                command_id: result.command_id.clone(),
                status: result.status,
                waiters,
            });
        }
        inner.results.prune(cluster_id);

        debug!(
            cluster_id = %cluster_id,
            rv = set.resource_version,
            cleared,
            woken,
            "Ack batch applied"
        );

        AckOutcome {
            set,
            cleared,
            woken,
            deliveries,
        }
    }

    /// Block until the next mutation of `cluster_id` or `timeout`.
    ///
    /// Returns the set as of the wake-up, or `None` on timeout.
    pub async fn wait_for_change(
        &self,
        cluster_id: &ClusterId,
        timeout: Duration,
    ) -> Option<CommandSet> {
        let rx = self.inner.lock().changes.register(cluster_id);
        self.await_change(cluster_id, rx, timeout).await
    }

    /// Like [`wait_for_change`](Self::wait_for_change), but returns at once
    /// if the version already moved past `since_rv`. The check and the
    /// registration share one critical section, so no mutation between a
    /// caller's last read and its wait can be missed.
    pub async fn wait_for_change_since(
        &self,
        cluster_id: &ClusterId,
        since_rv: ResourceVersion,
        timeout: Duration,
    ) -> Option<CommandSet> {
        match self.check_or_register(cluster_id, since_rv) {
            ChangeCheck::Ready(set) => Some(set),
            ChangeCheck::Pending(rx) => self.await_change(cluster_id, rx, timeout).await,
        }
    }

    /// Block until an ack for `(cluster_id, command_id)` is applied or
    /// `timeout` elapses. Acks applied before this call are not replayed.
    pub async fn wait_for_result(
        &self,
        cluster_id: &ClusterId,
        command_id: &CommandId,
        timeout: Duration,
    ) -> Option<AckResult> {
        self.wait_watched(self.watch_result(cluster_id, command_id), timeout)
            .await
    }

    /// Register interest in a command's result without waiting yet
    pub fn watch_result(&self, cluster_id: &ClusterId, command_id: &CommandId) -> ResultWatch {
        let rx = self.inner.lock().results.register(cluster_id, command_id);
        ResultWatch {
            cluster_id: cluster_id.clone(),
            command_id: command_id.clone(),
            rx,
        }
    }

    /// Wait on `watch` and, when it times out, drop its registration
    pub async fn wait_watched(&self, watch: ResultWatch, timeout: Duration) -> Option<AckResult> {
        let cluster_id = watch.cluster_id.clone();
        let command_id = watch.command_id.clone();

        let result = watch.wait(timeout).await;
        if result.is_none() {
            self.inner.lock().results.forget(&cluster_id, &command_id);
        }
        result
    }

    /// Point-in-time counters across every cluster
    pub fn stats(&self) -> PlaneStats {
        let inner = self.inner.lock();
        PlaneStats {
            clusters: inner.sets.len(),
            pending_commands: inner.sets.values().map(CommandSet::len).sum(),
            change_waiters: inner.changes.live(),
            result_waiters: inner.results.live(),
        }
    }

    fn check_or_register(&self, cluster_id: &ClusterId, since_rv: ResourceVersion) -> ChangeCheck {
        let mut inner = self.inner.lock();
        let set = inner.set_mut(cluster_id);
        if set.resource_version > since_rv {
            return ChangeCheck::Ready(set.clone());
        }
        ChangeCheck::Pending(inner.changes.register(cluster_id))
    }

    async fn await_change(
        &self,
        cluster_id: &ClusterId,
        rx: oneshot::Receiver<()>,
        timeout: Duration,
    ) -> Option<CommandSet> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Some(self.ensure_set(cluster_id)),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use relay_types::{CommandType, Fields};
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    fn restart(cluster: &ClusterId) -> Command {
        let mut target = Fields::new();
        target.insert("namespace".into(), "default".into());
        target.insert("name".into(), "api-0".into());
        Command::new(cluster, CommandType::RestartPod, target, Fields::new(), "test")
    }

    #[test]
    fn test_ensure_set_starts_at_one() {
        let store = CommandStore::new();
        let set = store.ensure_set(&ClusterId::new("east"));
        assert_eq!(set.resource_version, 1);
        assert!(set.commands.is_empty());

        // Idempotent
        assert_eq!(store.ensure_set(&ClusterId::new("east")).resource_version, 1);
    }

    #[test]
    fn test_enqueue_appends_and_bumps() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("east");
        let cmd = restart(&cluster);

        let set = store.enqueue(&cluster, cmd.clone());
        assert_eq!(set.resource_version, 2);
        assert_eq!(set.commands, vec![cmd]);
    }

    #[test]
    fn test_peek_only_reports_newer_versions() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("east");

        assert!(store.peek(&cluster, 1).is_none());
        assert!(store.peek(&cluster, 0).is_some());

        store.enqueue(&cluster, restart(&cluster));
        assert_eq!(store.peek(&cluster, 1).unwrap().resource_version, 2);
        assert!(store.peek(&cluster, 2).is_none());
        assert!(store.peek(&cluster, 99).is_none());
    }

    #[test]
    fn test_ack_clears_everything_pending() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("east");
        let first = restart(&cluster);
        let second = restart(&cluster);

        store.enqueue(&cluster, first.clone());
        let set = store.enqueue(&cluster, second);
        assert_eq!(set.len(), 2);
        assert_eq!(set.resource_version, 3);

        let outcome = store.apply_ack_with_outcome(&cluster, vec![AckResult::succeeded(first.id)]);
        assert_eq!(outcome.set.resource_version, 4);
        assert!(outcome.set.commands.is_empty());
        assert_eq!(outcome.cleared, 2);
    }

    #[test]
    fn test_empty_ack_still_bumps() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("east");
        let set = store.apply_ack(&cluster, Vec::new());
        assert_eq!(set.resource_version, 2);
    }

    #[test]
    fn test_clusters_are_independent() {
        let store = CommandStore::new();
        let east = ClusterId::new("east");
        let west = ClusterId::new("west");

        store.enqueue(&east, restart(&east));
        store.enqueue(&east, restart(&east));

        assert_eq!(store.ensure_set(&west).resource_version, 1);
        assert_eq!(store.ensure_set(&east).resource_version, 3);
    }

    #[tokio::test]
    async fn test_wait_for_change_times_out() {
        let store = CommandStore::new();
        let changed = store.wait_for_change(&ClusterId::new("east"), SHORT).await;
        assert!(changed.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_for_change_wakes_on_enqueue() {
        let store = Arc::new(CommandStore::new());
        let cluster = ClusterId::new("east");
        let seen = store.ensure_set(&cluster).resource_version;

        let waiter = {
            let store = store.clone();
            let cluster = cluster.clone();
            tokio::spawn(async move { store.wait_for_change(&cluster, LONG).await })
        };

        // Let the waiter register before mutating
        while store.stats().change_waiters == 0 {
            tokio::task::yield_now().await;
        }
        store.enqueue(&cluster, restart(&cluster));

        let set = waiter.await.unwrap().expect("change");
        assert!(set.resource_version > seen);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_since_returns_immediately_when_behind() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("east");
        store.enqueue(&cluster, restart(&cluster));

        let set = store
            .wait_for_change_since(&cluster, 1, SHORT)
            .await
            .expect("already newer");
        assert_eq!(set.resource_version, 2);

        assert!(store.wait_for_change_since(&cluster, 2, SHORT).await.is_none());
    }

    #[tokio::test]
    async fn test_result_delivered_to_registered_watch() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("east");
        let cmd = restart(&cluster);

        let (_, watch) = store.enqueue_watched(&cluster, cmd.clone());
        store.apply_ack(&cluster, vec![AckResult::succeeded(cmd.id.clone())]);

        let result = watch.wait(SHORT).await.expect("result");
        assert_eq!(result.command_id, cmd.id);
        assert_eq!(result.status, AckStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_late_result_waiter_times_out() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("east");
        let cmd = restart(&cluster);
        store.enqueue(&cluster, cmd.clone());

        let outcome = store.apply_ack_with_outcome(&cluster, vec![AckResult::succeeded(cmd.id.clone())]);
        assert_eq!(outcome.deliveries[0].waiters, 0);

        assert!(store.wait_for_result(&cluster, &cmd.id, SHORT).await.is_none());
    }

    #[tokio::test]
    async fn test_timed_out_waiters_are_not_counted() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("east");

        store.wait_for_change(&cluster, Duration::from_millis(5)).await;
        store
            .wait_for_result(&cluster, &CommandId::new("x"), Duration::from_millis(5))
            .await;

        let stats = store.stats();
        assert_eq!(stats.change_waiters, 0);
        assert_eq!(stats.result_waiters, 0);
        assert_eq!(stats.clusters, 0);
    }

    #[tokio::test]
    async fn test_timed_out_result_waits_leave_nothing_behind() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("offline");

        for i in 0..1000 {
            let id = CommandId::new(format!("cmd-{}", i));
            assert!(store.wait_for_result(&cluster, &id, Duration::ZERO).await.is_none());
        }

        assert_eq!(store.inner.lock().results.tracked(), 0);
        assert_eq!(store.stats().result_waiters, 0);
    }

    #[tokio::test]
    async fn test_timed_out_watched_enqueue_is_forgotten() {
        let store = CommandStore::new();
        let cluster = ClusterId::new("offline");

        for _ in 0..10 {
            let (_, watch) = store.enqueue_watched(&cluster, restart(&cluster));
            assert!(store.wait_watched(watch, Duration::ZERO).await.is_none());
        }

        assert_eq!(store.inner.lock().results.tracked(), 0);
        assert_eq!(store.ensure_set(&cluster).len(), 10);
    }

    #[derive(Debug, Clone)]
    enum Mutation {
        Enqueue,
        Ack(usize),
    }

    fn mutation_strategy() -> impl Strategy<Value = Vec<Mutation>> {
        proptest::collection::vec(
            prop_oneof![Just(Mutation::Enqueue), (0usize..3).prop_map(Mutation::Ack)],
            0..40,
        )
    }

    proptest! {
        #[test]
        fn property_resource_version_is_gapless(ops in mutation_strategy()) {
            let store = CommandStore::new();
            let cluster = ClusterId::new("prop");
            let mut last = store.ensure_set(&cluster).resource_version;

            for op in &ops {
                let set = match op {
                    Mutation::Enqueue => store.enqueue(&cluster, restart(&cluster)),
                    Mutation::Ack(n) => {
                        let results = (0..*n)
                            .map(|i| AckResult::succeeded(CommandId::new(format!("r{}", i))))
                            .collect();
                        store.apply_ack(&cluster, results)
                    }
                };
                prop_assert_eq!(set.resource_version, last + 1);
                last = set.resource_version;
            }

            prop_assert_eq!(store.ensure_set(&cluster).resource_version, 1 + ops.len() as u64);
        }
    }
}
