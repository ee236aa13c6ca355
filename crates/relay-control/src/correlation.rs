//! Ack correlation registry backing synchronous wait-for-result
//!
//! Results go only to waiters registered at the moment the ack is applied.
//! Nothing is retained for late callers.

use relay_types::{AckResult, ClusterId, CommandId};
use std::collections::HashMap;
use tokio::sync::oneshot;

type Mailboxes = Vec<oneshot::Sender<AckResult>>;

#[derive(Debug, Default)]
pub(crate) struct ResultWaiters {
    by_cluster: HashMap<ClusterId, HashMap<CommandId, Mailboxes>>,
}

impl ResultWaiters {
    /// Register a one-shot result mailbox for `(cluster_id, command_id)`
    pub(crate) fn register(
        &mut self,
        cluster_id: &ClusterId,
        command_id: &CommandId,
    ) -> oneshot::Receiver<AckResult> {
        self.prune(cluster_id);
        let slot = self
            .by_cluster
            .entry(cluster_id.clone())
            .or_default()
            .entry(command_id.clone())
            .or_default();

        let (tx, rx) = oneshot::channel();
        slot.push(tx);
        rx
    }

    /// Hand `result` to every waiter for its command and drop the
    /// registrations. Returns how many waiters received a copy.
    pub(crate) fn deliver(&mut self, cluster_id: &ClusterId, result: &AckResult) -> usize {
        let Some(commands) = self.by_cluster.get_mut(cluster_id) else {
            return 0;
        };
        let Some(waiters) = commands.remove(&result.command_id) else {
            return 0;
        };

        waiters
            .into_iter()
            .filter_map(|tx| tx.send(result.clone()).ok())
            .count()
    }

    /// Forget mailboxes for `cluster_id` whose owners stopped waiting
    pub(crate) fn prune(&mut self, cluster_id: &ClusterId) {
        if let Some(commands) = self.by_cluster.get_mut(cluster_id) {
            commands.retain(|_, waiters| {
                waiters.retain(|tx| !tx.is_closed());
                !waiters.is_empty()
            });
            if commands.is_empty() {
                self.by_cluster.remove(cluster_id);
            }
        }
    }

    /// Drop the abandoned mailboxes of one command after its waiter gave up
    pub(crate) fn forget(&mut self, cluster_id: &ClusterId, command_id: &CommandId) {
        let Some(commands) = self.by_cluster.get_mut(cluster_id) else {
            return;
        };
        if let Some(waiters) = commands.get_mut(command_id) {
            waiters.retain(|tx| !tx.is_closed());
            if waiters.is_empty() {
                commands.remove(command_id);
            }
        }
        if commands.is_empty() {
            self.by_cluster.remove(cluster_id);
        }
    }

    /// Commands with at least one registration, live or not
    pub(crate) fn tracked(&self) -> usize {
        self.by_cluster.values().map(HashMap::len).sum()
    }

    /// Waiters still listening, across all clusters
    pub(crate) fn live(&self) -> usize {
        self.by_cluster
            .values()
            .flat_map(|commands| commands.values())
            .flatten()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}
