//! Change-notification registry backing long-poll
//!
//! Each waiter owns a single-slot mailbox (a oneshot channel). Fan-out makes
//! one non-blocking deposit per mailbox and forgets it, so a waiter that has
//! already given up can never stall the mutation that signals it.

use relay_types::ClusterId;
use std::collections::HashMap;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub(crate) struct ChangeWaiters {
    by_cluster: HashMap<ClusterId, Vec<oneshot::Sender<()>>>,
}

impl ChangeWaiters {
    /// Register a one-shot wake-up for the next mutation of `cluster_id`
    pub(crate) fn register(&mut self, cluster_id: &ClusterId) -> oneshot::Receiver<()> {
        let slot = self.by_cluster.entry(cluster_id.clone()).or_default();
        // Drop mailboxes whose owners timed out since the last fan-out
        slot.retain(|tx| !tx.is_closed());

        let (tx, rx) = oneshot::channel();
        slot.push(tx);
        rx
    }

    /// Wake every waiter registered for `cluster_id`, consuming the
    /// registrations. Returns how many waiters were still listening.
    pub(crate) fn notify(&mut self, cluster_id: &ClusterId) -> usize {
        self.by_cluster
            .remove(cluster_id)
            .map(|waiters| {
                waiters
                    .into_iter()
                    .filter_map(|tx| tx.send(()).ok())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Waiters still listening, across all clusters
    pub(crate) fn live(&self) -> usize {
        self.by_cluster
            .values()
            .flatten()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}
