//! Command plane event stream
//!
//! Every mutation of a cluster's command set, and every result delivery, is
//! published on a broadcast channel for audit and monitoring layers. Events
//! are published after the store lock is released.

use chrono::{DateTime, Utc};
use relay_types::{AckStatus, ClusterId, CommandId, CommandType, ResourceVersion};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Something that happened inside the command plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaneEvent {
    /// A command joined a cluster's pending set
    CommandEnqueued {
        command_id: CommandId,
        command_type: CommandType,
        idem: String,
        source: String,
    },
    /// An ack batch cleared a cluster's pending set
    AckApplied {
        results: usize,
        cleared: usize,
        woken_watchers: usize,
    },
    /// A result reached at least one registered waiter
    ResultDelivered {
        command_id: CommandId,
        status: AckStatus,
        waiters: usize,
    },
    /// A result arrived with nobody waiting for it and was dropped
    ResultUnclaimed {
        command_id: CommandId,
        status: AckStatus,
    },
}

/// Event with routing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneEventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub cluster_id: ClusterId,
    /// Resource version of the cluster's set after the mutation
    pub resource_version: ResourceVersion,
    pub event: PlaneEvent,
}

/// Publishes plane events to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlaneEventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaneEventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish(
        &self,
        cluster_id: &ClusterId,
        resource_version: ResourceVersion,
        event: PlaneEvent,
    ) {
        let envelope = PlaneEventEnvelope {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            cluster_id: cluster_id.clone(),
            resource_version,
            event,
        };
        // No subscribers is fine
        let _ = self.tx.send(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        bus.publish(
            &ClusterId::new("east"),
            2,
            PlaneEvent::AckApplied {
                results: 0,
                cleared: 0,
                woken_watchers: 0,
            },
        );
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_envelope() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(
            &ClusterId::new("east"),
            3,
            PlaneEvent::ResultUnclaimed {
                command_id: CommandId::new("abc"),
                status: AckStatus::Succeeded,
            },
        );

        match rx.try_recv() {
            Ok(envelope) => {
                assert_eq!(envelope.cluster_id, ClusterId::new("east"));
                assert_eq!(envelope.resource_version, 3);
                assert!(matches!(envelope.event, PlaneEvent::ResultUnclaimed { .. }));
            }
            Err(_) => panic!("Expected to receive event"),
        }
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let value = serde_json::to_value(PlaneEvent::AckApplied {
            results: 1,
            cleared: 2,
            woken_watchers: 0,
        })
        .unwrap();
        assert_eq!(value["kind"], "ack_applied");
    }
}
