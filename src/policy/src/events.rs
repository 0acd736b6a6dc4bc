//! Service events derived from second-hop transitions
//!
//! Events are collected while a mutation runs and handed back with the
//! committed result. An [`EventDispatcher`] can additionally publish them on a
//! broadcast channel once the transaction has committed.

use overlay_core::{DenormCollection, EntityId, EntityType, ReadTx};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Kind of service event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceEventType {
    DialAccessGained,
    DialAccessLost,
    BindAccessGained,
    BindAccessLost,
    /// Posture checks attached to the service changed
    ServiceUpdated,
}

impl fmt::Display for ServiceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceEventType::DialAccessGained => "dial-access-gained",
            ServiceEventType::DialAccessLost => "dial-access-lost",
            ServiceEventType::BindAccessGained => "bind-access-gained",
            ServiceEventType::BindAccessLost => "bind-access-lost",
            ServiceEventType::ServiceUpdated => "service-updated",
        };
        f.write_str(name)
    }
}

/// Notification for one identity about one service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEvent {
    pub event_type: ServiceEventType,
    pub identity_id: EntityId,
    pub service_id: EntityId,
}

impl ServiceEvent {
    pub fn new(
        event_type: ServiceEventType,
        identity_id: impl Into<EntityId>,
        service_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            event_type,
            identity_id: identity_id.into(),
            service_id: service_id.into(),
        }
    }
}

/// Collects service events for one mutation
#[derive(Debug, Default)]
pub struct ServiceEventSink {
    events: Vec<ServiceEvent>,
}

impl ServiceEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pair whose count crossed zero in `collection`
    pub fn count_crossed_zero<T: ReadTx + ?Sized>(
        &mut self,
        tx: &T,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
        gained: bool,
    ) {
        let event_type = match (collection, gained) {
            (DenormCollection::IdentityServiceDial, true) => ServiceEventType::DialAccessGained,
            (DenormCollection::IdentityServiceDial, false) => ServiceEventType::DialAccessLost,
            (DenormCollection::IdentityServiceBind, true) => ServiceEventType::BindAccessGained,
            (DenormCollection::IdentityServiceBind, false) => ServiceEventType::BindAccessLost,
            (DenormCollection::PostureCheckServiceDial, _)
            | (DenormCollection::PostureCheckServiceBind, _) => {
                self.service_updated(tx, target_id);
                return;
            }
            _ => return,
        };

        trace!(event = %event_type, identity = %source_id, service = %target_id, "service event");
        self.events
            .push(ServiceEvent::new(event_type, source_id, target_id));
    }

    /// Notify every identity holding dial or bind access to a service
    fn service_updated<T: ReadTx + ?Sized>(&mut self, tx: &T, service_id: &str) {
        let mut identities = BTreeSet::new();
        for collection in [
            DenormCollection::IdentityServiceDial,
            DenormCollection::IdentityServiceBind,
        ] {
            identities.extend(
                tx.ref_partners(collection, EntityType::Service, service_id)
                    .into_iter()
                    .map(|(identity_id, _)| identity_id),
            );
        }

        debug!(service = %service_id, identities = identities.len(), "posture checks changed");
        for identity_id in identities {
            self.events.push(ServiceEvent::new(
                ServiceEventType::ServiceUpdated,
                identity_id,
                service_id,
            ));
        }
    }

    pub fn events(&self) -> &[ServiceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ServiceEvent> {
        self.events
    }
}

/// Publishes committed service events to subscribers
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<ServiceEvent>,
}

impl EventDispatcher {
    /// Create a dispatcher whose channel buffers `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        info!(capacity, "service event dispatcher started");
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish events, returning how many were delivered to at least one subscriber
    pub fn dispatch(&self, events: Vec<ServiceEvent>) -> usize {
        let total = events.len();
        let mut delivered = 0;
        for event in events {
            if self.sender.send(event).is_ok() {
                delivered += 1;
            }
        }
        if delivered < total {
            trace!(total, delivered, "no subscribers for some service events");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::{CoreError, MemoryStore, TransactionalStore};

    #[test]
    fn test_identity_service_events() {
        let store = MemoryStore::new();
        let mut sink = ServiceEventSink::new();

        store
            .view(|tx| {
                sink.count_crossed_zero(tx, DenormCollection::IdentityServiceDial, "i1", "s1", true);
                sink.count_crossed_zero(tx, DenormCollection::IdentityServiceBind, "i1", "s1", false);
                sink.count_crossed_zero(tx, DenormCollection::IdentityEdgeRouter, "i1", "r1", true);
                Ok::<_, CoreError>(())
            })
            .unwrap();

        assert_eq!(
            sink.into_events(),
            vec![
                ServiceEvent::new(ServiceEventType::DialAccessGained, "i1", "s1"),
                ServiceEvent::new(ServiceEventType::BindAccessLost, "i1", "s1"),
            ]
        );
    }

    #[test]
    fn test_posture_changes_notify_service_users() {
        let store = MemoryStore::new();
        store
            .update(|tx| {
                tx.increment_ref(DenormCollection::IdentityServiceDial, "i1", "s1")?;
                tx.increment_ref(DenormCollection::IdentityServiceBind, "i2", "s1")?;
                tx.increment_ref(DenormCollection::IdentityServiceBind, "i1", "s1")?;
                Ok::<_, CoreError>(())
            })
            .unwrap();

        let mut sink = ServiceEventSink::new();
        store
            .view(|tx| {
                sink.count_crossed_zero(tx, DenormCollection::PostureCheckServiceDial, "pc1", "s1", true);
                Ok::<_, CoreError>(())
            })
            .unwrap();

        let events = sink.into_events();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.event_type == ServiceEventType::ServiceUpdated && e.service_id == "s1"));
    }

    #[tokio::test]
    async fn test_dispatcher_broadcasts() {
        let dispatcher = EventDispatcher::new(16);
        let mut rx = dispatcher.subscribe();

        let delivered = dispatcher.dispatch(vec![ServiceEvent::new(
            ServiceEventType::DialAccessGained,
            "i1",
            "s1",
        )]);
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.identity_id, "i1");
    }

    #[test]
    fn test_dispatch_without_subscribers() {
        let dispatcher = EventDispatcher::new(4);
        assert_eq!(dispatcher.subscriber_count(), 0);
        let delivered = dispatcher.dispatch(vec![ServiceEvent::new(
            ServiceEventType::BindAccessLost,
            "i1",
            "s1",
        )]);
        assert_eq!(delivered, 0);
    }
}
