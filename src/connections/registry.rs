//! Registry of connections, unique by key.

use super::connection::{Attachment, Inbound, RvConnection};
use super::transport::TransportFactory;
use super::{ConnectionDescriptor, ConnectionEvent, ConnectionKey};
use crate::error::Result;
use crate::events::{EventHandle, Listeners, DEFAULT_BUFFER_SIZE};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// The set of known connections, kept sorted by description.
pub struct Connections {
    connections: RwLock<Vec<Arc<RvConnection>>>,
    transports: Arc<dyn TransportFactory>,
    inbound: Inbound,
    events: Arc<Listeners<ConnectionEvent>>,
}

impl Connections {
    pub fn new(transports: Arc<dyn TransportFactory>, inbound: Inbound) -> Self {
        Self::with_buffer_size(transports, inbound, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(
        transports: Arc<dyn TransportFactory>,
        inbound: Inbound,
        buffer_size: usize,
    ) -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            transports,
            inbound,
            events: Arc::new(Listeners::with_buffer_size(buffer_size)),
        }
    }

    /// Listen for registry changes and lifecycle events of every member.
    pub fn subscribe(&self) -> EventHandle<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Register a connection.
    ///
    /// Returns false, leaving the connection untouched, if another member
    /// has the same key or the connection already belongs to a registry.
    pub fn add(&self, connection: Arc<RvConnection>) -> bool {
        let mut connections = self.connections.write();

        if connections.iter().any(|c| c.key() == connection.key()) {
            warn!(connection = %connection.key(), "duplicate connection rejected");
            return false;
        }

        let attached = connection.attach(Attachment {
            transports: self.transports.clone(),
            inbound: self.inbound.clone(),
            events: self.events.clone(),
        });
        if !attached {
            warn!(connection = %connection.key(), "connection already registered elsewhere");
            return false;
        }

        let description = connection.description();
        let position = connections.partition_point(|c| c.description() <= description);
        let key = connection.key().clone();
        connections.insert(position, connection);
        drop(connections);

        debug!(connection = %key, "connection added");
        self.events.broadcast(ConnectionEvent::Added(key));
        true
    }

    /// Stop, detach and remove a connection.
    pub fn remove(&self, connection: &RvConnection) -> bool {
        let Some(member) = self.get(connection.key()) else {
            return false;
        };

        // Shut down and detach while still a member, then drop it.
        member.stop();
        member.detach();
        {
            let mut connections = self.connections.write();
            match connections.iter().position(|c| Arc::ptr_eq(c, &member)) {
                Some(index) => connections.remove(index),
                None => return false,
            };
        }

        debug!(connection = %member.key(), "connection removed");
        self.events
            .broadcast(ConnectionEvent::Removed(member.key().clone()));
        true
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<RvConnection>> {
        self.connections
            .read()
            .iter()
            .find(|c| c.key() == key)
            .cloned()
    }

    /// Look up by key, registering a new stopped connection if absent.
    pub fn get_or_create(&self, key: &ConnectionKey, description: &str) -> Arc<RvConnection> {
        if let Some(existing) = self.get(key) {
            return existing;
        }

        let connection = RvConnection::new(key.clone(), description);
        if self.add(connection.clone()) {
            return connection;
        }

        // Lost a race with another add for the same key.
        self.get(key).unwrap_or(connection)
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.connections.read().iter().any(|c| c.key() == key)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Members in description order.
    pub fn to_vec(&self) -> Vec<Arc<RvConnection>> {
        self.connections.read().clone()
    }

    pub fn start_all(&self) -> Result<()> {
        for connection in self.to_vec() {
            if connection.state() != super::State::Started {
                connection.start()?;
            }
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        for connection in self.to_vec() {
            connection.stop();
        }
    }

    /// Stop and remove every connection.
    pub fn clear(&self) {
        let removed: Vec<_> = std::mem::take(&mut *self.connections.write());
        for connection in removed {
            connection.stop();
            connection.detach();
            self.events
                .broadcast(ConnectionEvent::Removed(connection.key().clone()));
        }
    }

    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        self.to_vec().iter().map(|c| c.descriptor()).collect()
    }

    /// Register connections from their persistent form. Duplicates of
    /// existing members are skipped.
    pub fn load(&self, descriptors: &[ConnectionDescriptor]) -> Result<usize> {
        let connections = descriptors
            .iter()
            .map(RvConnection::from_descriptor)
            .collect::<Result<Vec<_>>>()?;

        Ok(connections
            .into_iter()
            .filter(|connection| self.add(connection.clone()))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{MemoryBus, State};
    use crate::marshal::{JsonMarshaller, Message};
    use crate::types::SequenceGenerator;
    use crossbeam_channel::unbounded;

    fn registry(bus: &MemoryBus) -> (Connections, crossbeam_channel::Receiver<Arc<crate::types::Record>>) {
        let (sender, receiver) = unbounded();
        let inbound = Inbound {
            sequence: Arc::new(SequenceGenerator::new()),
            marshaller: Arc::new(JsonMarshaller),
            sender,
        };
        (Connections::new(Arc::new(bus.clone()), inbound), receiver)
    }

    fn key(service: &str) -> ConnectionKey {
        ConnectionKey::new(service, "", "tcp:7500")
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let bus = MemoryBus::new();
        let (connections, _) = registry(&bus);

        let first = RvConnection::new(key("7500"), "first");
        let second = RvConnection::new(key("7500"), "second");

        assert!(connections.add(first.clone()));
        assert!(!connections.add(second.clone()));
        assert_eq!(connections.len(), 1);
        assert_eq!(connections.get(&key("7500")).unwrap().description(), "first");
        assert!(!second.is_registered());
    }

    #[test]
    fn test_sorted_by_description() {
        let bus = MemoryBus::new();
        let (connections, _) = registry(&bus);

        connections.add(RvConnection::new(key("1"), "charlie"));
        connections.add(RvConnection::new(key("2"), "alpha"));
        connections.add(RvConnection::new(key("3"), "bravo"));

        let descriptions: Vec<String> =
            connections.to_vec().iter().map(|c| c.description()).collect();
        assert_eq!(descriptions, ["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn test_remove_stops_connection() {
        let bus = MemoryBus::new();
        let (connections, _) = registry(&bus);
        let events = connections.subscribe();

        let connection = RvConnection::new(key("7500"), "prices");
        connection.add_subject("PRICES.>").unwrap();
        connections.add(connection.clone());
        connection.start().unwrap();
        assert_eq!(bus.subscription_count(), 1);

        assert!(connections.remove(&connection));
        assert_eq!(connection.state(), State::Stopped);
        assert!(!connection.is_registered());
        assert_eq!(bus.subscription_count(), 0);
        assert!(!connections.remove(&connection));

        let received = events.drain();
        assert_eq!(received.first(), Some(&ConnectionEvent::Added(key("7500"))));
        assert_eq!(received.last(), Some(&ConnectionEvent::Removed(key("7500"))));
    }

    #[test]
    fn test_remove_stops_member_before_dropping_it() {
        let bus = MemoryBus::new();
        let (connections, _) = registry(&bus);

        let member = RvConnection::new(key("7500"), "prices");
        member.add_subject("PRICES.>").unwrap();
        connections.add(member.clone());
        member.start().unwrap();
        let events = connections.subscribe();

        // Same identity, different handle: the registered member is stopped.
        let lookalike = RvConnection::new(key("7500"), "other");
        assert!(connections.remove(&lookalike));
        assert_eq!(member.state(), State::Stopped);
        assert!(!member.is_registered());
        assert!(connections.is_empty());

        // The stop is reported through the registry before the removal.
        assert_eq!(
            events.drain(),
            [
                ConnectionEvent::StateChanged {
                    key: key("7500"),
                    state: State::Stopped,
                },
                ConnectionEvent::Removed(key("7500")),
            ]
        );
    }

    #[test]
    fn test_get_or_create() {
        let bus = MemoryBus::new();
        let (connections, _) = registry(&bus);

        let a = connections.get_or_create(&key("7500"), "created");
        let b = connections.get_or_create(&key("7500"), "ignored");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.description(), "created");
        assert!(a.is_registered());
        assert_eq!(a.state(), State::Stopped);
        assert!(connections.contains(&key("7500")));
    }

    #[test]
    fn test_descriptors_and_load() {
        let bus = MemoryBus::new();
        let (connections, _) = registry(&bus);

        let connection = RvConnection::new(key("7500"), "prices");
        connection.add_subject("PRICES.IBM").unwrap();
        connection.add_subject("PRICES.MSFT").unwrap();
        connections.add(connection);

        let descriptors = connections.descriptors();
        assert_eq!(descriptors[0].subjects, ["PRICES.IBM", "PRICES.MSFT"]);

        let (other, _) = registry(&bus);
        assert_eq!(other.load(&descriptors).unwrap(), 1);
        assert_eq!(other.load(&descriptors).unwrap(), 0);
        assert_eq!(other.descriptors(), descriptors);
    }

    #[test]
    fn test_clear_and_stop_all() {
        let bus = MemoryBus::new();
        let (connections, receiver) = registry(&bus);

        for service in ["1", "2"] {
            let connection = RvConnection::new(key(service), service);
            connection.add_subject("X").unwrap();
            connections.add(connection);
        }
        connections.start_all().unwrap();
        bus.publish(&Message::new("X"));
        assert_eq!(receiver.try_iter().count(), 2);

        connections.stop_all();
        assert!(connections.to_vec().iter().all(|c| c.state() == State::Stopped));
        assert_eq!(connections.len(), 2);

        connections.clear();
        assert!(connections.is_empty());
    }
}
