//! In-process bus.
//!
//! Every transport created by one [`MemoryBus`] shares its subscription
//! table, so a message published on any of them (or on the bus itself)
//! reaches every subscription whose pattern matches the send subject.

use super::transport::{ErrorCallback, MessageCallback, SubscriptionId, Transport, TransportFactory};
use super::ConnectionKey;
use crate::error::{LedgerError, Result};
use crate::marshal::Message;
use crate::subjects::SubjectPattern;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct Subscription {
    transport: u64,
    pattern: SubjectPattern,
    callback: MessageCallback,
}

#[derive(Default)]
struct BusState {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    error_callbacks: RwLock<HashMap<u64, (String, ErrorCallback)>>,
    unreachable: RwLock<HashSet<String>>,
    next_id: AtomicU64,
}

impl BusState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A [`TransportFactory`] whose transports talk to each other in memory.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<BusState>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make transport creation for `daemon` fail (or succeed again).
    pub fn set_unreachable(&self, daemon: &str, unreachable: bool) {
        let mut set = self.state.unreachable.write();
        if unreachable {
            set.insert(daemon.to_string());
        } else {
            set.remove(daemon);
        }
    }

    /// Deliver `message` to every matching subscription. Returns the number
    /// of deliveries. Messages without a send subject go nowhere.
    pub fn publish(&self, message: &Message) -> usize {
        deliver(&self.state, message)
    }

    /// Raise an asynchronous error on every live transport for `daemon`.
    pub fn report_error(&self, daemon: &str, message: &str) {
        let callbacks: Vec<ErrorCallback> = self
            .state
            .error_callbacks
            .read()
            .values()
            .filter(|(d, _)| d == daemon)
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            callback(message.to_string());
        }
    }

    /// Live subscriptions across all transports.
    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.read().len()
    }
}

fn deliver(state: &BusState, message: &Message) -> usize {
    let Some(subject) = message.send_subject.as_deref().filter(|s| !s.is_empty()) else {
        return 0;
    };

    // Callbacks run outside the lock so they may subscribe or publish.
    let targets: Vec<MessageCallback> = state
        .subscriptions
        .read()
        .values()
        .filter(|s| s.pattern.matches(subject))
        .map(|s| s.callback.clone())
        .collect();

    for callback in &targets {
        callback(message.clone());
    }
    targets.len()
}

impl TransportFactory for MemoryBus {
    fn create(&self, key: &ConnectionKey, on_error: ErrorCallback) -> Result<Box<dyn Transport>> {
        if self.state.unreachable.read().contains(&key.daemon) {
            return Err(LedgerError::Transport(format!(
                "daemon {} is unreachable",
                key.daemon
            )));
        }

        let id = self.state.next_id();
        self.state
            .error_callbacks
            .write()
            .insert(id, (key.daemon.clone(), on_error));
        debug!(connection = %key, transport = id, "memory transport created");

        Ok(Box::new(MemoryTransport {
            id,
            state: self.state.clone(),
            destroyed: false,
        }))
    }
}

struct MemoryTransport {
    id: u64,
    state: Arc<BusState>,
    destroyed: bool,
}

impl Transport for MemoryTransport {
    fn subscribe(&mut self, subject: &str, callback: MessageCallback) -> Result<SubscriptionId> {
        if self.destroyed {
            return Err(LedgerError::Transport("transport destroyed".to_string()));
        }

        let pattern = SubjectPattern::new(subject)?;
        let id = SubscriptionId(self.state.next_id());
        self.state.subscriptions.write().insert(
            id,
            Subscription {
                transport: self.id,
                pattern,
                callback,
            },
        );
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.state.subscriptions.write().remove(&id);
    }

    fn publish(&self, message: &Message) -> Result<()> {
        if self.destroyed {
            return Err(LedgerError::Transport("transport destroyed".to_string()));
        }
        if message.send_subject.as_deref().map_or(true, str::is_empty) {
            return Err(LedgerError::Transport(
                "cannot publish without a send subject".to_string(),
            ));
        }
        deliver(&self.state, message);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let id = self.id;
        self.state
            .subscriptions
            .write()
            .retain(|_, s| s.transport != id);
        self.state.error_callbacks.write().remove(&id);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn key(daemon: &str) -> ConnectionKey {
        ConnectionKey::new("7500", "", daemon)
    }

    fn no_errors() -> ErrorCallback {
        Arc::new(|_| {})
    }

    fn collector() -> (MessageCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: MessageCallback = Arc::new(move |m: Message| {
            sink.lock().push(m.send_subject.unwrap_or_default());
        });
        (callback, seen)
    }

    #[test]
    fn test_wildcard_delivery() {
        let bus = MemoryBus::new();
        let mut transport = bus.create(&key("local"), no_errors()).unwrap();
        let (callback, seen) = collector();
        transport.subscribe("PRICES.*.IBM", callback).unwrap();

        assert_eq!(bus.publish(&Message::new("PRICES.EQ.IBM")), 1);
        assert_eq!(bus.publish(&Message::new("PRICES.EQ.MSFT")), 0);
        assert_eq!(bus.publish(&Message::default()), 0);
        assert_eq!(*seen.lock(), ["PRICES.EQ.IBM"]);
    }

    #[test]
    fn test_transport_publish_reaches_other_transports() {
        let bus = MemoryBus::new();
        let mut a = bus.create(&key("a"), no_errors()).unwrap();
        let b = bus.create(&key("b"), no_errors()).unwrap();
        let (callback, seen) = collector();
        a.subscribe("ORDERS.>", callback).unwrap();

        b.publish(&Message::new("ORDERS.NEW.1")).unwrap();
        assert!(b.publish(&Message::default()).is_err());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_destroy_drops_subscriptions() {
        let bus = MemoryBus::new();
        let mut transport = bus.create(&key("local"), no_errors()).unwrap();
        let (callback, _) = collector();
        transport.subscribe("A", callback.clone()).unwrap();
        let id = transport.subscribe("B", callback).unwrap();
        assert_eq!(bus.subscription_count(), 2);

        transport.unsubscribe(id);
        assert_eq!(bus.subscription_count(), 1);

        transport.destroy();
        assert_eq!(bus.subscription_count(), 0);
        assert!(transport.publish(&Message::new("A")).is_err());
    }

    #[test]
    fn test_unreachable_daemon() {
        let bus = MemoryBus::new();
        bus.set_unreachable("remote", true);
        assert!(matches!(
            bus.create(&key("remote"), no_errors()),
            Err(LedgerError::Transport(_))
        ));

        bus.set_unreachable("remote", false);
        assert!(bus.create(&key("remote"), no_errors()).is_ok());
    }

    #[test]
    fn test_report_error() {
        let bus = MemoryBus::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _transport = bus
            .create(&key("remote"), Arc::new(move |e| sink.lock().push(e)))
            .unwrap();

        bus.report_error("remote", "link down");
        bus.report_error("elsewhere", "ignored");
        assert_eq!(*errors.lock(), ["link down"]);
    }
}
