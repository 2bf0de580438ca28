//! Contract with the messaging transport.

use super::ConnectionKey;
use crate::error::Result;
use crate::marshal::Message;
use std::sync::Arc;

/// Called on a transport thread for every message delivered to a
/// subscription.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Called on a transport thread when the transport hits an error after it
/// was created.
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Handle for one subscription on a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A live link to the bus.
pub trait Transport: Send {
    /// Start delivering messages for `subject` (which may contain wildcards).
    fn subscribe(&mut self, subject: &str, callback: MessageCallback) -> Result<SubscriptionId>;

    fn unsubscribe(&mut self, id: SubscriptionId);

    fn publish(&self, message: &Message) -> Result<()>;

    /// Tear down the link and every remaining subscription.
    fn destroy(&mut self);
}

/// Creates transports for connections.
pub trait TransportFactory: Send + Sync {
    fn create(&self, key: &ConnectionKey, on_error: ErrorCallback) -> Result<Box<dyn Transport>>;
}
