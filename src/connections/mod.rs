//! Bus connections and their registry.
//!
//! An [`RvConnection`] is identified by its [`ConnectionKey`]
//! (service, network, daemon) and runs a small lifecycle:
//!
//! ```text
//! STOPPED --start--> STARTED --pause--> PAUSED
//!    ^                 |  ^               |
//!    |                 |  +----start------+
//!    +------stop-------+------stop--------+
//! ```
//!
//! A connection can only start once it belongs to a [`Connections`]
//! registry, which provides the transport factory and the queue inbound
//! records are posted to.

mod connection;
mod memory;
mod registry;
mod transport;

pub use connection::{Inbound, RvConnection};
pub use memory::MemoryBus;
pub use registry::Connections;
pub use transport::{ErrorCallback, MessageCallback, SubscriptionId, Transport, TransportFactory};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum State {
    Stopped = 0,
    Paused = 1,
    Started = 2,
}

impl State {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => State::Paused,
            2 => State::Started,
            _ => State::Stopped,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Stopped => "STOPPED",
            State::Paused => "PAUSED",
            State::Started => "STARTED",
        };
        f.write_str(name)
    }
}

/// Identity of a connection. Two connections with equal keys are duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub service: String,
    pub network: String,
    pub daemon: String,
}

impl ConnectionKey {
    pub fn new(
        service: impl Into<String>,
        network: impl Into<String>,
        daemon: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            network: network.into(),
            daemon: daemon.into(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.network, self.daemon)
    }
}

/// Persistent form of a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(flatten)]
    pub key: ConnectionKey,
    pub description: String,
    #[serde(default)]
    pub subjects: Vec<String>,
}

/// Changes to the registry or to any registered connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Added(ConnectionKey),
    Removed(ConnectionKey),
    StateChanged { key: ConnectionKey, state: State },
    TransportError { key: ConnectionKey, message: String },
}
