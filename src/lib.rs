//! # rvledger
//!
//! The record ledger, subject hierarchy and connection lifecycle behind a
//! publish/subscribe bus monitor.
//!
//! ## Core Concepts
//!
//! - **Records**: Messages received from (or replayed onto) the bus, kept in
//!   arrival order in a [`RecordLedger`] and numbered by a per-project
//!   [`SequenceGenerator`]
//! - **Subjects**: A live [`SubjectHierarchy`] counting records per
//!   dot-separated subject element
//! - **Record types**: Named, coloured, first-match-wins classification
//!   rules ([`RecordTypes`]) that also drive view visibility
//! - **Views**: [`FilteredLedgerView`]s that filter, sort and freeze
//! - **Connections**: [`RvConnection`]s with a STOPPED/STARTED/PAUSED
//!   lifecycle, unique by [`ConnectionKey`] within [`Connections`]
//!
//! ## Example
//!
//! ```ignore
//! use rvledger::{Application, ConnectionKey, LedgerConfig, MemoryBus, Message, RvConnection};
//! use std::sync::Arc;
//!
//! let bus = MemoryBus::new();
//! let mut app = Application::new(LedgerConfig::default(), Arc::new(bus.clone()));
//!
//! let connection = RvConnection::new(ConnectionKey::new("7500", "", "local"), "prices");
//! connection.add_subject("PRICES.>")?;
//! app.connections().add(connection.clone());
//! connection.start()?;
//!
//! bus.publish(&Message::new("PRICES.EQ.IBM").with_field("bid", 101.5));
//! app.pump();
//!
//! assert_eq!(app.ledger().len(), 1);
//! ```

pub mod app;
pub mod codec;
pub mod config;
pub mod connections;
pub mod error;
pub mod events;
pub mod ledger;
pub mod marshal;
pub mod matchers;
pub mod project;
pub mod record_types;
pub mod subjects;
pub mod types;

// Re-exports
pub use app::{Application, ApplicationEvent};
pub use config::LedgerConfig;
pub use connections::{
    ConnectionDescriptor, ConnectionEvent, ConnectionKey, Connections, MemoryBus, RvConnection,
    State, Transport, TransportFactory,
};
pub use error::{LedgerError, Result};
pub use events::{EventHandle, ListenerId, Listeners};
pub use ledger::{
    FilterId, FilteredLedgerView, LedgerEvent, RecordLedger, RecordSource, SortDirection, SortKey,
};
pub use marshal::{JsonMarshaller, Marshaller, Message, MsgPackMarshaller};
pub use matchers::{AllOf, AnyOf, Matcher, MatcherKind, MatcherRegistry, Not, RecordMatcher};
pub use project::ProjectSnapshot;
pub use record_types::{RecordType, RecordTypeDescriptor, RecordTypes, TypeSelection, TypesEvent};
pub use subjects::{HierarchyEvent, NodeId, SubjectElement, SubjectHierarchy, SubjectPattern};
pub use types::*;
