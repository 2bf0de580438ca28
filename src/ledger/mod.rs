//! The record ledger and its filtered views.
//!
//! [`RecordLedger`] holds every record in arrival order behind a single
//! reader/writer lock. [`FilteredLedgerView`] reads through a ledger (or
//! another view) and exposes only the records its matchers let through.

mod store;
mod view;

pub use store::{LedgerEvent, RecordLedger};
pub use view::{FilterId, FilteredLedgerView, SortDirection, SortKey};

use crate::types::Record;
use std::sync::Arc;

/// Anything a filtered view can read records from.
pub trait RecordSource: Send + Sync {
    /// Current records, in order.
    fn snapshot(&self) -> Vec<Arc<Record>>;

    /// Changes whenever the result of [`snapshot`](Self::snapshot) may have
    /// changed.
    fn generation(&self) -> u64;
}
