//! Subject hierarchy.
//!
//! Every record is filed into a tree keyed by the dot-separated elements of
//! its send subject. Each node counts the records that end exactly at it and
//! the records anywhere underneath it.

mod element;
mod hierarchy;
mod pattern;

pub use element::{NodeId, SubjectElement};
pub use hierarchy::{HierarchyEvent, SubjectHierarchy};
pub use pattern::{validate, SubjectPattern, SEPARATOR};
