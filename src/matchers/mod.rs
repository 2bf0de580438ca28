//! Record predicates.
//!
//! A [`Matcher`] decides whether a record is of interest. [`RecordMatcher`]s
//! are the user-configurable ones (a [`MatcherKind`] plus a string
//! parameter); the combinators build ad hoc filters out of them.

pub mod kinds;
mod registry;

pub use kinds::{MatcherKind, RecordMatcher};
pub use registry::MatcherRegistry;

use crate::types::Record;
use std::sync::Arc;

/// A predicate over records.
pub trait Matcher: Send + Sync {
    fn matches(&self, record: &Record) -> bool;
}

impl<M: Matcher + ?Sized> Matcher for Arc<M> {
    fn matches(&self, record: &Record) -> bool {
        (**self).matches(record)
    }
}

impl<M: Matcher + ?Sized> Matcher for Box<M> {
    fn matches(&self, record: &Record) -> bool {
        (**self).matches(record)
    }
}

/// Matches when every inner matcher does. Empty matches everything.
pub struct AllOf(pub Vec<Arc<dyn Matcher>>);

impl Matcher for AllOf {
    fn matches(&self, record: &Record) -> bool {
        self.0.iter().all(|m| m.matches(record))
    }
}

/// Matches when any inner matcher does. Empty matches nothing.
pub struct AnyOf(pub Vec<Arc<dyn Matcher>>);

impl Matcher for AnyOf {
    fn matches(&self, record: &Record) -> bool {
        self.0.iter().any(|m| m.matches(record))
    }
}

pub struct Not<M>(pub M);

impl<M: Matcher> Matcher for Not<M> {
    fn matches(&self, record: &Record) -> bool {
        !self.0.matches(record)
    }
}

/// Matcher backed by a closure.
pub struct FnMatcher<F>(F);

impl<F> Matcher for FnMatcher<F>
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    fn matches(&self, record: &Record) -> bool {
        (self.0)(record)
    }
}

pub fn from_fn<F>(f: F) -> FnMatcher<F>
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    FnMatcher(f)
}
