//! Ordered, lock-protected record storage.

use super::RecordSource;
use crate::error::{LedgerError, Result};
use crate::events::{EventHandle, Listeners};
use crate::matchers::Matcher;
use crate::types::{Record, Sequence};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Changes to a ledger's contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    /// `count` records were appended starting at index `first`.
    Inserted { first: usize, count: usize },
    /// `count` records were removed.
    Removed { count: usize },
    Cleared,
}

/// Every record received, in arrival order.
///
/// Mutations take the write lock for their whole duration; multi-step reads
/// take the read lock once. The backing vector is never handed out.
pub struct RecordLedger {
    records: RwLock<Vec<Arc<Record>>>,
    generation: AtomicU64,
    listeners: Listeners<LedgerEvent>,
}

impl RecordLedger {
    pub fn new() -> Self {
        Self::with_listeners(Listeners::new())
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self::with_listeners(Listeners::with_buffer_size(buffer_size))
    }

    fn with_listeners(listeners: Listeners<LedgerEvent>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            listeners,
        }
    }

    pub fn subscribe(&self) -> EventHandle<LedgerEvent> {
        self.listeners.subscribe()
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    // --- Mutation ---

    /// Append a record. Always modifies the ledger.
    pub fn add(&self, record: Arc<Record>) -> bool {
        let first = {
            let mut records = self.records.write();
            records.push(record);
            self.bump();
            records.len() - 1
        };

        self.listeners
            .broadcast(LedgerEvent::Inserted { first, count: 1 });
        true
    }

    /// Append records in order. Returns whether anything was added.
    pub fn add_all(&self, batch: impl IntoIterator<Item = Arc<Record>>) -> bool {
        let (first, count) = {
            let mut records = self.records.write();
            let first = records.len();
            records.extend(batch);
            let count = records.len() - first;
            if count > 0 {
                self.bump();
            }
            (first, count)
        };

        if count == 0 {
            return false;
        }
        debug!(first, count, "records added");
        self.listeners.broadcast(LedgerEvent::Inserted { first, count });
        true
    }

    /// Remove the first occurrence of `record`.
    pub fn remove(&self, record: &Record) -> bool {
        let removed = {
            let mut records = self.records.write();
            match records.iter().position(|r| **r == *record) {
                Some(index) => {
                    records.remove(index);
                    self.bump();
                    true
                }
                None => false,
            }
        };

        if removed {
            self.listeners.broadcast(LedgerEvent::Removed { count: 1 });
        }
        removed
    }

    /// Remove every occurrence of every given record.
    pub fn remove_all(&self, victims: &[Arc<Record>]) -> bool {
        let doomed: HashSet<Sequence> = victims.iter().map(|r| r.sequence()).collect();

        let count = {
            let mut records = self.records.write();
            let before = records.len();
            records.retain(|r| !doomed.contains(&r.sequence()));
            let count = before - records.len();
            if count > 0 {
                self.bump();
            }
            count
        };

        if count == 0 {
            return false;
        }
        self.listeners.broadcast(LedgerEvent::Removed { count });
        true
    }

    pub fn clear(&self) {
        {
            let mut records = self.records.write();
            records.clear();
            self.bump();
        }
        self.listeners.broadcast(LedgerEvent::Cleared);
    }

    // --- Reads ---

    pub fn get(&self, index: usize) -> Option<Arc<Record>> {
        self.records.read().get(index).cloned()
    }

    /// Records at each index, in the order given.
    pub fn get_all(&self, indices: &[usize]) -> Result<Vec<Arc<Record>>> {
        let records = self.records.read();
        indices
            .iter()
            .map(|&index| {
                records
                    .get(index)
                    .cloned()
                    .ok_or(LedgerError::IndexOutOfBounds {
                        index,
                        len: records.len(),
                    })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.records.read().iter().any(|r| **r == *record)
    }

    /// First match at or after `start`, wrapping around to the beginning.
    pub fn find(&self, matcher: &dyn Matcher, start: usize) -> Option<Arc<Record>> {
        let records = self.records.read();
        find_circular(&records, matcher, start).map(|i| Arc::clone(&records[i]))
    }

    /// Index of the first match at or after `start`, wrapping around.
    pub fn find_index(&self, matcher: &dyn Matcher, start: usize) -> Option<usize> {
        find_circular(&self.records.read(), matcher, start)
    }

    /// Indices of every match, ascending.
    pub fn find_all_indices(&self, matcher: &dyn Matcher) -> Vec<usize> {
        find_all(&self.records.read(), matcher)
    }

    /// Copy of every record, in order.
    pub fn to_vec(&self) -> Vec<Arc<Record>> {
        self.records.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for RecordLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSource for RecordLedger {
    fn snapshot(&self) -> Vec<Arc<Record>> {
        self.to_vec()
    }

    fn generation(&self) -> u64 {
        RecordLedger::generation(self)
    }
}

/// Circular linear scan shared by the ledger and its views.
pub(super) fn find_circular(
    records: &[Arc<Record>],
    matcher: &dyn Matcher,
    start: usize,
) -> Option<usize> {
    let len = records.len();
    if len == 0 {
        return None;
    }
    let start = start.min(len);

    (start..len)
        .chain(0..start)
        .find(|&i| matcher.matches(&records[i]))
}

pub(super) fn find_all(records: &[Arc<Record>], matcher: &dyn Matcher) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| matcher.matches(r))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::RecordMatcher;
    use crate::types::{test_support::record, SequenceGenerator};
    use std::thread;

    fn ledger_with(generator: &SequenceGenerator, subjects: &[&str]) -> RecordLedger {
        let ledger = RecordLedger::new();
        for subject in subjects {
            ledger.add(record(generator, subject));
        }
        ledger
    }

    #[test]
    fn test_add_and_get() {
        let generator = SequenceGenerator::new();
        let ledger = ledger_with(&generator, &["A", "B", "C"]);

        assert_eq!(ledger.len(), 3);
        assert!(!ledger.is_empty());
        assert_eq!(ledger.get(1).unwrap().send_subject(), "B");
        assert!(ledger.get(3).is_none());
    }

    #[test]
    fn test_remove() {
        let generator = SequenceGenerator::new();
        let ledger = ledger_with(&generator, &["A", "B"]);
        let first = ledger.get(0).unwrap();

        assert!(ledger.remove(&first));
        assert!(!ledger.remove(&first));
        assert!(!ledger.contains(&first));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_remove_all() {
        let generator = SequenceGenerator::new();
        let ledger = ledger_with(&generator, &["A", "B", "C", "D"]);
        let victims = ledger.get_all(&[0, 2]).unwrap();

        assert!(ledger.remove_all(&victims));
        assert!(!ledger.remove_all(&victims));
        let subjects: Vec<String> = ledger
            .to_vec()
            .iter()
            .map(|r| r.send_subject().to_string())
            .collect();
        assert_eq!(subjects, ["B", "D"]);
    }

    #[test]
    fn test_get_all_out_of_bounds() {
        let generator = SequenceGenerator::new();
        let ledger = ledger_with(&generator, &["A"]);
        let result = ledger.get_all(&[0, 5]);
        assert!(matches!(
            result,
            Err(LedgerError::IndexOutOfBounds { index: 5, len: 1 })
        ));
    }

    #[test]
    fn test_find_wraps_around() {
        let generator = SequenceGenerator::new();
        let ledger = ledger_with(&generator, &["X.1", "Y.1", "X.2", "Y.2"]);
        let xs = RecordMatcher::send_subject_starts_with("X");

        assert_eq!(ledger.find_index(&xs, 0), Some(0));
        assert_eq!(ledger.find_index(&xs, 1), Some(2));
        assert_eq!(ledger.find_index(&xs, 3), Some(0));
        assert_eq!(ledger.find_index(&xs, 99), Some(0));
        assert_eq!(ledger.find(&xs, 3).unwrap().send_subject(), "X.1");

        let none = RecordMatcher::send_subject_contains("Z");
        assert_eq!(ledger.find_index(&none, 0), None);
        assert!(ledger.find(&none, 2).is_none());
        assert_eq!(RecordLedger::new().find_index(&xs, 0), None);
    }

    #[test]
    fn test_find_all_indices() {
        let generator = SequenceGenerator::new();
        let ledger = ledger_with(&generator, &["X.1", "Y.1", "X.2", "Y.2"]);
        let ys = RecordMatcher::send_subject_starts_with("Y");
        assert_eq!(ledger.find_all_indices(&ys), vec![1, 3]);
    }

    #[test]
    fn test_duplicates_permitted() {
        let generator = SequenceGenerator::new();
        let ledger = RecordLedger::new();
        let rec = record(&generator, "A");
        ledger.add(Arc::clone(&rec));
        ledger.add(Arc::clone(&rec));
        assert_eq!(ledger.len(), 2);

        assert!(ledger.remove(&rec));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_generation_and_events() {
        let generator = SequenceGenerator::new();
        let ledger = RecordLedger::new();
        let handle = ledger.subscribe();
        let generation = ledger.generation();

        ledger.add_all(vec![record(&generator, "A"), record(&generator, "B")]);
        assert!(!ledger.add_all(Vec::new()));
        let a = ledger.get(0).unwrap();
        ledger.remove(&a);
        ledger.clear();

        assert!(ledger.generation() >= generation + 3);
        assert_eq!(
            handle.drain(),
            vec![
                LedgerEvent::Inserted { first: 0, count: 2 },
                LedgerEvent::Removed { count: 1 },
                LedgerEvent::Cleared,
            ]
        );
    }

    #[test]
    fn test_concurrent_writers() {
        let generator = Arc::new(SequenceGenerator::new());
        let ledger = Arc::new(RecordLedger::new());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                let generator = Arc::clone(&generator);
                thread::spawn(move || {
                    for i in 0..250 {
                        ledger.add(record(&generator, &format!("T{}.M{}", t, i)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.len(), 1000);
        let mut sequences: Vec<u64> = ledger.to_vec().iter().map(|r| r.sequence().0).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), 1000);
    }
}
