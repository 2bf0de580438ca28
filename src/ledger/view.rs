//! Filtered, sortable, optionally frozen projection of a record source.

use super::store::{find_all, find_circular};
use super::RecordSource;
use crate::matchers::Matcher;
use crate::record_types::RecordTypes;
use crate::types::Record;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle for removing an ad hoc filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterId(pub u64);

/// Column a view can be sorted by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    Sequence,
    Timestamp,
    SendSubject,
    ReplySubject,
    Size,
    TrackingId,
}

impl SortKey {
    fn compare(self, a: &Record, b: &Record) -> CmpOrdering {
        match self {
            SortKey::Sequence => a.sequence().cmp(&b.sequence()),
            SortKey::Timestamp => a.timestamp().cmp(&b.timestamp()),
            SortKey::SendSubject => a.send_subject().cmp(b.send_subject()),
            SortKey::ReplySubject => a.reply_subject().cmp(b.reply_subject()),
            SortKey::Size => a.size().cmp(&b.size()),
            SortKey::TrackingId => a.tracking_id().cmp(b.tracking_id()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

struct ViewState {
    filters: Vec<(FilterId, Arc<dyn Matcher>)>,
    next_filter: u64,
    sort: Option<(SortKey, SortDirection)>,
    frozen: bool,
    /// Records from the source as of the last refresh.
    base: Vec<Arc<Record>>,
    visible: Vec<Arc<Record>>,
    source_generation: Option<u64>,
    types_generation: Option<u64>,
    stale: bool,
}

/// The records of a source that pass every ad hoc filter and whose record
/// type is selected.
///
/// Visibility is recomputed lazily: every read first checks whether the
/// filters, the record type selection or (unless frozen) the source changed
/// since the last computation.
pub struct FilteredLedgerView {
    source: Arc<dyn RecordSource>,
    types: Option<Arc<RecordTypes>>,
    state: RwLock<ViewState>,
    generation: AtomicU64,
}

impl FilteredLedgerView {
    /// A live view over `source`. Without `types`, type selection is ignored.
    pub fn new(source: Arc<dyn RecordSource>, types: Option<Arc<RecordTypes>>) -> Self {
        Self {
            source,
            types,
            state: RwLock::new(ViewState {
                filters: Vec::new(),
                next_filter: 1,
                sort: None,
                frozen: false,
                base: Vec::new(),
                visible: Vec::new(),
                source_generation: None,
                types_generation: None,
                stale: true,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// A frozen view of what `source` holds right now that passes `filter`.
    pub fn snapshot_of(
        source: Arc<dyn RecordSource>,
        types: Option<Arc<RecordTypes>>,
        filter: Arc<dyn Matcher>,
    ) -> Self {
        let view = Self::new(source, types);
        view.add_filter(filter);
        // Load once before freezing.
        view.len();
        view.set_frozen(true);
        view
    }

    fn is_stale(&self, state: &ViewState) -> bool {
        if state.stale {
            return true;
        }
        if !state.frozen && state.source_generation != Some(self.source.generation()) {
            return true;
        }
        match &self.types {
            Some(types) => state.types_generation != Some(types.generation()),
            None => false,
        }
    }

    fn refresh(&self, state: &mut ViewState) {
        if !state.frozen || state.source_generation.is_none() {
            state.source_generation = Some(self.source.generation());
            state.base = self.source.snapshot();
        }
        state.types_generation = self.types.as_ref().map(|t| t.generation());

        let mut visible: Vec<Arc<Record>> = state
            .base
            .iter()
            .filter(|r| self.is_visible(&state.filters, r))
            .cloned()
            .collect();

        if let Some((key, direction)) = state.sort {
            visible.sort_by(|a, b| match direction {
                SortDirection::Ascending => key.compare(a, b),
                SortDirection::Descending => key.compare(b, a),
            });
        }

        state.visible = visible;
        state.stale = false;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn is_visible(&self, filters: &[(FilterId, Arc<dyn Matcher>)], record: &Record) -> bool {
        if !filters.iter().all(|(_, m)| m.matches(record)) {
            return false;
        }
        match &self.types {
            Some(types) => types.first_matching_type(record).is_selected(),
            None => true,
        }
    }

    /// Read access to an up-to-date state.
    fn current(&self) -> RwLockReadGuard<'_, ViewState> {
        {
            let state = self.state.read();
            if !self.is_stale(&state) {
                return state;
            }
        }

        let mut state = self.state.write();
        if self.is_stale(&state) {
            self.refresh(&mut state);
        }
        RwLockWriteGuard::downgrade(state)
    }

    fn modify<T>(&self, f: impl FnOnce(&mut ViewState) -> T) -> T {
        let mut state = self.state.write();
        let result = f(&mut state);
        state.stale = true;
        result
    }

    // --- Configuration ---

    /// Add a filter; records must pass every filter to be visible.
    pub fn add_filter(&self, matcher: Arc<dyn Matcher>) -> FilterId {
        self.modify(|state| {
            let id = FilterId(state.next_filter);
            state.next_filter += 1;
            state.filters.push((id, matcher));
            id
        })
    }

    pub fn remove_filter(&self, id: FilterId) -> bool {
        self.modify(|state| {
            let before = state.filters.len();
            state.filters.retain(|(f, _)| *f != id);
            state.filters.len() != before
        })
    }

    pub fn clear_filters(&self) {
        self.modify(|state| state.filters.clear());
    }

    pub fn filter_count(&self) -> usize {
        self.state.read().filters.len()
    }

    /// Sort visible records; `None` restores source order.
    pub fn set_sort(&self, sort: Option<(SortKey, SortDirection)>) {
        self.modify(|state| state.sort = sort);
    }

    /// Stop (or resume) following changes to the source.
    pub fn set_frozen(&self, frozen: bool) {
        self.modify(|state| state.frozen = frozen);
    }

    pub fn is_frozen(&self) -> bool {
        self.state.read().frozen
    }

    // --- Reads over the visible records ---

    pub fn len(&self) -> usize {
        self.current().visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().visible.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<Record>> {
        self.current().visible.get(index).cloned()
    }

    /// Position of a record among the visible ones.
    pub fn index_of(&self, record: &Record) -> Option<usize> {
        self.current().visible.iter().position(|r| **r == *record)
    }

    pub fn to_vec(&self) -> Vec<Arc<Record>> {
        self.current().visible.clone()
    }

    pub fn find(&self, matcher: &dyn Matcher, start: usize) -> Option<Arc<Record>> {
        let state = self.current();
        find_circular(&state.visible, matcher, start).map(|i| Arc::clone(&state.visible[i]))
    }

    pub fn find_index(&self, matcher: &dyn Matcher, start: usize) -> Option<usize> {
        find_circular(&self.current().visible, matcher, start)
    }

    pub fn find_all_indices(&self, matcher: &dyn Matcher) -> Vec<usize> {
        find_all(&self.current().visible, matcher)
    }
}

impl RecordSource for FilteredLedgerView {
    fn snapshot(&self) -> Vec<Arc<Record>> {
        self.to_vec()
    }

    fn generation(&self) -> u64 {
        let _state = self.current();
        self.generation.load(Ordering::SeqCst)
    }
}
