//! Named, coloured record classification rules.
//!
//! Classification is first-match-wins over an ordered list of
//! [`RecordType`]s. The built-in default type is never in the list itself:
//! it always sits after every other type and matches everything, so every
//! record has a type.

use crate::error::{LedgerError, Result};
use crate::events::{EventHandle, Listeners};
use crate::matchers::{Matcher, MatcherRegistry, RecordMatcher};
use crate::types::{Colour, Record};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_TYPE_NAME: &str = "Default";
pub const ERROR_TYPE_NAME: &str = "Error";
pub const WARNING_TYPE_NAME: &str = "Warning";
pub const SYSTEM_TYPE_NAME: &str = "System";

const DEFAULT_TYPE_ID: u64 = 0;

/// Changes to the set of record types or to any type's settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypesEvent {
    Added(String),
    Removed(String),
    Changed(String),
    Reset,
}

/// One classification rule.
#[derive(Debug)]
pub struct RecordType {
    id: u64,
    name: RwLock<String>,
    colour: RwLock<Colour>,
    matcher: RwLock<RecordMatcher>,
    selected: AtomicBool,
}

impl RecordType {
    fn new(id: u64, name: &str, colour: Colour, matcher: RecordMatcher) -> Self {
        Self {
            id,
            name: RwLock::new(name.to_string()),
            colour: RwLock::new(colour),
            matcher: RwLock::new(matcher),
            selected: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn colour(&self) -> Colour {
        *self.colour.read()
    }

    pub fn matcher(&self) -> RecordMatcher {
        self.matcher.read().clone()
    }

    /// Whether records of this type are shown in filtered views.
    pub fn is_selected(&self) -> bool {
        self.selected.load(Ordering::SeqCst)
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_TYPE_ID
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.matcher.read().matches(record)
    }

    pub fn descriptor(&self) -> RecordTypeDescriptor {
        let matcher = self.matcher();
        RecordTypeDescriptor {
            name: self.name(),
            colour: self.colour(),
            matcher_kind: matcher.kind().id.to_string(),
            matcher_value: matcher.value().to_string(),
            selected: self.is_selected(),
        }
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RecordType {}

/// Persistent form of a record type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordTypeDescriptor {
    pub name: String,
    pub colour: Colour,
    pub matcher_kind: String,
    pub matcher_value: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

/// The ordered set of record types of one project.
pub struct RecordTypes {
    types: RwLock<Vec<Arc<RecordType>>>,
    default: Arc<RecordType>,
    next_id: AtomicU64,
    generation: AtomicU64,
    listeners: Listeners<TypesEvent>,
}

impl RecordTypes {
    /// Create with the built-in types.
    pub fn new() -> Self {
        Self::with_listeners(Listeners::new())
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self::with_listeners(Listeners::with_buffer_size(buffer_size))
    }

    fn with_listeners(listeners: Listeners<TypesEvent>) -> Self {
        let types = Self {
            types: RwLock::new(Vec::new()),
            default: Arc::new(RecordType::new(
                DEFAULT_TYPE_ID,
                DEFAULT_TYPE_NAME,
                Colour::BLACK,
                RecordMatcher::everything(),
            )),
            next_id: AtomicU64::new(DEFAULT_TYPE_ID + 1),
            generation: AtomicU64::new(0),
            listeners,
        };
        types.reset();
        types
    }

    pub fn subscribe(&self) -> EventHandle<TypesEvent> {
        self.listeners.subscribe()
    }

    /// Bumped on every change that can alter classification or selection.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn changed(&self, event: TypesEvent) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.listeners.broadcast(event);
    }

    /// The catch-all type.
    pub fn default_type(&self) -> Arc<RecordType> {
        Arc::clone(&self.default)
    }

    /// All types in priority order, default last.
    pub fn types(&self) -> Vec<Arc<RecordType>> {
        let mut types = self.types.read().clone();
        types.push(self.default_type());
        types
    }

    /// Number of types, including the default.
    pub fn len(&self) -> usize {
        self.types.read().len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<RecordType>> {
        if name == DEFAULT_TYPE_NAME {
            return Some(self.default_type());
        }
        self.types
            .read()
            .iter()
            .find(|t| *t.name.read() == name)
            .cloned()
    }

    fn name_in_use(types: &[Arc<RecordType>], name: &str) -> bool {
        name == DEFAULT_TYPE_NAME || types.iter().any(|t| *t.name.read() == name)
    }

    /// Append a type at the lowest priority (still ahead of the default).
    pub fn create_type(
        &self,
        name: &str,
        colour: Colour,
        matcher: RecordMatcher,
    ) -> Result<Arc<RecordType>> {
        let record_type = {
            let mut types = self.types.write();
            if Self::name_in_use(&types, name) {
                return Err(LedgerError::DuplicateTypeName(name.to_string()));
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let record_type = Arc::new(RecordType::new(id, name, colour, matcher));
            types.push(Arc::clone(&record_type));
            record_type
        };

        self.changed(TypesEvent::Added(name.to_string()));
        Ok(record_type)
    }

    /// Remove a type. The default type cannot be removed.
    pub fn remove_type(&self, record_type: &RecordType) -> bool {
        if record_type.is_default() {
            return false;
        }

        let removed = {
            let mut types = self.types.write();
            let before = types.len();
            types.retain(|t| t.id != record_type.id);
            types.len() != before
        };

        if removed {
            self.changed(TypesEvent::Removed(record_type.name()));
        }
        removed
    }

    /// Type of a record: the first whose matcher matches, else the default.
    pub fn first_matching_type(&self, record: &Record) -> Arc<RecordType> {
        self.types
            .read()
            .iter()
            .find(|t| t.matches(record))
            .cloned()
            .unwrap_or_else(|| self.default_type())
    }

    pub fn set_selected(&self, record_type: &RecordType, selected: bool) {
        let previous = record_type.selected.swap(selected, Ordering::SeqCst);
        if previous != selected {
            self.changed(TypesEvent::Changed(record_type.name()));
        }
    }

    pub fn set_colour(&self, record_type: &RecordType, colour: Colour) {
        *record_type.colour.write() = colour;
        self.changed(TypesEvent::Changed(record_type.name()));
    }

    /// Replace a type's matcher. The default type always matches everything.
    pub fn set_matcher(&self, record_type: &RecordType, matcher: RecordMatcher) -> Result<()> {
        if record_type.is_default() {
            return Err(LedgerError::IllegalState(
                "the default record type always matches everything".into(),
            ));
        }
        *record_type.matcher.write() = matcher;
        self.changed(TypesEvent::Changed(record_type.name()));
        Ok(())
    }

    pub fn rename(&self, record_type: &RecordType, name: &str) -> Result<()> {
        if record_type.is_default() {
            return Err(LedgerError::IllegalState(
                "the default record type cannot be renamed".into(),
            ));
        }

        {
            let types = self.types.write();
            if *record_type.name.read() == name {
                return Ok(());
            }
            if Self::name_in_use(&types, name) {
                return Err(LedgerError::DuplicateTypeName(name.to_string()));
            }
            *record_type.name.write() = name.to_string();
        }

        self.changed(TypesEvent::Changed(name.to_string()));
        Ok(())
    }

    /// Move a type to `index` in priority order. The default stays last.
    pub fn move_type(&self, record_type: &RecordType, index: usize) -> bool {
        let moved = {
            let mut types = self.types.write();
            match types.iter().position(|t| t.id == record_type.id) {
                Some(from) => {
                    let item = types.remove(from);
                    let to = index.min(types.len());
                    types.insert(to, item);
                    from != to
                }
                None => false,
            }
        };

        if moved {
            self.changed(TypesEvent::Changed(record_type.name()));
        }
        moved
    }

    /// Restore the built-in types: System, Error, Warning, then Default.
    pub fn reset(&self) {
        let builtins = [
            (
                SYSTEM_TYPE_NAME,
                Colour::GREY,
                RecordMatcher::send_subject_starts_with("_"),
            ),
            (
                ERROR_TYPE_NAME,
                Colour::RED,
                RecordMatcher::send_subject_contains("ERROR"),
            ),
            (
                WARNING_TYPE_NAME,
                Colour::ORANGE,
                RecordMatcher::send_subject_contains("WARN"),
            ),
        ];

        {
            let mut types = self.types.write();
            types.clear();
            for (name, colour, matcher) in builtins {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                types.push(Arc::new(RecordType::new(id, name, colour, matcher)));
            }
            self.default.selected.store(true, Ordering::SeqCst);
            *self.default.colour.write() = Colour::BLACK;
        }

        self.changed(TypesEvent::Reset);
    }

    pub fn descriptors(&self) -> Vec<RecordTypeDescriptor> {
        self.types().iter().map(|t| t.descriptor()).collect()
    }

    /// Replace every type with the given descriptors.
    ///
    /// Descriptors are fully validated before anything is replaced.
    pub fn load(
        &self,
        descriptors: &[RecordTypeDescriptor],
        registry: &MatcherRegistry,
    ) -> Result<()> {
        let mut loaded = Vec::new();
        let mut default_settings = None;

        for descriptor in descriptors {
            if descriptor.name == DEFAULT_TYPE_NAME {
                default_settings = Some((descriptor.colour, descriptor.selected));
                continue;
            }
            if Self::name_in_use(&loaded, &descriptor.name) {
                return Err(LedgerError::DuplicateTypeName(descriptor.name.clone()));
            }

            let matcher = registry.create(&descriptor.matcher_kind, descriptor.matcher_value.clone())?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let record_type = RecordType::new(id, &descriptor.name, descriptor.colour, matcher);
            record_type
                .selected
                .store(descriptor.selected, Ordering::SeqCst);
            loaded.push(Arc::new(record_type));
        }

        {
            let mut types = self.types.write();
            *types = loaded;
            let (colour, selected) = default_settings.unwrap_or((Colour::BLACK, true));
            *self.default.colour.write() = colour;
            self.default.selected.store(selected, Ordering::SeqCst);
        }

        self.changed(TypesEvent::Reset);
        Ok(())
    }
}

impl Default for RecordTypes {
    fn default() -> Self {
        Self::new()
    }
}

/// Visible when the record's type is selected.
pub struct TypeSelection(pub Arc<RecordTypes>);

impl Matcher for TypeSelection {
    fn matches(&self, record: &Record) -> bool {
        self.0.first_matching_type(record).is_selected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{test_support::record, SequenceGenerator};

    fn type_name_of(types: &RecordTypes, subject: &str) -> String {
        let rec = record(&SequenceGenerator::new(), subject);
        types.first_matching_type(&rec).name()
    }

    #[test]
    fn test_default_classification() {
        let types = RecordTypes::new();
        assert_eq!(type_name_of(&types, "APP.ERROR"), ERROR_TYPE_NAME);
        assert_eq!(type_name_of(&types, "APP.WARNING"), WARNING_TYPE_NAME);
        assert_eq!(type_name_of(&types, "_RV.INFO"), SYSTEM_TYPE_NAME);
        assert_eq!(type_name_of(&types, "PRICES.IBM"), DEFAULT_TYPE_NAME);
    }

    #[test]
    fn test_system_checked_before_error() {
        let types = RecordTypes::new();
        types.reset();
        assert_eq!(type_name_of(&types, "_RV.ERROR.SYSTEM"), SYSTEM_TYPE_NAME);
    }

    #[test]
    fn test_create_type_duplicate_name() {
        let types = RecordTypes::new();
        let before = types.len();

        let result = types.create_type(
            ERROR_TYPE_NAME,
            Colour::BLACK,
            RecordMatcher::send_subject_contains("X"),
        );
        assert!(matches!(result, Err(LedgerError::DuplicateTypeName(_))));
        assert_eq!(types.len(), before);

        let result = types.create_type(DEFAULT_TYPE_NAME, Colour::BLACK, RecordMatcher::everything());
        assert!(matches!(result, Err(LedgerError::DuplicateTypeName(_))));
    }

    #[test]
    fn test_create_type_is_lowest_priority() {
        let types = RecordTypes::new();
        let prices = types
            .create_type("Prices", Colour::rgb(0, 0, 0xff), RecordMatcher::send_subject_starts_with("PRICES"))
            .unwrap();

        assert_eq!(type_name_of(&types, "PRICES.IBM"), "Prices");
        // Error still wins for subjects both match.
        assert_eq!(type_name_of(&types, "PRICES.ERROR"), ERROR_TYPE_NAME);

        let names: Vec<String> = types.types().iter().map(|t| t.name()).collect();
        assert_eq!(names, ["System", "Error", "Warning", "Prices", "Default"]);
        assert!(!prices.is_default());
    }

    #[test]
    fn test_default_cannot_be_removed() {
        let types = RecordTypes::new();
        let default = types.default_type();
        assert!(!types.remove_type(&default));
        assert_eq!(types.len(), 4);

        let error = types.get_by_name(ERROR_TYPE_NAME).unwrap();
        assert!(types.remove_type(&error));
        assert!(!types.remove_type(&error));
        assert_eq!(type_name_of(&types, "APP.ERROR"), DEFAULT_TYPE_NAME);
    }

    #[test]
    fn test_selection_and_generation() {
        let types = Arc::new(RecordTypes::new());
        let selection = TypeSelection(Arc::clone(&types));
        let rec = record(&SequenceGenerator::new(), "APP.WARN");
        assert!(selection.matches(&rec));

        let generation = types.generation();
        let warning = types.get_by_name(WARNING_TYPE_NAME).unwrap();
        types.set_selected(&warning, false);
        assert!(types.generation() > generation);
        assert!(!selection.matches(&rec));

        // No change, no bump.
        let generation = types.generation();
        types.set_selected(&warning, false);
        assert_eq!(types.generation(), generation);
    }

    #[test]
    fn test_rename_and_move() {
        let types = RecordTypes::new();
        let warning = types.get_by_name(WARNING_TYPE_NAME).unwrap();

        assert!(matches!(
            types.rename(&warning, SYSTEM_TYPE_NAME),
            Err(LedgerError::DuplicateTypeName(_))
        ));
        types.rename(&warning, "Warn").unwrap();
        assert!(types.get_by_name("Warn").is_some());

        assert!(types.move_type(&warning, 0));
        assert_eq!(type_name_of(&types, "_WARN"), "Warn");
        assert!(types.rename(&types.default_type(), "Other").is_err());
    }

    #[test]
    fn test_set_matcher() {
        let types = RecordTypes::new();
        let error = types.get_by_name(ERROR_TYPE_NAME).unwrap();
        types
            .set_matcher(&error, RecordMatcher::send_subject_contains("FAIL"))
            .unwrap();
        assert_eq!(type_name_of(&types, "JOB.FAIL"), ERROR_TYPE_NAME);
        assert!(types
            .set_matcher(&types.default_type(), RecordMatcher::send_subject_contains("X"))
            .is_err());
    }

    #[test]
    fn test_descriptors_load() {
        let types = RecordTypes::new();
        types
            .create_type("Orders", Colour::rgb(1, 2, 3), RecordMatcher::send_subject_starts_with("ORDERS"))
            .unwrap();
        let default = types.default_type();
        types.set_selected(&default, false);
        let descriptors = types.descriptors();

        let other = RecordTypes::new();
        other.load(&descriptors, &MatcherRegistry::new()).unwrap();
        assert_eq!(other.descriptors(), descriptors);
        assert!(!other.default_type().is_selected());
    }

    #[test]
    fn test_load_rejects_unknown_kind_without_change() {
        let types = RecordTypes::new();
        let descriptors = vec![RecordTypeDescriptor {
            name: "Odd".into(),
            colour: Colour::BLACK,
            matcher_kind: "regex".into(),
            matcher_value: ".*".into(),
            selected: true,
        }];

        assert!(types.load(&descriptors, &MatcherRegistry::new()).is_err());
        assert_eq!(types.len(), 4);
    }

    #[test]
    fn test_events() {
        let types = RecordTypes::new();
        let handle = types.subscribe();
        let t = types
            .create_type("Audit", Colour::BLACK, RecordMatcher::send_subject_contains("AUDIT"))
            .unwrap();
        types.remove_type(&t);

        assert_eq!(
            handle.drain(),
            vec![
                TypesEvent::Added("Audit".to_string()),
                TypesEvent::Removed("Audit".to_string()),
            ]
        );
    }
}
