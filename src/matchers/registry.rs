//! Registry of available matcher kinds.

use super::kinds::{MatcherKind, RecordMatcher, BUILTIN_KINDS};
use crate::error::{LedgerError, Result};
use parking_lot::RwLock;

/// The set of matcher kinds users can choose from.
///
/// Starts with the built-in kinds; more can be registered, never removed.
pub struct MatcherRegistry {
    kinds: RwLock<Vec<MatcherKind>>,
}

impl MatcherRegistry {
    pub fn new() -> Self {
        Self {
            kinds: RwLock::new(BUILTIN_KINDS.to_vec()),
        }
    }

    /// Add a kind. Fails if the id or display name is already taken.
    pub fn register(&self, kind: MatcherKind) -> Result<()> {
        let mut kinds = self.kinds.write();
        if kinds
            .iter()
            .any(|k| k.id == kind.id || k.display_name == kind.display_name)
        {
            return Err(LedgerError::DuplicateMatcherKind(kind.id.to_string()));
        }
        kinds.push(kind);
        Ok(())
    }

    pub fn by_id(&self, id: &str) -> Option<MatcherKind> {
        self.kinds.read().iter().find(|k| k.id == id).copied()
    }

    pub fn by_display_name(&self, name: &str) -> Option<MatcherKind> {
        self.kinds
            .read()
            .iter()
            .find(|k| k.display_name == name)
            .copied()
    }

    /// Registered kinds in registration order.
    pub fn kinds(&self) -> Vec<MatcherKind> {
        self.kinds.read().clone()
    }

    /// Build a matcher from a kind id and parameter.
    pub fn create(&self, id: &str, value: impl Into<String>) -> Result<RecordMatcher> {
        let kind = self
            .by_id(id)
            .ok_or_else(|| LedgerError::UnknownMatcherKind(id.to_string()))?;
        Ok(RecordMatcher::new(kind, value))
    }
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}
