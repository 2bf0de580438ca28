//! Built-in matcher kinds and the parameterised [`RecordMatcher`].

use super::Matcher;
use crate::subjects::SubjectPattern;
use crate::types::Record;
use serde_json::Value;
use std::fmt;

/// A kind of record predicate taking one string parameter.
#[derive(Clone, Copy)]
pub struct MatcherKind {
    /// Stable id used in project files.
    pub id: &'static str,
    /// Name shown to users.
    pub display_name: &'static str,
    pub predicate: fn(&Record, &str) -> bool,
}

impl PartialEq for MatcherKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MatcherKind {}

impl fmt::Debug for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatcherKind({})", self.id)
    }
}

pub const EVERYTHING: MatcherKind = MatcherKind {
    id: "everything",
    display_name: "Everything",
    predicate: match_everything,
};

pub const SEND_SUBJECT_CONTAINS: MatcherKind = MatcherKind {
    id: "send_subject_contains",
    display_name: "Send subject contains",
    predicate: send_subject_contains,
};

pub const SEND_SUBJECT_STARTS_WITH: MatcherKind = MatcherKind {
    id: "send_subject_starts_with",
    display_name: "Send subject starts with",
    predicate: send_subject_starts_with,
};

pub const SEND_SUBJECT_EQUALS: MatcherKind = MatcherKind {
    id: "send_subject_equals",
    display_name: "Send subject is",
    predicate: send_subject_equals,
};

pub const SEND_SUBJECT_PATTERN: MatcherKind = MatcherKind {
    id: "send_subject_pattern",
    display_name: "Send subject matches",
    predicate: send_subject_pattern,
};

pub const REPLY_SUBJECT_CONTAINS: MatcherKind = MatcherKind {
    id: "reply_subject_contains",
    display_name: "Reply subject contains",
    predicate: reply_subject_contains,
};

pub const TRACKING_ID_EQUALS: MatcherKind = MatcherKind {
    id: "tracking_id_equals",
    display_name: "Tracking id is",
    predicate: tracking_id_equals,
};

pub const FIELDS_CONTAIN: MatcherKind = MatcherKind {
    id: "fields_contain",
    display_name: "Message contains",
    predicate: fields_contain,
};

/// Every built-in kind, in menu order.
pub const BUILTIN_KINDS: [MatcherKind; 8] = [
    EVERYTHING,
    SEND_SUBJECT_CONTAINS,
    SEND_SUBJECT_STARTS_WITH,
    SEND_SUBJECT_EQUALS,
    SEND_SUBJECT_PATTERN,
    REPLY_SUBJECT_CONTAINS,
    TRACKING_ID_EQUALS,
    FIELDS_CONTAIN,
];

fn match_everything(_: &Record, _: &str) -> bool {
    true
}

fn send_subject_contains(record: &Record, value: &str) -> bool {
    record.raw_send_subject().contains(value)
}

fn send_subject_starts_with(record: &Record, value: &str) -> bool {
    record.raw_send_subject().starts_with(value)
}

fn send_subject_equals(record: &Record, value: &str) -> bool {
    record.raw_send_subject() == value
}

fn send_subject_pattern(record: &Record, value: &str) -> bool {
    SubjectPattern::new(value)
        .map(|p| p.matches(record.raw_send_subject()))
        .unwrap_or(false)
}

fn reply_subject_contains(record: &Record, value: &str) -> bool {
    record.reply_subject().contains(value)
}

fn tracking_id_equals(record: &Record, value: &str) -> bool {
    record.tracking_id() == value
}

fn fields_contain(record: &Record, value: &str) -> bool {
    record
        .message()
        .fields
        .iter()
        .any(|(name, field)| name.contains(value) || value_contains(field, value))
}

fn value_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.contains(needle),
        Value::Number(n) => n.to_string().contains(needle),
        Value::Bool(b) => b.to_string().contains(needle),
        Value::Array(items) => items.iter().any(|v| value_contains(v, needle)),
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| k.contains(needle) || value_contains(v, needle)),
        Value::Null => false,
    }
}

/// A matcher kind bound to its parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordMatcher {
    kind: MatcherKind,
    value: String,
}

impl RecordMatcher {
    pub fn new(kind: MatcherKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn everything() -> Self {
        Self::new(EVERYTHING, "")
    }

    pub fn send_subject_contains(value: impl Into<String>) -> Self {
        Self::new(SEND_SUBJECT_CONTAINS, value)
    }

    pub fn send_subject_starts_with(value: impl Into<String>) -> Self {
        Self::new(SEND_SUBJECT_STARTS_WITH, value)
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Matcher for RecordMatcher {
    fn matches(&self, record: &Record) -> bool {
        (self.kind.predicate)(record, &self.value)
    }
}

impl fmt::Display for RecordMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == EVERYTHING {
            write!(f, "{}", self.kind.display_name)
        } else {
            write!(f, "{} {:?}", self.kind.display_name, self.value)
        }
    }
}
