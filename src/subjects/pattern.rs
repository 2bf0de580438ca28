//! Subject names and wildcard patterns.
//!
//! Subjects are dot-separated element lists (`PRICES.EQ.IBM`). Patterns may
//! use `*` to match exactly one element and a trailing `>` to match one or
//! more remaining elements.

use crate::error::{LedgerError, Result};
use std::fmt;

/// Separator between subject elements.
pub const SEPARATOR: char = '.';

/// Check that `subject` is a well-formed subject or, when `allow_wildcards`
/// is set, a well-formed pattern.
pub fn validate(subject: &str, allow_wildcards: bool) -> Result<()> {
    if subject.is_empty() {
        return Err(LedgerError::InvalidSubject(subject.to_string()));
    }

    let elements: Vec<&str> = subject.split(SEPARATOR).collect();
    for (i, element) in elements.iter().enumerate() {
        let valid = match *element {
            "" => false,
            "*" => allow_wildcards,
            ">" => allow_wildcards && i == elements.len() - 1,
            _ => true,
        };
        if !valid {
            return Err(LedgerError::InvalidSubject(subject.to_string()));
        }
    }

    Ok(())
}

/// A subscription subject, possibly containing wildcards.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SubjectPattern {
    pattern: String,
    elements: Vec<String>,
}

impl SubjectPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        validate(pattern, true)?;

        Ok(Self {
            pattern: pattern.to_string(),
            elements: pattern.split(SEPARATOR).map(String::from).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn has_wildcards(&self) -> bool {
        self.elements.iter().any(|e| e == "*" || e == ">")
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut subject_iter = subject.split(SEPARATOR);

        for element in &self.elements {
            match element.as_str() {
                // Needs at least one more element.
                ">" => return subject_iter.next().is_some(),
                "*" => {
                    if subject_iter.next().is_none() {
                        return false;
                    }
                }
                literal => match subject_iter.next() {
                    Some(s) if s == literal => {}
                    _ => return false,
                },
            }
        }

        subject_iter.next().is_none()
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}
