//! Error types for the ledger.

use thiserror::Error;

/// Main error type for ledger, hierarchy and connection operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Record type name already in use: {0}")]
    DuplicateTypeName(String),

    #[error("Unknown matcher kind: {0}")]
    UnknownMatcherKind(String),

    #[error("Matcher kind already registered: {0}")]
    DuplicateMatcherKind(String),

    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Project file is locked: {0}")]
    Locked(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            LedgerError::Deserialization(e.to_string())
        } else {
            LedgerError::Serialization(e.to_string())
        }
    }
}

impl From<rmp_serde::encode::Error> for LedgerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LedgerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LedgerError::Deserialization(e.to_string())
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
