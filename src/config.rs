//! Application configuration.

use crate::error::Result;
use crate::events::DEFAULT_BUFFER_SIZE;
use crate::types::PayloadEncoding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Ledger configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Max buffered events per listener before it is dropped.
    pub event_buffer_size: usize,

    /// Wire encoding of message payloads.
    pub encoding: PayloadEncoding,

    /// Capacity of the queue between transport threads and the ledger.
    /// `None` for unbounded.
    pub inbound_capacity: Option<usize>,

    /// Start every connection after opening a project.
    pub start_connections_on_open: bool,

    /// Prune empty subjects until nothing changes instead of one pass.
    pub recursive_prune: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: DEFAULT_BUFFER_SIZE,
            encoding: PayloadEncoding::default(),
            inbound_capacity: None,
            start_connections_on_open: true,
            recursive_prune: false,
        }
    }
}

impl LedgerConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
