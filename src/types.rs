//! Core types for the ledger.

use crate::connections::{ConnectionKey, RvConnection};
use crate::error::Result;
use crate::marshal::{Marshaller, Message};
use crate::subjects::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

/// Subject reported for records that carry no send subject.
pub const NO_SUBJECT: &str = "(no subject)";

/// Arrival order of a record within one ledger generation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Hands out sequence numbers to new records.
///
/// Shared by every thread that constructs records. Numbering restarts from
/// [`SequenceGenerator::FIRST`] only when the ledger is cleared, and each
/// restart begins a new epoch so numbers from different generations can be
/// told apart.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicU64,
    epoch: AtomicU64,
}

impl SequenceGenerator {
    /// First number handed out after creation or reset.
    pub const FIRST: Sequence = Sequence(1);

    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(Self::FIRST.0),
            epoch: AtomicU64::new(0),
        }
    }

    /// Take the next number.
    pub fn next(&self) -> Sequence {
        Sequence(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Number the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> Sequence {
        Sequence(self.next.load(Ordering::SeqCst))
    }

    /// Current ledger generation; bumped by every reset.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Take the next number along with the epoch it belongs to.
    ///
    /// The epoch is read first. A reset landing in between yields a fresh
    /// number tagged with the old epoch, which callers discard, never an old
    /// number tagged with the new one.
    pub fn next_stamped(&self) -> (u64, Sequence) {
        let epoch = self.epoch();
        (epoch, self.next())
    }

    /// Restart numbering for a new ledger generation.
    pub fn reset(&self) {
        self.next.store(Self::FIRST.0, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Payload wire encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    #[default]
    Json,
    MessagePack,
}

/// Display colour of a record type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Colour {
    pub const BLACK: Colour = Colour::rgb(0, 0, 0);
    pub const RED: Colour = Colour::rgb(0xcc, 0, 0);
    pub const ORANGE: Colour = Colour::rgb(0xff, 0x99, 0);
    pub const GREY: Colour = Colour::rgb(0x80, 0x80, 0x80);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Colour { r, g, b }
    }

    /// Parse `#rrggbb`.
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Colour::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// One received (or pasted, or replayed) message in the ledger.
///
/// Equality and hashing use the sequence number only.
#[derive(Debug)]
pub struct Record {
    sequence: Sequence,
    epoch: u64,
    timestamp: Timestamp,
    size: usize,
    send_subject: String,
    reply_subject: String,
    tracking_id: String,
    connection: Option<Weak<RvConnection>>,
    subject_node: RwLock<Option<NodeId>>,
    message: Message,
}

impl Record {
    /// Wrap a message received now.
    pub fn new(
        sequence: &SequenceGenerator,
        marshaller: &dyn Marshaller,
        message: Message,
        connection: Option<&Arc<RvConnection>>,
    ) -> Result<Self> {
        Self::with_timestamp(sequence, marshaller, message, connection, Timestamp::now())
    }

    /// Wrap a message received at `timestamp` (used when importing).
    pub fn with_timestamp(
        sequence: &SequenceGenerator,
        marshaller: &dyn Marshaller,
        message: Message,
        connection: Option<&Arc<RvConnection>>,
        timestamp: Timestamp,
    ) -> Result<Self> {
        let size = marshaller.encode(&message)?.len();
        let send_subject = marshaller.send_subject(&message).unwrap_or_default();
        let reply_subject = marshaller.reply_subject(&message).unwrap_or_default();
        let tracking_id = marshaller.tracking_id(&message).unwrap_or_default();
        let (epoch, sequence) = sequence.next_stamped();

        Ok(Self {
            sequence,
            epoch,
            timestamp,
            size,
            send_subject,
            reply_subject,
            tracking_id,
            connection: connection.map(Arc::downgrade),
            subject_node: RwLock::new(None),
            message,
        })
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Generation of the [`SequenceGenerator`] that numbered this record.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Size of the encoded payload in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Send subject, or [`NO_SUBJECT`] when the message had none.
    pub fn send_subject(&self) -> &str {
        if self.send_subject.is_empty() {
            NO_SUBJECT
        } else {
            &self.send_subject
        }
    }

    /// Raw send subject; empty when the message had none.
    pub fn raw_send_subject(&self) -> &str {
        &self.send_subject
    }

    /// Reply subject; empty when the message had none.
    pub fn reply_subject(&self) -> &str {
        &self.reply_subject
    }

    /// Tracking id; empty when the message carries none.
    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    /// The connection the record arrived on, if it is still registered.
    pub fn connection(&self) -> Option<Arc<RvConnection>> {
        self.connection.as_ref().and_then(Weak::upgrade)
    }

    /// Identity of the originating connection, if it is still alive.
    pub fn connection_key(&self) -> Option<ConnectionKey> {
        self.connection().map(|c| c.key().clone())
    }

    /// Subject tree node the record was most recently filed under.
    pub fn subject_node(&self) -> Option<NodeId> {
        *self.subject_node.read()
    }

    pub(crate) fn set_subject_node(&self, node: NodeId) {
        *self.subject_node.write() = Some(node);
    }

    pub fn message(&self) -> &Message {
        &self.message
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sequence.hash(state);
    }
}
