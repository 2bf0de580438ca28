//! Message payloads and the marshalling contract.
//!
//! The ledger never interprets message contents beyond the subjects and the
//! tracking id. Everything else is opaque and only ever passes through a
//! [`Marshaller`] to get a byte form for sizing and interchange.

use crate::error::Result;
use crate::types::PayloadEncoding;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Name of the field holding tracking information.
pub const TRACKING_FIELD: &str = "^tracking^";

/// Name of the id entry inside the tracking field.
pub const TRACKING_ID_FIELD: &str = "^id^";

/// A decoded bus message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_subject: Option<String>,

    /// Named fields, in field-name order.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Message {
    /// Create a message addressed to `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            send_subject: Some(subject.into()),
            ..Default::default()
        }
    }

    /// Set the reply subject.
    pub fn with_reply(mut self, subject: impl Into<String>) -> Self {
        self.reply_subject = Some(subject.into());
        self
    }

    /// Add a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Attach a tracking id.
    pub fn with_tracking_id(mut self, id: impl Into<String>) -> Self {
        let mut tracking = Map::new();
        tracking.insert(TRACKING_ID_FIELD.to_string(), Value::String(id.into()));
        self.fields
            .insert(TRACKING_FIELD.to_string(), Value::Object(tracking));
        self
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Tracking id nested inside the tracking field, if any.
    pub fn tracking_id(&self) -> Option<&str> {
        self.field(TRACKING_FIELD)?.get(TRACKING_ID_FIELD)?.as_str()
    }
}

/// Encodes and decodes messages, and extracts the metadata the ledger needs.
pub trait Marshaller: Send + Sync {
    /// Encode a message to its wire form.
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;

    /// Decode a message from its wire form.
    fn decode(&self, bytes: &[u8]) -> Result<Message>;

    /// Which encoding this marshaller produces.
    fn encoding(&self) -> PayloadEncoding;

    fn send_subject(&self, message: &Message) -> Option<String> {
        message.send_subject.clone().filter(|s| !s.is_empty())
    }

    fn reply_subject(&self, message: &Message) -> Option<String> {
        message.reply_subject.clone().filter(|s| !s.is_empty())
    }

    fn tracking_id(&self, message: &Message) -> Option<String> {
        message.tracking_id().map(str::to_string)
    }
}

/// JSON wire form.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encoding(&self) -> PayloadEncoding {
        PayloadEncoding::Json
    }
}

/// MessagePack wire form.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsgPackMarshaller;

impl Marshaller for MsgPackMarshaller {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(message)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn encoding(&self) -> PayloadEncoding {
        PayloadEncoding::MessagePack
    }
}

/// Marshaller for an encoding.
pub fn marshaller_for(encoding: PayloadEncoding) -> Arc<dyn Marshaller> {
    match encoding {
        PayloadEncoding::Json => Arc::new(JsonMarshaller),
        PayloadEncoding::MessagePack => Arc::new(MsgPackMarshaller),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;

    #[test]
    fn test_tracking_id_extraction() {
        let message = Message::new("A.B").with_tracking_id("abc-123");
        assert_eq!(
            JsonMarshaller.tracking_id(&message),
            Some("abc-123".to_string())
        );

        let untracked = Message::new("A.B").with_field(TRACKING_FIELD, 42);
        assert_eq!(JsonMarshaller.tracking_id(&untracked), None);
    }

    #[test]
    fn test_empty_subjects_are_absent() {
        let message = Message::new("").with_reply("");
        assert_eq!(JsonMarshaller.send_subject(&message), None);
        assert_eq!(JsonMarshaller.reply_subject(&message), None);
    }

    #[test]
    fn test_msgpack_decode() {
        let message = Message::new("PRICES.IBM")
            .with_reply("_INBOX.1")
            .with_field("bid", 101.5)
            .with_field("venue", "NYSE");

        let bytes = MsgPackMarshaller.encode(&message).unwrap();
        assert_eq!(MsgPackMarshaller.decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_json_decode_garbage() {
        let result = JsonMarshaller.decode(b"not json");
        assert!(matches!(result, Err(LedgerError::Deserialization(_))));
    }
}
