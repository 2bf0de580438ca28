//! Byte-stream interchange format for records.
//!
//! Used for copy/paste, drag and drop, and file export/import. All integers
//! are little-endian.
//!
//! ```text
//! header:  magic[4] ("RVR\0" single | "RVS\0" set)  version u8
//!          [set only] count u32
//! record:  has_connection u8
//!          [if 1] description, service, network, daemon   (strings)
//!          send_subject, reply_subject                    (strings)
//!          timestamp i64 (micros)
//!          payload_len u32  payload[payload_len]  crc32(payload) u32
//! string:  len u16  utf8[len]
//! ```

use crate::connections::{ConnectionKey, Connections, RvConnection};
use crate::error::{LedgerError, Result};
use crate::marshal::{Marshaller, Message};
use crate::types::{Record, SequenceGenerator, Timestamp};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Magic bytes for a single record.
pub const RECORD_MAGIC: &[u8; 4] = b"RVR\0";

/// Magic bytes for a record set.
pub const RECORD_SET_MAGIC: &[u8; 4] = b"RVS\0";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Encode one record.
pub fn encode_record(record: &Record, marshaller: &dyn Marshaller) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_all(RECORD_MAGIC)?;
    out.write_all(&[FORMAT_VERSION])?;
    write_record(&mut out, record, marshaller)?;
    Ok(out)
}

/// Encode any number of records as a record set.
pub fn encode_records(records: &[Arc<Record>], marshaller: &dyn Marshaller) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_set(&mut out, records, marshaller)?;
    Ok(out)
}

fn write_set<W: Write>(out: &mut W, records: &[Arc<Record>], marshaller: &dyn Marshaller) -> Result<()> {
    let count = u32::try_from(records.len())
        .map_err(|_| LedgerError::Serialization("too many records".to_string()))?;

    out.write_all(RECORD_SET_MAGIC)?;
    out.write_all(&[FORMAT_VERSION])?;
    out.write_all(&count.to_le_bytes())?;
    for record in records {
        write_record(out, record, marshaller)?;
    }
    Ok(())
}

fn write_record<W: Write>(out: &mut W, record: &Record, marshaller: &dyn Marshaller) -> Result<()> {
    match record.connection() {
        Some(connection) => {
            let key = connection.key();
            out.write_all(&[1])?;
            write_str(out, &connection.description())?;
            write_str(out, &key.service)?;
            write_str(out, &key.network)?;
            write_str(out, &key.daemon)?;
        }
        None => out.write_all(&[0])?,
    }

    write_str(out, record.raw_send_subject())?;
    write_str(out, record.reply_subject())?;
    out.write_all(&record.timestamp().0.to_le_bytes())?;

    let payload = marshaller.encode(record.message())?;
    let len = u32::try_from(payload.len())
        .map_err(|_| LedgerError::Serialization("payload too large".to_string()))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

fn write_str<W: Write>(out: &mut W, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| LedgerError::Serialization(format!("string too long: {} bytes", s.len())))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

/// A record as read off the wire, before it gets a sequence number.
struct Decoded {
    connection: Option<(ConnectionKey, String)>,
    timestamp: Timestamp,
    message: Message,
}

/// Decode a single record or a record set.
///
/// The whole input is parsed and every payload decoded before anything is
/// touched, so a malformed stream leaves `connections` unchanged. Records
/// carrying connection info are linked to the registered connection with
/// that key, which is created (stopped) if absent.
pub fn decode(
    bytes: &[u8],
    marshaller: &dyn Marshaller,
    sequence: &SequenceGenerator,
    connections: &Connections,
) -> Result<Vec<Arc<Record>>> {
    let decoded = parse(&mut Reader::new(bytes), marshaller)?;
    materialize(decoded, marshaller, sequence, connections)
}

fn parse<R: Read>(reader: &mut Reader<R>, marshaller: &dyn Marshaller) -> Result<Vec<Decoded>> {
    let magic: [u8; 4] = reader.array()?;
    let single = match &magic {
        m if m == RECORD_MAGIC => true,
        m if m == RECORD_SET_MAGIC => false,
        _ => {
            return Err(LedgerError::UnsupportedFormat(format!(
                "unknown magic {:02x?}",
                magic
            )))
        }
    };

    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(LedgerError::UnsupportedFormat(format!(
            "unknown version {}",
            version
        )));
    }

    let count = if single { 1 } else { reader.u32()? as usize };
    // Cap the preallocation; a bogus count must not allocate.
    let mut records = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        records.push(read_record(reader, marshaller)?);
    }

    if !reader.at_end()? {
        return Err(LedgerError::InvalidFormat("trailing bytes".to_string()));
    }
    Ok(records)
}

fn read_record<R: Read>(reader: &mut Reader<R>, marshaller: &dyn Marshaller) -> Result<Decoded> {
    let connection = match reader.u8()? {
        0 => None,
        1 => {
            let description = reader.string()?;
            let service = reader.string()?;
            let network = reader.string()?;
            let daemon = reader.string()?;
            Some((ConnectionKey::new(service, network, daemon), description))
        }
        flag => {
            return Err(LedgerError::InvalidFormat(format!(
                "bad connection flag {}",
                flag
            )))
        }
    };

    let send_subject = reader.string()?;
    let reply_subject = reader.string()?;
    let timestamp = Timestamp(i64::from_le_bytes(reader.array()?));

    let len = reader.u32()? as usize;
    let payload = reader.bytes(len)?;
    let expected = reader.u32()?;
    let got = crc32fast::hash(&payload);
    if expected != got {
        return Err(LedgerError::ChecksumMismatch { expected, got });
    }

    let mut message = marshaller.decode(&payload)?;
    message.send_subject = Some(send_subject).filter(|s| !s.is_empty());
    message.reply_subject = Some(reply_subject).filter(|s| !s.is_empty());

    Ok(Decoded {
        connection,
        timestamp,
        message,
    })
}

fn materialize(
    decoded: Vec<Decoded>,
    marshaller: &dyn Marshaller,
    sequence: &SequenceGenerator,
    connections: &Connections,
) -> Result<Vec<Arc<Record>>> {
    let mut records = Vec::with_capacity(decoded.len());
    for item in decoded {
        let connection: Option<Arc<RvConnection>> = item
            .connection
            .map(|(key, description)| connections.get_or_create(&key, &description));
        let record = Record::with_timestamp(
            sequence,
            marshaller,
            item.message,
            connection.as_ref(),
            item.timestamp,
        )?;
        records.push(Arc::new(record));
    }
    debug!(count = records.len(), "decoded records");
    Ok(records)
}

/// Write records to a file as a record set.
pub fn export_to_file(
    path: impl AsRef<Path>,
    records: &[Arc<Record>],
    marshaller: &dyn Marshaller,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    write_set(&mut writer, records, marshaller)?;
    writer.flush()?;
    debug!(path = %path.as_ref().display(), count = records.len(), "exported records");
    Ok(())
}

/// Read records written by [`export_to_file`] (or a single record).
pub fn import_from_file(
    path: impl AsRef<Path>,
    marshaller: &dyn Marshaller,
    sequence: &SequenceGenerator,
    connections: &Connections,
) -> Result<Vec<Arc<Record>>> {
    let mut reader = Reader::new(BufReader::new(File::open(path.as_ref())?));
    let decoded = parse(&mut reader, marshaller)?;
    materialize(decoded, marshaller, sequence, connections)
}

/// Little-endian reader mapping short reads to format errors.
struct Reader<R> {
    inner: R,
}

impl<R: Read> Reader<R> {
    fn new(inner: R) -> Self {
        Self { inner }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => LedgerError::InvalidFormat("truncated input".to_string()),
            _ => LedgerError::Io(e),
        })
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if read != len {
            return Err(LedgerError::InvalidFormat("truncated input".to_string()));
        }
        Ok(buf)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes).map_err(|e| LedgerError::InvalidFormat(e.to_string()))
    }

    fn at_end(&mut self) -> Result<bool> {
        let mut probe = [0u8; 1];
        Ok(self.inner.read(&mut probe)? == 0)
    }
}
