//! Generic record stream decoding.
//!
//! An EPS product is a sequence of records, each starting with a 20 byte Generic
//! Record Header (GRH) giving the record class, sub-class and the total size of
//! the record including the header. Record payloads are interpreted according to
//! a [Schema]; records the schema does not describe are skipped.
//!
//! # References
//! 1. [EPS Generic Product Format Specification (EPS.GGS.SPE.96167)](https://www.eumetsat.int/media/40048)
use std::collections::HashMap;
use std::fmt::Display;
use std::io::{self, ErrorKind, Read};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::schema::Schema;
use crate::{Error, Result};

/// Record classes in the order of their on-disk class identifiers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RecordClass {
    Reserved = 0,
    /// Main product header record
    Mphr = 1,
    /// Secondary product header record
    Sphr = 2,
    /// Internal pointer record
    Ipr = 3,
    /// Global external auxiliary data record
    Geadr = 4,
    /// Global internal auxiliary data record
    Giadr = 5,
    /// Variable external auxiliary data record
    Veadr = 6,
    /// Variable internal auxiliary data record
    Viadr = 7,
    /// Measurement data record, one per scan-line
    Mdr = 8,
}

impl RecordClass {
    pub const ALL: [RecordClass; 9] = [
        RecordClass::Reserved,
        RecordClass::Mphr,
        RecordClass::Sphr,
        RecordClass::Ipr,
        RecordClass::Geadr,
        RecordClass::Giadr,
        RecordClass::Veadr,
        RecordClass::Viadr,
        RecordClass::Mdr,
    ];

    #[must_use]
    pub fn from_u8(class: u8) -> Option<Self> {
        Self::ALL.get(class as usize).copied()
    }

    /// Repeating classes are concatenated into a single section rather than
    /// stored once per file.
    #[must_use]
    pub fn is_repeating(&self) -> bool {
        matches!(self, RecordClass::Mdr)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RecordClass::Reserved => "reserved",
            RecordClass::Mphr => "mphr",
            RecordClass::Sphr => "sphr",
            RecordClass::Ipr => "ipr",
            RecordClass::Geadr => "geadr",
            RecordClass::Giadr => "giadr",
            RecordClass::Veadr => "veadr",
            RecordClass::Viadr => "viadr",
            RecordClass::Mdr => "mdr",
        }
    }
}

impl Display for RecordClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Decode a 6 byte short CDS time: 2 bytes of days since 2000-01-01 followed by 4
/// bytes of milliseconds of day, both big-endian.
#[must_use]
pub fn decode_short_cds(buf: &[u8]) -> Option<DateTime<Utc>> {
    if buf.len() < 6 {
        return None;
    }
    let days = u16::from_be_bytes([buf[0], buf[1]]);
    let millis = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let dt = epoch + Duration::days(i64::from(days)) + Duration::milliseconds(i64::from(millis));
    Some(Utc.from_utc_datetime(&dt))
}

/// EPS Generic Record Header.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub class: RecordClass,
    pub instrument_group: u8,
    pub sub_class: u8,
    pub sub_class_version: u8,
    /// Total record size in bytes, including this header.
    pub size: u32,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
}

impl RecordHeader {
    /// Size of a ``RecordHeader``
    pub const LEN: usize = 20;

    /// Decode from bytes. `offset` is the position of `buf` in the stream and is only
    /// used for error reporting.
    ///
    /// # Errors
    /// [Error::TruncatedHeader] if there are not enough bytes, [Error::InvalidRecordClass]
    /// for an unknown class identifier, or [Error::InvalidRecordSize] if the declared size
    /// cannot contain the header.
    pub fn decode(buf: &[u8], offset: usize) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::TruncatedHeader {
                offset,
                actual: buf.len(),
                expected: Self::LEN,
            });
        }
        let class = RecordClass::from_u8(buf[0]).ok_or(Error::InvalidRecordClass {
            offset,
            class: buf[0],
        })?;
        let size = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if (size as usize) < Self::LEN {
            return Err(Error::InvalidRecordSize { offset, size });
        }
        // 6 bytes can always be decoded to a time; the fallback is unreachable
        let start_time = decode_short_cds(&buf[8..14]).unwrap_or_default();
        let stop_time = decode_short_cds(&buf[14..20]).unwrap_or_default();

        Ok(RecordHeader {
            class,
            instrument_group: buf[1],
            sub_class: buf[2],
            sub_class_version: buf[3],
            size,
            start_time,
            stop_time,
        })
    }

    /// Number of payload bytes following the header.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.size as usize - Self::LEN
    }
}

/// A decoded field value, before any scaling is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Integer data widened to `f64`, shaped according to the field dimensions.
    Numeric(ArrayD<f64>),
    /// Fixed-width text, one entry per element.
    Text(Vec<String>),
}

/// The fields of a single decoded record payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    fields: HashMap<String, RawValue>,
}

impl Payload {
    pub fn insert(&mut self, name: &str, value: RawValue) {
        self.fields.insert(name.to_string(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A single record from a record stream.
#[derive(Debug, Clone)]
pub struct Record {
    pub header: RecordHeader,
    /// Decoded payload, or `None` if the schema has no layout for this record type.
    pub payload: Option<Payload>,
    /// Byte offset of the record header in the stream.
    pub offset: usize,
}

/// Read into `buf` until it is full or the reader is exhausted, returning the
/// number of bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

/// Iterator providing [Record]s from a byte stream. See [read_records].
pub struct RecordReader<'s, R>
where
    R: Read,
{
    reader: R,
    schema: &'s Schema,
    offset: usize,
    done: bool,
}

impl<'s, R> RecordReader<'s, R>
where
    R: Read,
{
    /// Number of bytes consumed from the underlying reader.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_record(&mut self) -> Result<Option<Record>> {
        let mut buf = [0u8; RecordHeader::LEN];
        let num = fill(&mut self.reader, &mut buf)?;
        if num == 0 {
            return Ok(None);
        }
        let header = RecordHeader::decode(&buf[..num], self.offset)?;
        let payload_len = header.payload_len();
        let record_offset = self.offset;

        let Some(entry) = self.schema.lookup(header.class, header.sub_class) else {
            trace!(
                class = %header.class,
                sub_class = header.sub_class,
                offset = record_offset,
                size = header.size,
                "no layout for record; skipping"
            );
            let skipped = io::copy(
                &mut (&mut self.reader).take(payload_len as u64),
                &mut io::sink(),
            )? as usize;
            if skipped < payload_len {
                return Err(Error::TruncatedRecord {
                    offset: record_offset,
                    actual: skipped,
                    expected: payload_len,
                });
            }
            self.offset += header.size as usize;
            return Ok(Some(Record {
                header,
                payload: None,
                offset: record_offset,
            }));
        };

        // The declared record size is authoritative, so the whole payload is consumed
        // even if the layout covers fewer bytes. Buffers grow with the bytes actually
        // read so a corrupt size cannot force a huge allocation.
        let mut data = Vec::default();
        (&mut self.reader)
            .take(payload_len as u64)
            .read_to_end(&mut data)?;
        if data.len() < payload_len {
            return Err(Error::TruncatedRecord {
                offset: record_offset,
                actual: data.len(),
                expected: payload_len,
            });
        }
        let payload = entry.decode(&data)?;
        self.offset += header.size as usize;

        Ok(Some(Record {
            header,
            payload: Some(payload),
            offset: record_offset,
        }))
    }
}

impl<'s, R> Iterator for RecordReader<'s, R>
where
    R: Read,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                // Nothing after a structural error can be trusted
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Return an iterator providing [Record]s read from `reader`, decoding payloads with
/// the layouts in `schema`.
///
/// The iterator ends cleanly when the stream is exhausted at a record boundary. A
/// partial header or payload produces a single error and ends the iteration.
///
/// # Examples
/// ```
/// use eps::record::{read_records, RecordClass};
/// use eps::schema::Schema;
///
/// let schema = Schema::from_sections("empty", "0", vec![]).unwrap();
/// let dat: &[u8] = &[
///     // GRH for a 24 byte VIADR record
///     0x07, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x18,
///     0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
///     // payload
///     0xde, 0xad, 0xbe, 0xef,
/// ];
/// let records: Vec<_> = read_records(dat, &schema).collect();
/// assert_eq!(records.len(), 1);
/// let record = records[0].as_ref().unwrap();
/// assert_eq!(record.header.class, RecordClass::Viadr);
/// assert!(record.payload.is_none());
/// ```
pub fn read_records<R>(reader: R, schema: &Schema) -> RecordReader<'_, R>
where
    R: Read,
{
    RecordReader {
        reader,
        schema,
        offset: 0,
        done: false,
    }
}
