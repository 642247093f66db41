//! Record layouts loaded from an external format description.
//!
//! A [Schema] maps a record `(class, sub_class)` to the ordered binary layout of the
//! record payload and the scale factor of each field. It is loaded once and is
//! read-only thereafter so it may be shared freely between threads.
//!
//! The JSON form of a schema looks like:
//! ```json
//! {
//!   "name": "eps_avhrrl1b",
//!   "version": "6.5",
//!   "sections": [
//!     {
//!       "class": "mdr",
//!       "sub_class": 2,
//!       "fields": [
//!         {"name": "FRAME_INDICATOR", "offset": 0, "type": "u4"},
//!         {"name": "SCENE_RADIANCES", "offset": 4, "type": "i2", "shape": [5, 2048], "scale": 0.01}
//!       ]
//!     }
//!   ]
//! }
//! ```
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::{Payload, RawValue, RecordClass};
use crate::section::SectionKey;
use crate::{Error, Result};

/// Binary field types. Integers are big-endian.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    U1,
    I1,
    U2,
    I2,
    U4,
    I4,
    U8,
    I8,
    /// Fixed-width ASCII text; see [Field::length].
    String,
}

impl FieldType {
    /// Size of a single numeric element, or `None` for text.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        match self {
            FieldType::U1 | FieldType::I1 => Some(1),
            FieldType::U2 | FieldType::I2 => Some(2),
            FieldType::U4 | FieldType::I4 => Some(4),
            FieldType::U8 | FieldType::I8 => Some(8),
            FieldType::String => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn decode(&self, buf: &[u8]) -> f64 {
        match self {
            FieldType::U1 => f64::from(buf[0]),
            FieldType::I1 => f64::from(buf[0] as i8),
            FieldType::U2 => f64::from(u16::from_be_bytes(be(buf))),
            FieldType::I2 => f64::from(i16::from_be_bytes(be(buf))),
            FieldType::U4 => f64::from(u32::from_be_bytes(be(buf))),
            FieldType::I4 => f64::from(i32::from_be_bytes(be(buf))),
            FieldType::U8 => u64::from_be_bytes(be(buf)) as f64,
            FieldType::I8 => i64::from_be_bytes(be(buf)) as f64,
            FieldType::String => f64::NAN,
        }
    }
}

fn be<const N: usize>(buf: &[u8]) -> [u8; N] {
    let mut arr = [0u8; N];
    arr.copy_from_slice(&buf[..N]);
    arr
}

/// A single field in a record layout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    /// Byte offset from the start of the record payload, i.e., just after the
    /// record header.
    pub offset: usize,
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Element dimensions, row-major. Empty for a scalar.
    #[serde(default)]
    pub shape: Vec<usize>,
    /// Width in bytes of each text element. Only used for [FieldType::String].
    #[serde(default)]
    pub length: usize,
    /// Multiplicative scale factor; 1 when not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl Field {
    pub fn new(name: &str, offset: usize, kind: FieldType, shape: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            offset,
            kind,
            shape,
            length: 0,
            scale: None,
        }
    }

    /// Create a fixed-width text field.
    pub fn text(name: &str, offset: usize, length: usize) -> Self {
        Self {
            length,
            ..Self::new(name, offset, FieldType::String, vec![])
        }
    }

    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Total number of elements.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Total number of bytes occupied in the payload.
    #[must_use]
    pub fn num_bytes(&self) -> usize {
        self.count() * self.kind.size().unwrap_or(self.length)
    }
}

/// Layout and scale factors for a single record type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchemaEntry {
    pub class: RecordClass,
    pub sub_class: u8,
    pub fields: Vec<Field>,
}

impl SchemaEntry {
    pub fn new(class: RecordClass, sub_class: u8, fields: Vec<Field>) -> Self {
        Self {
            class,
            sub_class,
            fields,
        }
    }

    #[must_use]
    pub fn key(&self) -> SectionKey {
        SectionKey::new(self.class, self.sub_class)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Scale factor for `name`, 1 if the field has none.
    #[must_use]
    pub fn scale(&self, name: &str) -> f64 {
        self.field(name).and_then(|f| f.scale).unwrap_or(1.0)
    }

    /// Map of field name to scale factor for all fields in this layout.
    #[must_use]
    pub fn scale_factors(&self) -> HashMap<&str, f64> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.scale.unwrap_or(1.0)))
            .collect()
    }

    /// Interpret `buf` as a single instance of this layout. `buf` starts just after
    /// the record header.
    ///
    /// # Errors
    /// [Error::LayoutOverrun] if any field extends past the end of `buf`.
    pub fn decode(&self, buf: &[u8]) -> Result<Payload> {
        let mut payload = Payload::default();
        for field in &self.fields {
            let end = field.offset + field.num_bytes();
            if end > buf.len() {
                return Err(Error::LayoutOverrun {
                    class: self.class,
                    sub_class: self.sub_class,
                    field: field.name.clone(),
                    needed: end,
                    available: buf.len(),
                });
            }
            let dat = &buf[field.offset..end];
            let value = match field.kind.size() {
                Some(size) => {
                    let values: Vec<f64> =
                        dat.chunks_exact(size).map(|c| field.kind.decode(c)).collect();
                    let arr = ArrayD::from_shape_vec(IxDyn(&field.shape), values)
                        .map_err(|e| Error::Schema(format!("{}: {e}", field.name)))?;
                    RawValue::Numeric(arr)
                }
                None => RawValue::Text(
                    dat.chunks(field.length.max(1))
                        .map(|c| String::from_utf8_lossy(c).into_owned())
                        .collect(),
                ),
            };
            payload.insert(&field.name, value);
        }
        Ok(payload)
    }
}

#[derive(Deserialize)]
struct SchemaFile {
    name: String,
    #[serde(default)]
    version: String,
    sections: Vec<SchemaEntry>,
}

/// Record layouts for a single product format version.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    version: String,
    /// Entries in declared order, which is also the attribute search order.
    entries: Vec<SchemaEntry>,
    lookup: HashMap<SectionKey, usize>,
    /// Field name to the indexes of the entries declaring it, in declared order.
    index: HashMap<String, Vec<usize>>,
}

impl Schema {
    /// Create a schema from entries.
    ///
    /// # Errors
    /// [Error::Schema] if an entry key is declared more than once, a field name is
    /// repeated in a layout, or a text field has no length.
    pub fn from_sections(name: &str, version: &str, entries: Vec<SchemaEntry>) -> Result<Self> {
        let mut lookup = HashMap::default();
        let mut index: HashMap<String, Vec<usize>> = HashMap::default();
        for (idx, entry) in entries.iter().enumerate() {
            if lookup.insert(entry.key(), idx).is_some() {
                return Err(Error::Schema(format!("{} declared more than once", entry.key())));
            }
            let mut names = HashSet::new();
            for field in &entry.fields {
                if !names.insert(field.name.as_str()) {
                    return Err(Error::Schema(format!(
                        "field {} repeated in {}",
                        field.name,
                        entry.key()
                    )));
                }
                if field.kind == FieldType::String && field.length == 0 {
                    return Err(Error::Schema(format!(
                        "text field {} in {} has no length",
                        field.name,
                        entry.key()
                    )));
                }
                index.entry(field.name.clone()).or_default().push(idx);
            }
        }
        debug!(name, version, sections = entries.len(), "loaded schema");

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            entries,
            lookup,
            index,
        })
    }

    /// Load a schema from its JSON description.
    ///
    /// # Errors
    /// [Error::Json] if the description cannot be parsed, or any error from
    /// [Schema::from_sections].
    pub fn from_json_str(s: &str) -> Result<Self> {
        let file: SchemaFile = serde_json::from_str(s)?;
        Self::from_sections(&file.name, &file.version, file.sections)
    }

    /// Load a schema from a JSON description file.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be read, otherwise see [Schema::from_json_str].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file: SchemaFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Self::from_sections(&file.name, &file.version, file.sections)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Layout for a record type. `None` means the record type is not decodable.
    #[must_use]
    pub fn lookup(&self, class: RecordClass, sub_class: u8) -> Option<&SchemaEntry> {
        self.lookup
            .get(&SectionKey::new(class, sub_class))
            .map(|idx| &self.entries[*idx])
    }

    /// All entries in declared order.
    #[must_use]
    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    /// Entries declaring a field called `name`, in declared order.
    pub fn entries_with(&self, name: &str) -> impl Iterator<Item = &SchemaEntry> {
        self.index
            .get(name)
            .into_iter()
            .flatten()
            .map(|idx| &self.entries[*idx])
    }

    /// Names of all fields in all layouts, in declared order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .flat_map(|e| e.fields.iter().map(|f| f.name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "name": "eps_avhrrl1b",
        "version": "6.5",
        "sections": [
            {
                "class": "mphr",
                "sub_class": 0,
                "fields": [
                    {"name": "SPACECRAFT_ID", "offset": 0, "type": "string", "length": 12}
                ]
            },
            {
                "class": "mdr",
                "sub_class": 2,
                "fields": [
                    {"name": "FRAME_INDICATOR", "offset": 0, "type": "u4"},
                    {"name": "SCENE_RADIANCES", "offset": 4, "type": "i2", "shape": [2, 3], "scale": 0.01},
                    {"name": "SPACECRAFT_ID", "offset": 16, "type": "u1"}
                ]
            }
        ]
    }"#;

    #[test]
    fn from_json() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();

        assert_eq!(schema.name(), "eps_avhrrl1b");
        assert_eq!(schema.version(), "6.5");
        assert!(schema.lookup(RecordClass::Mdr, 2).is_some());
        assert!(schema.lookup(RecordClass::Mdr, 1).is_none());
        assert!(schema.lookup(RecordClass::Giadr, 2).is_none());

        let entry = schema.lookup(RecordClass::Mdr, 2).unwrap();
        assert_eq!(entry.scale("SCENE_RADIANCES"), 0.01);
        assert_eq!(entry.scale("FRAME_INDICATOR"), 1.0);
        assert_eq!(entry.field("SCENE_RADIANCES").unwrap().num_bytes(), 12);
    }

    #[test]
    fn entries_with_uses_declared_order() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let keys: Vec<SectionKey> = schema
            .entries_with("SPACECRAFT_ID")
            .map(SchemaEntry::key)
            .collect();

        assert_eq!(
            keys,
            vec![
                SectionKey::new(RecordClass::Mphr, 0),
                SectionKey::new(RecordClass::Mdr, 2)
            ]
        );
        assert_eq!(schema.entries_with("NOPE").count(), 0);
    }

    #[test]
    fn duplicate_entries_rejected() {
        let entry = SchemaEntry::new(RecordClass::Giadr, 1, vec![]);
        let zult = Schema::from_sections("x", "1", vec![entry.clone(), entry]);
        assert!(matches!(zult, Err(Error::Schema(_))));
    }

    #[test]
    fn decode_payload() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let entry = schema.lookup(RecordClass::Mdr, 2).unwrap();
        #[rustfmt::skip]
        let buf: &[u8] = &[
            0x00, 0x01, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x02, 0x00, 0x03,
            0xff, 0xff, 0xff, 0xfe, 0x01, 0x00,
            0x07,
        ];
        let payload = entry.decode(buf).unwrap();

        let Some(RawValue::Numeric(fi)) = payload.get("FRAME_INDICATOR") else {
            panic!("expected numeric frame indicator");
        };
        assert_eq!(fi.iter().copied().collect::<Vec<_>>(), vec![65536.0]);

        let Some(RawValue::Numeric(rad)) = payload.get("SCENE_RADIANCES") else {
            panic!("expected numeric radiances");
        };
        assert_eq!(rad.shape(), &[2, 3]);
        assert_eq!(
            rad.iter().copied().collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0, -1.0, -2.0, 256.0]
        );
    }

    #[test]
    fn decode_text() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let entry = schema.lookup(RecordClass::Mphr, 0).unwrap();
        let payload = entry.decode(b"ID = M01   \n").unwrap();

        assert_eq!(
            payload.get("SPACECRAFT_ID"),
            Some(&RawValue::Text(vec!["ID = M01   \n".to_string()]))
        );
    }

    #[test]
    fn decode_overrun() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let entry = schema.lookup(RecordClass::Mdr, 2).unwrap();
        let err = entry.decode(&[0u8; 10]).unwrap_err();

        assert!(
            matches!(
                err,
                Error::LayoutOverrun {
                    needed: 16,
                    available: 10,
                    ..
                }
            ),
            "{err:?}"
        );
    }
}
