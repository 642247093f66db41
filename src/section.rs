//! Decoded record payloads grouped by record type.
//!
//! Singleton records are stored once per `(class, sub_class)`; repeating MDRs are
//! accumulated in stream order and their fields stacked on access.
use std::collections::HashMap;
use std::fmt::Display;

use ndarray::{stack, ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::record::{Payload, RawValue, Record, RecordClass};
use crate::{Error, Result};

/// Identifies the section for a record type.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionKey {
    pub class: RecordClass,
    pub sub_class: u8,
}

impl SectionKey {
    #[must_use]
    pub fn new(class: RecordClass, sub_class: u8) -> Self {
        Self { class, sub_class }
    }
}

impl Display for SectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.class, self.sub_class)
    }
}

/// The decoded payload(s) for one [SectionKey].
#[derive(Debug, Clone)]
pub enum Section {
    Single(Payload),
    /// Payloads of a repeating record class in stream order.
    Repeated(Vec<Payload>),
}

impl Section {
    /// Number of records in this section.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Section::Single(_) => 1,
            Section::Repeated(payloads) => payloads.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of field `name`, or `None` if this section does not contain it.
    ///
    /// Numeric values of a repeated section are stacked along a new leading axis, so a
    /// field with shape `[5, 2048]` in each of `n` records has shape `[n, 5, 2048]`.
    /// Text values of a repeated section are taken from the first record.
    ///
    /// # Errors
    /// [Error::InvalidAttribute] if the per-record values cannot be stacked.
    pub fn field(&self, name: &str) -> Result<Option<RawValue>> {
        let payloads = match self {
            Section::Single(payload) => return Ok(payload.get(name).cloned()),
            Section::Repeated(payloads) => payloads,
        };
        let Some(first) = payloads.first().and_then(|p| p.get(name)) else {
            return Ok(None);
        };
        if let RawValue::Text(text) = first {
            return Ok(Some(RawValue::Text(text.clone())));
        }

        let mut views: Vec<ArrayViewD<f64>> = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match payload.get(name) {
                Some(RawValue::Numeric(arr)) => views.push(arr.view()),
                _ => {
                    return Err(Error::InvalidAttribute {
                        name: name.to_string(),
                        reason: "inconsistent values across records".to_string(),
                    })
                }
            }
        }
        let stacked: ArrayD<f64> = stack(Axis(0), &views).map_err(|e| Error::InvalidAttribute {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(RawValue::Numeric(stacked)))
    }
}

/// Decoded records of a file aggregated by [SectionKey].
///
/// Records of a repeating class (see [RecordClass::is_repeating]) are concatenated in
/// the order they are added, which for a file is the physical scan-line order. Any
/// other record type may occur only once.
#[derive(Debug, Clone, Default)]
pub struct SectionStore {
    sections: HashMap<SectionKey, Section>,
}

impl SectionStore {
    /// Build a store from records, skipping records without a payload.
    ///
    /// # Errors
    /// The first error produced by `records`, or [Error::DuplicateSection].
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        let mut store = Self::default();
        for zult in records {
            let record = zult?;
            let Some(payload) = record.payload else {
                continue;
            };
            store.add(record.header.class, record.header.sub_class, payload)?;
        }
        Ok(store)
    }

    /// Add a payload.
    ///
    /// # Errors
    /// [Error::DuplicateSection] if a payload of a non-repeating class already exists for
    /// `(class, sub_class)`.
    pub fn add(&mut self, class: RecordClass, sub_class: u8, payload: Payload) -> Result<()> {
        let key = SectionKey::new(class, sub_class);
        if class.is_repeating() {
            match self
                .sections
                .entry(key)
                .or_insert_with(|| Section::Repeated(Vec::new()))
            {
                Section::Repeated(payloads) => payloads.push(payload),
                Section::Single(_) => return Err(Error::DuplicateSection { class, sub_class }),
            }
            return Ok(());
        }
        if self.sections.contains_key(&key) {
            return Err(Error::DuplicateSection { class, sub_class });
        }
        trace!(%key, "adding section");
        self.sections.insert(key, Section::Single(payload));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, class: RecordClass, sub_class: u8) -> Option<&Section> {
        self.sections.get(&SectionKey::new(class, sub_class))
    }

    /// Number of records of `class` across all sub-classes.
    #[must_use]
    pub fn count(&self, class: RecordClass) -> usize {
        self.sections
            .iter()
            .filter(|(k, _)| k.class == class)
            .map(|(_, s)| s.len())
            .sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}
