//! Attribute lookup by field name across the sections of a decoded file.
use ndarray::{ArrayD, IxDyn};

use crate::record::RawValue;
use crate::schema::Schema;
use crate::section::SectionStore;
use crate::{Error, Result};

/// A resolved, scaled attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Numeric(ArrayD<f64>),
    Text(String),
}

impl Value {
    /// First numeric element, i.e., the value of a scalar field.
    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Numeric(arr) => arr.iter().next().copied(),
            Value::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            Value::Numeric(arr) => Some(arr),
            Value::Text(_) => None,
        }
    }

    #[must_use]
    pub fn into_array(self) -> Option<ArrayD<f64>> {
        match self {
            Value::Numeric(arr) => Some(arr),
            Value::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Numeric(_) => None,
        }
    }
}

fn scaled(arr: ArrayD<f64>, scale: f64) -> ArrayD<f64> {
    if (scale - 1.0).abs() < f64::EPSILON {
        arr
    } else {
        arr * scale
    }
}

/// Extract the value from a `KEY = VALUE` text field, applying `scale` if it is numeric.
fn text_value(text: &str, scale: f64) -> Value {
    let val = text.split_once('=').map_or(text, |(_, v)| v).trim();
    match val.parse::<f64>() {
        Ok(num) => Value::Numeric(ArrayD::from_elem(IxDyn(&[]), num * scale)),
        Err(_) => Value::Text(val.to_string()),
    }
}

/// Resolves field names against a [SectionStore] using the layouts of a [Schema].
///
/// Sections are searched in the order the schema declares them; the first section
/// that contains the field wins.
#[derive(Debug, Clone, Copy)]
pub struct AttributeResolver<'a> {
    schema: &'a Schema,
    sections: &'a SectionStore,
}

impl<'a> AttributeResolver<'a> {
    #[must_use]
    pub fn new(schema: &'a Schema, sections: &'a SectionStore) -> Self {
        Self { schema, sections }
    }

    /// Resolve `name` to its scaled value.
    ///
    /// Numeric values are multiplied by the field scale factor. Text values of the form
    /// `KEY = VALUE` resolve to the scaled number if `VALUE` parses as one, otherwise to
    /// the trimmed `VALUE` text.
    ///
    /// # Errors
    /// [Error::AttributeNotFound] if no decoded section contains `name`.
    pub fn resolve(&self, name: &str) -> Result<Value> {
        for entry in self.schema.entries_with(name) {
            let Some(section) = self.sections.get(entry.class, entry.sub_class) else {
                continue;
            };
            let scale = entry.scale(name);
            match section.field(name)? {
                Some(RawValue::Numeric(arr)) => return Ok(Value::Numeric(scaled(arr, scale))),
                Some(RawValue::Text(text)) => {
                    let first = text.first().map_or("", String::as_str);
                    return Ok(text_value(first, scale));
                }
                None => continue,
            }
        }
        Err(Error::AttributeNotFound(name.to_string()))
    }

    /// Resolve `name` to a scalar number.
    ///
    /// # Errors
    /// [Error::AttributeNotFound], or [Error::InvalidAttribute] if the value is not numeric.
    pub fn scalar(&self, name: &str) -> Result<f64> {
        self.resolve(name)?
            .as_scalar()
            .ok_or_else(|| invalid(name, "expected a number"))
    }

    /// Resolve `name` to a numeric array.
    ///
    /// # Errors
    /// [Error::AttributeNotFound], or [Error::InvalidAttribute] if the value is not numeric.
    pub fn array(&self, name: &str) -> Result<ArrayD<f64>> {
        self.resolve(name)?
            .into_array()
            .ok_or_else(|| invalid(name, "expected numeric data"))
    }

    /// Resolve `name` to text.
    ///
    /// # Errors
    /// [Error::AttributeNotFound], or [Error::InvalidAttribute] if the value is numeric.
    pub fn text(&self, name: &str) -> Result<String> {
        match self.resolve(name)? {
            Value::Text(s) => Ok(s),
            Value::Numeric(_) => Err(invalid(name, "expected text")),
        }
    }

    /// All field names the schema declares.
    #[must_use]
    pub fn keys(&self) -> Vec<&'a str> {
        self.schema.field_names()
    }
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::InvalidAttribute {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
