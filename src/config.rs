//! Declarative reader configuration.
//!
//! A reader configuration names the file types a reader accepts, with the filename
//! templates used to recognize them (see [crate::pattern]), and the dataset templates
//! used to build the dataset [Catalog](crate::catalog::Catalog).
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::catalog::WavelengthRange;
use crate::{Error, Result};

const AVHRR_EPS_CONFIG: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/avhrr_eps.yaml"
));

/// A single value or a list of values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    /// Number of values when this is a list, `None` for a single value.
    #[must_use]
    pub fn list_len(&self) -> Option<usize> {
        match self {
            OneOrMany::One(_) => None,
            OneOrMany::Many(v) => Some(v.len()),
        }
    }

    /// Value for expansion index `idx`. Single values, and lists of a single value,
    /// apply to every index.
    #[must_use]
    pub fn at(&self, idx: usize) -> Option<T> {
        match self {
            OneOrMany::One(v) => Some(v.clone()),
            OneOrMany::Many(v) if v.len() == 1 => Some(v[0].clone()),
            OneOrMany::Many(v) => v.get(idx).cloned(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReaderInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sensors: Vec<String>,
}

/// File type definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileTypeSpec {
    /// Filename templates, in match order.
    pub file_patterns: Vec<String>,
    /// File type providing navigation for files of this type. Files of a type without
    /// navigation provide their own.
    #[serde(default)]
    pub navigation: Option<String>,
}

/// Dataset template. Multi-valued `resolution`, `calibration` and `polarization`
/// expand to one dataset identifier per list index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetTemplate {
    pub name: String,
    #[serde(default)]
    pub wavelength_range: Option<WavelengthRange>,
    #[serde(default)]
    pub resolution: Option<OneOrMany<u32>>,
    #[serde(default)]
    pub calibration: Option<OneOrMany<Calibration>>,
    #[serde(default)]
    pub polarization: Option<OneOrMany<String>>,
    pub file_type: String,
    #[serde(default)]
    pub units: Option<String>,
}

/// Reader configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    pub reader: ReaderInfo,
    pub file_types: BTreeMap<String, FileTypeSpec>,
    pub datasets: BTreeMap<String, DatasetTemplate>,
}

impl ReaderConfig {
    /// The embedded configuration for EPS AVHRR/3 level 1b products.
    ///
    /// # Errors
    /// See [ReaderConfig::from_yaml_str].
    pub fn avhrr_eps() -> Result<Self> {
        Self::from_yaml_str(AVHRR_EPS_CONFIG)
    }

    /// Parse and validate a YAML configuration.
    ///
    /// # Errors
    /// [Error::Yaml] if the document cannot be parsed, or [Error::Config] if it is invalid.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: ReaderConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML configuration file.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be read, otherwise see [ReaderConfig::from_yaml_str].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    /// Check that all file type references resolve.
    ///
    /// # Errors
    /// [Error::Config] describing the first invalid reference.
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in &self.file_types {
            if spec.file_patterns.is_empty() {
                return Err(Error::Config(format!("file type {name} has no file patterns")));
            }
            if let Some(nav) = &spec.navigation {
                if !self.file_types.contains_key(nav) {
                    return Err(Error::Config(format!(
                        "file type {name} references unknown navigation file type {nav}"
                    )));
                }
            }
        }
        for (key, ds) in &self.datasets {
            if !self.file_types.contains_key(&ds.file_type) {
                return Err(Error::Config(format!(
                    "dataset {key} references unknown file type {}",
                    ds.file_type
                )));
            }
        }
        Ok(())
    }

    /// Navigation file type for `file_type`, if any.
    #[must_use]
    pub fn navigation_type(&self, file_type: &str) -> Option<&str> {
        self.file_types
            .get(file_type)
            .and_then(|ft| ft.navigation.as_deref())
    }
}
