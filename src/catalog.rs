//! Dataset identifiers and query resolution.
//!
//! The [Catalog] is the enumerable set of [DatasetId]s a reader can load, expanded from
//! the dataset templates of a [ReaderConfig](crate::config::ReaderConfig). Queries for a
//! dataset by name, wavelength or partial identifier are resolved against it.
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::calibration::Calibration;
use crate::config::{DatasetTemplate, OneOrMany};
use crate::{Error, Result};

/// Spectral range of a channel in micrometers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct WavelengthRange {
    pub min: f64,
    pub central: f64,
    pub max: f64,
}

impl WavelengthRange {
    #[must_use]
    pub fn new(min: f64, central: f64, max: f64) -> Self {
        Self { min, central, max }
    }

    /// Inclusive of both bounds.
    #[must_use]
    pub fn contains(&self, wavelength: f64) -> bool {
        self.min <= wavelength && wavelength <= self.max
    }

    /// Distance of `wavelength` from the central wavelength.
    #[must_use]
    pub fn distance(&self, wavelength: f64) -> f64 {
        (self.central - wavelength).abs()
    }
}

impl From<[f64; 3]> for WavelengthRange {
    fn from(value: [f64; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

impl From<WavelengthRange> for [f64; 3] {
    fn from(value: WavelengthRange) -> Self {
        [value.min, value.central, value.max]
    }
}

// Ranges come from configuration and are never NaN, so bitwise equality is structural.
impl Eq for WavelengthRange {}

impl Hash for WavelengthRange {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.min.to_bits().hash(state);
        self.central.to_bits().hash(state);
        self.max.to_bits().hash(state);
    }
}

impl Display for WavelengthRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}um", self.min, self.central, self.max)
    }
}

/// Identifies a single loadable product.
///
/// Several identifiers may share a name and differ in resolution, calibration or
/// polarization.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DatasetId {
    pub name: Option<String>,
    pub wavelength: Option<WavelengthRange>,
    pub resolution: Option<u32>,
    pub calibration: Option<Calibration>,
    pub polarization: Option<String>,
}

impl DatasetId {
    /// Identifier with only a name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = Some(resolution);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

impl Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DatasetId(name={:?}", self.name())?;
        if let Some(wl) = &self.wavelength {
            write!(f, ", wavelength={wl}")?;
        }
        if let Some(res) = self.resolution {
            write!(f, ", resolution={res}")?;
        }
        if let Some(cal) = self.calibration {
            write!(f, ", calibration={cal}")?;
        }
        if let Some(pol) = &self.polarization {
            write!(f, ", polarization={pol}")?;
        }
        write!(f, ")")
    }
}

/// A request for a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetQuery {
    Name(String),
    /// Wavelength in micrometers.
    Wavelength(f64),
    /// Partial identifier. Resolved by name, or by central wavelength if it has no name;
    /// its other fields act as filters.
    Id(DatasetId),
}

impl From<&str> for DatasetQuery {
    fn from(value: &str) -> Self {
        DatasetQuery::Name(value.to_string())
    }
}

impl From<f64> for DatasetQuery {
    fn from(value: f64) -> Self {
        DatasetQuery::Wavelength(value)
    }
}

impl From<DatasetId> for DatasetQuery {
    fn from(value: DatasetId) -> Self {
        DatasetQuery::Id(value)
    }
}

impl Display for DatasetQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetQuery::Name(name) => write!(f, "{name:?}"),
            DatasetQuery::Wavelength(wl) => write!(f, "{wl}um"),
            DatasetQuery::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Restricts the identifiers a query may resolve to. `None` does not filter, except for
/// calibration where it means [QueryFilter::DEFAULT_CALIBRATION].
#[derive(Debug, Clone, Default, PartialEq, TypedBuilder)]
pub struct QueryFilter {
    #[builder(default, setter(strip_option))]
    pub calibration: Option<Vec<Calibration>>,
    #[builder(default, setter(strip_option))]
    pub resolution: Option<Vec<u32>>,
    #[builder(default, setter(strip_option))]
    pub polarization: Option<Vec<String>>,
}

impl QueryFilter {
    pub const DEFAULT_CALIBRATION: [Calibration; 2] =
        [Calibration::BrightnessTemperature, Calibration::Reflectance];

    /// Fill unset filters from the fields of a partial identifier.
    fn with_defaults_from(&self, id: &DatasetId) -> Self {
        Self {
            calibration: self
                .calibration
                .clone()
                .or_else(|| id.calibration.map(|c| vec![c])),
            resolution: self
                .resolution
                .clone()
                .or_else(|| id.resolution.map(|r| vec![r])),
            polarization: self
                .polarization
                .clone()
                .or_else(|| id.polarization.clone().map(|p| vec![p])),
        }
    }
}

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Key of the dataset template in the reader configuration.
    pub key: String,
    pub file_type: String,
    pub units: Option<String>,
}

/// All dataset identifiers available from a reader configuration.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    ids: Vec<DatasetId>,
    entries: HashMap<DatasetId, CatalogEntry>,
}

fn list_len<T: Clone>(key: &str, attr: &str, value: Option<&OneOrMany<T>>) -> Result<Option<usize>> {
    match value.and_then(OneOrMany::list_len) {
        Some(0) => Err(Error::Config(format!("dataset {key} has an empty {attr} list"))),
        len => Ok(len),
    }
}

impl Catalog {
    /// Expand dataset templates into identifiers.
    ///
    /// Multi-valued resolution, calibration and polarization lists are zipped by index;
    /// single values, and single element lists, apply to every index.
    ///
    /// # Errors
    /// [Error::Config] if lists of a template have different lengths, a list is empty, or
    /// two templates produce the same identifier.
    pub fn build(templates: &BTreeMap<String, DatasetTemplate>) -> Result<Self> {
        let mut catalog = Self::default();
        for (key, tmpl) in templates {
            let lens = [
                list_len(key, "resolution", tmpl.resolution.as_ref())?,
                list_len(key, "calibration", tmpl.calibration.as_ref())?,
                list_len(key, "polarization", tmpl.polarization.as_ref())?,
            ];
            let count = lens.iter().flatten().copied().max().unwrap_or(1);
            if lens.iter().flatten().any(|&n| n != 1 && n != count) {
                return Err(Error::Config(format!(
                    "dataset {key} has multi-valued attributes of different lengths"
                )));
            }

            for idx in 0..count {
                let id = DatasetId {
                    name: Some(tmpl.name.clone()),
                    wavelength: tmpl.wavelength_range,
                    resolution: tmpl.resolution.as_ref().and_then(|v| v.at(idx)),
                    calibration: tmpl.calibration.as_ref().and_then(|v| v.at(idx)),
                    polarization: tmpl.polarization.as_ref().and_then(|v| v.at(idx)),
                };
                let entry = CatalogEntry {
                    key: key.clone(),
                    file_type: tmpl.file_type.clone(),
                    units: tmpl.units.clone(),
                };
                if catalog.entries.insert(id.clone(), entry).is_some() {
                    return Err(Error::Config(format!("duplicate dataset {id}")));
                }
                catalog.ids.push(id);
            }
        }
        Ok(catalog)
    }

    /// All identifiers, in configuration order.
    #[must_use]
    pub fn ids(&self) -> &[DatasetId] {
        &self.ids
    }

    #[must_use]
    pub fn entry(&self, id: &DatasetId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resolve `query` to the identifiers it matches, best match first.
    ///
    /// Wavelength matches are ordered by distance from the central wavelength, then by
    /// calibration preference. Identifiers without a calibration always pass the
    /// calibration filter and sort after calibrated ones.
    ///
    /// # Errors
    /// [Error::DatasetNotFound] if nothing matches after filtering.
    pub fn resolve(&self, query: &DatasetQuery, filter: &QueryFilter) -> Result<Vec<DatasetId>> {
        let not_found = || Error::DatasetNotFound(query.to_string());

        let (mut candidates, filter) = match query {
            DatasetQuery::Name(name) => (self.by_name(name), filter.clone()),
            DatasetQuery::Wavelength(wl) => (self.by_wavelength(*wl), filter.clone()),
            DatasetQuery::Id(id) => {
                let candidates = match (&id.name, &id.wavelength) {
                    (Some(name), _) => self.by_name(name),
                    (None, Some(wl)) => self.by_wavelength(wl.central),
                    (None, None) => return Err(not_found()),
                };
                (candidates, filter.with_defaults_from(id))
            }
        };
        if candidates.is_empty() {
            return Err(not_found());
        }

        if let Some(resolutions) = &filter.resolution {
            candidates.retain(|(id, _)| id.resolution.is_some_and(|r| resolutions.contains(&r)));
        }
        if let Some(polarizations) = &filter.polarization {
            candidates.retain(|(id, _)| {
                id.polarization
                    .as_ref()
                    .is_some_and(|p| polarizations.contains(p))
            });
        }
        let calibrations = filter
            .calibration
            .as_deref()
            .unwrap_or(&QueryFilter::DEFAULT_CALIBRATION);
        candidates.retain(|(id, _)| id.calibration.map_or(true, |c| calibrations.contains(&c)));

        candidates.sort_by(|(a, da), (b, db)| {
            da.total_cmp(db).then_with(|| rank(a).cmp(&rank(b)))
        });
        if candidates.is_empty() {
            return Err(not_found());
        }
        Ok(candidates.into_iter().map(|(id, _)| id.clone()).collect())
    }

    /// Best identifier for `query`; see [Catalog::resolve].
    ///
    /// # Errors
    /// [Error::DatasetNotFound] if nothing matches after filtering.
    pub fn resolve_one(&self, query: &DatasetQuery, filter: &QueryFilter) -> Result<DatasetId> {
        self.resolve(query, filter)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::DatasetNotFound(query.to_string()))
    }

    fn by_name(&self, name: &str) -> Vec<(&DatasetId, f64)> {
        self.ids
            .iter()
            .filter(|id| id.name.as_deref() == Some(name))
            .map(|id| (id, 0.0))
            .collect()
    }

    fn by_wavelength(&self, wavelength: f64) -> Vec<(&DatasetId, f64)> {
        self.ids
            .iter()
            .filter_map(|id| {
                id.wavelength
                    .filter(|wl| wl.contains(wavelength))
                    .map(|wl| (id, wl.distance(wavelength)))
            })
            .collect()
    }
}

fn rank(id: &DatasetId) -> usize {
    id.calibration
        .map_or(Calibration::PRIORITY.len(), |c| c.rank())
}
