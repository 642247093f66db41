//! Decoded EPS AVHRR/3 level 1b files.
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use ndarray::{Array1, Array2, ArrayD, Axis, Dimension, Ix1, Ix2, Ix3};
use tracing::{debug, warn};

use crate::calibration::{
    channel_switch_masks, mask_scanlines, radiance_to_bt, radiance_to_reflectance, Calibration,
    CHANNEL_3A_BIT,
};
use crate::catalog::DatasetId;
use crate::geolocation::{Interpolator, SwathArea, TiePoints};
use crate::pattern::FilenameInfo;
use crate::product::{area_name, Product};
use crate::record::{read_records, RecordClass};
use crate::resolver::{AttributeResolver, Value};
use crate::schema::Schema;
use crate::section::SectionStore;
use crate::{Error, Result};

const SENSING_TIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

/// Spacecraft names by `SPACECRAFT_ID`.
pub const SPACECRAFTS: [(&str, &str); 3] =
    [("M01", "Metop-B"), ("M02", "Metop-A"), ("M03", "Metop-C")];

/// Sensor names by `INSTRUMENT_ID`.
pub const SENSORS: [(&str, &str); 1] = [("AVHR", "avhrr/3")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Switch {
    /// Active when the channel 3 switch bit is set.
    A,
    /// Active when the channel 3 switch bit is clear.
    B,
}

#[derive(Debug, Clone, Copy)]
enum ChannelKind {
    Solar {
        irradiance: &'static str,
    },
    Thermal {
        wavenumber: &'static str,
        constant1: &'static str,
        constant2_slope: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    name: &'static str,
    /// Index into the band axis of `SCENE_RADIANCES`.
    band: usize,
    kind: ChannelKind,
    switch: Option<Switch>,
}

const CHANNELS: [Channel; 6] = [
    Channel {
        name: "1",
        band: 0,
        kind: ChannelKind::Solar {
            irradiance: "CH1_SOLAR_FILTERED_IRRADIANCE",
        },
        switch: None,
    },
    Channel {
        name: "2",
        band: 1,
        kind: ChannelKind::Solar {
            irradiance: "CH2_SOLAR_FILTERED_IRRADIANCE",
        },
        switch: None,
    },
    Channel {
        name: "3a",
        band: 2,
        kind: ChannelKind::Solar {
            irradiance: "CH3A_SOLAR_FILTERED_IRRADIANCE",
        },
        switch: Some(Switch::A),
    },
    Channel {
        name: "3b",
        band: 2,
        kind: ChannelKind::Thermal {
            wavenumber: "CH3B_CENTRAL_WAVENUMBER",
            constant1: "CH3B_CONSTANT1",
            constant2_slope: "CH3B_CONSTANT2_SLOPE",
        },
        switch: Some(Switch::B),
    },
    Channel {
        name: "4",
        band: 3,
        kind: ChannelKind::Thermal {
            wavenumber: "CH4_CENTRAL_WAVENUMBER",
            constant1: "CH4_CONSTANT1",
            constant2_slope: "CH4_CONSTANT2_SLOPE",
        },
        switch: None,
    },
    Channel {
        name: "5",
        band: 4,
        kind: ChannelKind::Thermal {
            wavenumber: "CH5_CENTRAL_WAVENUMBER",
            constant1: "CH5_CONSTANT1",
            constant2_slope: "CH5_CONSTANT2_SLOPE",
        },
        switch: None,
    },
];

/// Where a file gets its geolocation from.
#[derive(Debug, Clone)]
pub enum Navigation {
    /// The file carries its own geolocation.
    Internal,
    /// Geolocation comes from a shared navigation file.
    Paired(Arc<EpsFile>),
    /// A navigation file is required but none was found.
    Missing,
    /// The paired navigation file could not be decoded.
    Failed(Arc<Error>),
}

/// A fully decoded EPS file.
///
/// Geolocation, area and channel switch masks are computed on first use and cached for
/// the lifetime of the handle. Navigation may be replaced at any time, e.g. when a
/// navigation file is selected after the file was first loaded.
#[derive(Debug)]
pub struct EpsFile {
    path: PathBuf,
    info: FilenameInfo,
    schema: Arc<Schema>,
    sections: SectionStore,
    navigation: RwLock<Option<Navigation>>,
    lonlats: OnceLock<(Array2<f64>, Array2<f64>)>,
    area: OnceLock<SwathArea>,
    switch_masks: OnceLock<(Array1<bool>, Array1<bool>)>,
}

fn try_init<T, F>(cell: &OnceLock<T>, init: F) -> Result<&T>
where
    F: FnOnce() -> Result<T>,
{
    if let Some(val) = cell.get() {
        return Ok(val);
    }
    let val = init()?;
    Ok(cell.get_or_init(|| val))
}

fn dims<D: Dimension>(name: &str, arr: ArrayD<f64>) -> Result<ndarray::Array<f64, D>> {
    arr.into_dimensionality::<D>()
        .map_err(|e| Error::InvalidAttribute {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

impl EpsFile {
    /// Open and fully decode the file at `path`.
    ///
    /// # Errors
    /// Any structural decode error, or [Error::DuplicateSection].
    pub fn open<P: AsRef<Path>>(path: P, info: FilenameInfo, schema: Arc<Schema>) -> Result<Self> {
        let path = path.as_ref();
        debug!(?path, schema = schema.name(), "opening");
        let reader = BufReader::new(File::open(path)?);
        Self::from_reader(path, info, schema, reader)
    }

    /// Decode a file from `reader`.
    ///
    /// # Errors
    /// Any structural decode error, or [Error::DuplicateSection].
    pub fn from_reader<P, R>(path: P, info: FilenameInfo, schema: Arc<Schema>, reader: R) -> Result<Self>
    where
        P: AsRef<Path>,
        R: Read,
    {
        let sections = SectionStore::from_records(read_records(reader, &schema))?;
        let handle = Self {
            path: path.as_ref().to_path_buf(),
            info,
            schema,
            sections,
            navigation: RwLock::new(None),
            lonlats: OnceLock::new(),
            area: OnceLock::new(),
            switch_masks: OnceLock::new(),
        };
        debug!(path=?handle.path, sections = handle.sections.len(), scanlines = handle.scanlines(), "decoded");
        Ok(handle)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata parsed from the filename.
    #[must_use]
    pub fn filename_info(&self) -> &FilenameInfo {
        &self.info
    }

    #[must_use]
    pub fn sections(&self) -> &SectionStore {
        &self.sections
    }

    #[must_use]
    pub fn resolver(&self) -> AttributeResolver<'_> {
        AttributeResolver::new(&self.schema, &self.sections)
    }

    /// Resolve an attribute by field name.
    ///
    /// # Errors
    /// [Error::AttributeNotFound] if no section has the field.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.resolver().resolve(name)
    }

    /// All field names of the schema.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.schema.field_names()
    }

    fn sensing_time(&self, name: &str) -> Result<DateTime<Utc>> {
        let text = self.resolver().text(name)?;
        let naive = NaiveDateTime::parse_from_str(&text, SENSING_TIME_FORMAT).map_err(|e| {
            Error::InvalidAttribute {
                name: name.to_string(),
                reason: format!("{text:?}: {e}"),
            }
        })?;
        Ok(Utc.from_utc_datetime(&naive))
    }

    /// # Errors
    /// If `SENSING_START` is missing or not a valid time.
    pub fn start_time(&self) -> Result<DateTime<Utc>> {
        self.sensing_time("SENSING_START")
    }

    /// # Errors
    /// If `SENSING_END` is missing or not a valid time.
    pub fn end_time(&self) -> Result<DateTime<Utc>> {
        self.sensing_time("SENSING_END")
    }

    fn lookup_name(&self, field: &str, names: &[(&str, &'static str)]) -> Result<&'static str> {
        let id = self.resolver().text(field)?;
        names
            .iter()
            .find(|(key, _)| *key == id)
            .map(|(_, name)| *name)
            .ok_or_else(|| Error::InvalidAttribute {
                name: field.to_string(),
                reason: format!("unknown value {id:?}"),
            })
    }

    /// Platform name from the `SPACECRAFT_ID`, e.g., `M01` is Metop-B.
    ///
    /// # Errors
    /// If `SPACECRAFT_ID` is missing or unknown.
    pub fn platform_name(&self) -> Result<&'static str> {
        self.lookup_name("SPACECRAFT_ID", &SPACECRAFTS)
    }

    /// # Errors
    /// If `INSTRUMENT_ID` is missing or unknown.
    pub fn sensor_name(&self) -> Result<&'static str> {
        self.lookup_name("INSTRUMENT_ID", &SENSORS)
    }

    /// # Errors
    /// If `ORBIT_START` is missing or not a number.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn begin_orbit_number(&self) -> Result<u32> {
        Ok(self.resolver().scalar("ORBIT_START")? as u32)
    }

    /// # Errors
    /// If `ORBIT_END` is missing or not a number.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn end_orbit_number(&self) -> Result<u32> {
        Ok(self.resolver().scalar("ORBIT_END")? as u32)
    }

    /// Number of measurement records, i.e., scan-lines.
    #[must_use]
    pub fn scanlines(&self) -> usize {
        self.sections.count(RecordClass::Mdr)
    }

    /// Tie-point geolocation, one row per scan-line.
    ///
    /// # Errors
    /// If any of the earth location fields are missing or have unexpected shapes.
    pub fn tie_points(&self) -> Result<TiePoints> {
        let resolver = self.resolver();
        let first = dims::<Ix2>("EARTH_LOCATION_FIRST", resolver.array("EARTH_LOCATION_FIRST")?)?;
        let locations = dims::<Ix3>("EARTH_LOCATIONS", resolver.array("EARTH_LOCATIONS")?)?;
        let last = dims::<Ix2>("EARTH_LOCATION_LAST", resolver.array("EARTH_LOCATION_LAST")?)?;
        TiePoints::from_locations(first.view(), locations.view(), last.view())
    }

    /// Full resolution `(lons, lats)` expanded from the tie-points with `interpolator`.
    ///
    /// # Errors
    /// [Error::UnsupportedConfiguration] unless the file has a navigation sample rate of
    /// 20 and 2048 earth views per scan-line.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn full_lonlats(&self, interpolator: &dyn Interpolator) -> Result<&(Array2<f64>, Array2<f64>)> {
        try_init(&self.lonlats, || {
            let resolver = self.resolver();
            let sample_rate = resolver.scalar("NAV_SAMPLE_RATE")? as u32;
            let views = resolver.scalar("EARTH_VIEWS_PER_SCANLINE")? as u32;
            self.tie_points()?.expand(interpolator, sample_rate, views)
        })
    }

    /// Longitude and latitude at a pixel. Before [EpsFile::full_lonlats] has been
    /// computed the indexes refer to the tie-point grid.
    ///
    /// # Errors
    /// If geolocation is unavailable or the indexes are out of bounds.
    pub fn lonlat(&self, row: usize, col: usize) -> Result<(f64, f64)> {
        let out_of_bounds = || Error::InvalidAttribute {
            name: "EARTH_LOCATIONS".to_string(),
            reason: format!("({row}, {col}) is out of bounds"),
        };
        if let Some((lons, lats)) = self.lonlats.get() {
            return Ok((
                *lons.get((row, col)).ok_or_else(out_of_bounds)?,
                *lats.get((row, col)).ok_or_else(out_of_bounds)?,
            ));
        }
        let tp = self.tie_points()?;
        Ok((
            *tp.lons.get((row, col)).ok_or_else(out_of_bounds)?,
            *tp.lats.get((row, col)).ok_or_else(out_of_bounds)?,
        ))
    }

    /// Swath area from the full resolution geolocation, named
    /// `<platform>_<start>_<end>`.
    ///
    /// # Errors
    /// See [EpsFile::full_lonlats]. Also fails if the platform or sensing times are
    /// unavailable.
    pub fn area(&self, interpolator: &dyn Interpolator) -> Result<&SwathArea> {
        try_init(&self.area, || {
            let name = area_name(
                Some(self.platform_name()?),
                Some(self.start_time()?),
                Some(self.end_time()?),
            );
            let (lons, lats) = self.full_lonlats(interpolator)?;
            Ok(SwathArea {
                name,
                lons: lons.clone(),
                lats: lats.clone(),
            })
        })
    }

    /// Per scan-line `(3a, 3b)` masks, `true` where the channel is inactive.
    ///
    /// # Errors
    /// If `FRAME_INDICATOR` is missing.
    pub fn switch_masks(&self) -> Result<&(Array1<bool>, Array1<bool>)> {
        try_init(&self.switch_masks, || {
            let status = dims::<Ix1>("FRAME_INDICATOR", self.resolver().array("FRAME_INDICATOR")?)?;
            Ok(channel_switch_masks(status.view(), CHANNEL_3A_BIT))
        })
    }

    /// Set where this file gets geolocation from, replacing any previous navigation.
    pub fn set_navigation(&self, navigation: Navigation) {
        let mut slot = self.navigation.write().unwrap_or_else(PoisonError::into_inner);
        debug!(path=?self.path, replaced = slot.is_some(), "setting navigation");
        *slot = Some(navigation);
    }

    /// Where this file currently gets geolocation from, `None` if never set.
    #[must_use]
    pub fn navigation(&self) -> Option<Navigation> {
        self.navigation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Call `f` with the file providing geolocation for this file, which may be this
    /// file.
    ///
    /// # Errors
    /// [Error::MissingNavigation] if a navigation file is required but was not found,
    /// [Error::File] if it could not be decoded, or any error from `f`.
    pub fn with_navigation_file<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&EpsFile) -> Result<T>,
    {
        match self.navigation() {
            None | Some(Navigation::Internal) => f(self),
            Some(Navigation::Paired(nav)) => f(nav.as_ref()),
            Some(Navigation::Missing) => Err(Error::MissingNavigation(self.path.clone())),
            Some(Navigation::Failed(err)) => Err(Error::File {
                path: self.path.clone(),
                source: err,
            }),
        }
    }

    /// Load the dataset `id`. The area is attached when an `interpolator` is provided
    /// and navigation is available.
    ///
    /// # Errors
    /// [Error::UnsupportedDataset] for unknown datasets, [Error::UnsupportedCalibration]
    /// for calibrations a channel cannot provide, [Error::MissingNavigation] for
    /// geolocation datasets without navigation, or any attribute error.
    pub fn get_dataset(&self, id: &DatasetId, interpolator: Option<&dyn Interpolator>) -> Result<Product> {
        let name = id.name().to_ascii_lowercase();
        let (data, mask) = match name.as_str() {
            "longitude" | "latitude" => {
                let tp = self.with_navigation_file(EpsFile::tie_points)?;
                let data = if name == "longitude" { tp.lons } else { tp.lats };
                let mask = Array2::from_elem(data.dim(), false);
                (data, mask)
            }
            _ => {
                let Some(channel) = CHANNELS.iter().find(|c| c.name == name) else {
                    return Err(Error::UnsupportedDataset(id.to_string()));
                };
                self.channel(channel, id)?
            }
        };

        let area = match interpolator {
            Some(interp) if !matches!(name.as_str(), "longitude" | "latitude") => {
                // navigation errors only drop the area; area errors fail the dataset
                match self.with_navigation_file(|nav| Ok(nav.area(interp).cloned())) {
                    Ok(area) => Some(area?),
                    Err(err) => {
                        warn!(path=?self.path, "no area for {id}: {err}");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Product {
            id: id.clone(),
            data,
            mask,
            area,
            platform_name: self.platform_name().ok().map(str::to_string),
            sensor: self.sensor_name().ok().map(str::to_string),
            start_time: self.start_time().ok(),
            end_time: self.end_time().ok(),
        })
    }

    fn channel(&self, channel: &Channel, id: &DatasetId) -> Result<(Array2<f64>, Array2<bool>)> {
        let calibration = id.calibration.unwrap_or(match channel.kind {
            ChannelKind::Solar { .. } => Calibration::Reflectance,
            ChannelKind::Thermal { .. } => Calibration::BrightnessTemperature,
        });
        let unsupported = || Error::UnsupportedCalibration {
            dataset: id.to_string(),
            calibration: calibration.to_string(),
        };
        if calibration == Calibration::Counts {
            return Err(unsupported());
        }

        let resolver = self.resolver();
        let radiances = dims::<Ix3>("SCENE_RADIANCES", resolver.array("SCENE_RADIANCES")?)?;
        if channel.band >= radiances.len_of(Axis(1)) {
            return Err(Error::InvalidAttribute {
                name: "SCENE_RADIANCES".to_string(),
                reason: format!("no band {} for channel {}", channel.band, channel.name),
            });
        }
        let radiance = radiances.index_axis(Axis(1), channel.band);
        let mut mask = Array2::from_elem(radiance.dim(), false);

        let data = match (calibration, channel.kind) {
            (Calibration::Radiance, _) => radiance.to_owned(),
            (Calibration::Reflectance, ChannelKind::Solar { irradiance }) => {
                radiance_to_reflectance(&radiance, resolver.scalar(irradiance)?)
            }
            (
                Calibration::BrightnessTemperature,
                ChannelKind::Thermal {
                    wavenumber,
                    constant1,
                    constant2_slope,
                },
            ) => {
                mask.zip_mut_with(&radiance, |m, r| *m |= *r <= 0.0);
                radiance_to_bt(
                    &radiance,
                    resolver.scalar(wavenumber)?,
                    resolver.scalar(constant1)?,
                    resolver.scalar(constant2_slope)?,
                )
            }
            _ => return Err(unsupported()),
        };

        if let Some(switch) = channel.switch {
            let (mask_a, mask_b) = self.switch_masks()?;
            let lines = match switch {
                Switch::A => mask_a,
                Switch::B => mask_b,
            };
            let lines = mask_scanlines(lines.view(), mask.ncols());
            mask.zip_mut_with(&lines, |m, l| *m |= *l);
        }

        Ok((data, mask))
    }
}
