//! Tie-point geolocation and swath area definitions.
//!
//! Expanding tie-points to per-pixel geolocation is delegated to an [Interpolator]
//! provided by the caller.
use ndarray::{concatenate, s, Array2, ArrayView2, ArrayView3, Axis};

use crate::{Error, Result};

/// Navigation sample rate, in pixels, of the only supported tie-point layout.
pub const SUPPORTED_SAMPLE_RATE: u32 = 20;
/// Earth views per scan-line of the only supported tie-point layout.
pub const SUPPORTED_POINTS_PER_LINE: u32 = 2048;

/// Densifies tie-point longitudes/latitudes to full pixel resolution.
pub trait Interpolator: Send + Sync {
    /// Returns `(lons, lats)` with one value per pixel.
    ///
    /// # Errors
    /// Implementation specific.
    fn interpolate(
        &self,
        lons: ArrayView2<f64>,
        lats: ArrayView2<f64>,
        sample_rate: u32,
        points_per_line: u32,
    ) -> Result<(Array2<f64>, Array2<f64>)>;
}

/// Sparse geolocation, one row per scan-line.
#[derive(Debug, Clone, PartialEq)]
pub struct TiePoints {
    pub lons: Array2<f64>,
    pub lats: Array2<f64>,
}

impl TiePoints {
    /// Assemble tie-points from the first, intermediate and last earth locations of
    /// each scan-line. The last axis of each input is `[lat, lon]`.
    ///
    /// # Errors
    /// [Error::InvalidAttribute] if the inputs do not agree on the number of scan-lines.
    pub fn from_locations(
        first: ArrayView2<f64>,
        locations: ArrayView3<f64>,
        last: ArrayView2<f64>,
    ) -> Result<Self> {
        let column = |idx: usize| -> Result<Array2<f64>> {
            concatenate(
                Axis(1),
                &[
                    first.slice(s![.., idx..=idx]),
                    locations.index_axis(Axis(2), idx),
                    last.slice(s![.., idx..=idx]),
                ],
            )
            .map_err(|e| Error::InvalidAttribute {
                name: "EARTH_LOCATIONS".to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            lats: column(0)?,
            lons: column(1)?,
        })
    }

    /// Expand to full resolution with `interpolator`.
    ///
    /// # Errors
    /// [Error::UnsupportedConfiguration] for any layout other than
    /// [SUPPORTED_SAMPLE_RATE] and [SUPPORTED_POINTS_PER_LINE], otherwise any error from
    /// the interpolator.
    pub fn expand(
        &self,
        interpolator: &dyn Interpolator,
        sample_rate: u32,
        points_per_line: u32,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        if sample_rate != SUPPORTED_SAMPLE_RATE || points_per_line != SUPPORTED_POINTS_PER_LINE {
            return Err(Error::UnsupportedConfiguration(format!(
                "lon/lat expansion not implemented for sample rate = {sample_rate} and earth views = {points_per_line}"
            )));
        }
        interpolator.interpolate(
            self.lons.view(),
            self.lats.view(),
            sample_rate,
            points_per_line,
        )
    }
}

/// Per-pixel geolocation of a swath, named by platform and time range.
#[derive(Debug, Clone, PartialEq)]
pub struct SwathArea {
    pub name: String,
    pub lons: Array2<f64>,
    pub lats: Array2<f64>,
}

impl SwathArea {
    /// Stack areas along scan-lines.
    ///
    /// # Errors
    /// [Error::Merge] if the areas have different numbers of columns.
    pub fn stack(name: &str, areas: &[&SwathArea]) -> Result<Self> {
        let lons: Vec<ArrayView2<f64>> = areas.iter().map(|a| a.lons.view()).collect();
        let lats: Vec<ArrayView2<f64>> = areas.iter().map(|a| a.lats.view()).collect();
        Ok(Self {
            name: name.to_string(),
            lons: concatenate(Axis(0), &lons).map_err(|e| Error::Merge(e.to_string()))?,
            lats: concatenate(Axis(0), &lats).map_err(|e| Error::Merge(e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3};

    struct Passthrough;

    impl Interpolator for Passthrough {
        fn interpolate(
            &self,
            lons: ArrayView2<f64>,
            lats: ArrayView2<f64>,
            _sample_rate: u32,
            _points_per_line: u32,
        ) -> Result<(Array2<f64>, Array2<f64>)> {
            Ok((lons.to_owned(), lats.to_owned()))
        }
    }

    fn tie_points() -> TiePoints {
        let first = arr2(&[[1.0, 2.0], [10.0, 20.0]]);
        let mut locations = Array3::zeros((2, 2, 2));
        locations[[0, 0, 0]] = 3.0;
        locations[[0, 0, 1]] = 4.0;
        locations[[0, 1, 0]] = 5.0;
        locations[[0, 1, 1]] = 6.0;
        let last = arr2(&[[7.0, 8.0], [70.0, 80.0]]);
        TiePoints::from_locations(first.view(), locations.view(), last.view()).unwrap()
    }

    #[test]
    fn from_locations() {
        let tp = tie_points();
        assert_eq!(tp.lats, arr2(&[[1.0, 3.0, 5.0, 7.0], [10.0, 0.0, 0.0, 70.0]]));
        assert_eq!(tp.lons, arr2(&[[2.0, 4.0, 6.0, 8.0], [20.0, 0.0, 0.0, 80.0]]));
    }

    #[test]
    fn expand_supported() {
        let tp = tie_points();
        let (lons, lats) = tp.expand(&Passthrough, 20, 2048).unwrap();
        assert_eq!(lons, tp.lons);
        assert_eq!(lats, tp.lats);
    }

    #[test]
    fn expand_unsupported() {
        let tp = tie_points();
        let err = tp.expand(&Passthrough, 40, 2048).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConfiguration(_)), "{err:?}");
    }

    #[test]
    fn stack_areas() {
        let a = SwathArea {
            name: "a".to_string(),
            lons: arr2(&[[1.0, 2.0]]),
            lats: arr2(&[[3.0, 4.0]]),
        };
        let b = SwathArea {
            name: "b".to_string(),
            lons: arr2(&[[5.0, 6.0]]),
            lats: arr2(&[[7.0, 8.0]]),
        };
        let area = SwathArea::stack("ab", &[&a, &b]).unwrap();
        assert_eq!(area.name, "ab");
        assert_eq!(area.lons, arr2(&[[1.0, 2.0], [5.0, 6.0]]));
        assert_eq!(area.lats, arr2(&[[3.0, 4.0], [7.0, 8.0]]));
    }
}
