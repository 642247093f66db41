//! Calibrated dataset arrays and their metadata.
use chrono::{DateTime, Utc};
use ndarray::{concatenate, Array2, ArrayView2, Axis};

use crate::catalog::DatasetId;
use crate::geolocation::SwathArea;
use crate::{Error, Result};

/// A calibrated dataset, one row per scan-line.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: DatasetId,
    pub data: Array2<f64>,
    /// `true` where `data` is invalid.
    pub mask: Array2<bool>,
    pub area: Option<SwathArea>,
    pub platform_name: Option<String>,
    pub sensor: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Product {
    /// A product with no data, for a dataset no file provided.
    #[must_use]
    pub fn empty(id: DatasetId) -> Self {
        Self {
            id,
            data: Array2::zeros((0, 0)),
            mask: Array2::from_elem((0, 0), false),
            area: None,
            platform_name: None,
            sensor: None,
            start_time: None,
            end_time: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Data with masked values replaced by NaN.
    #[must_use]
    pub fn masked(&self) -> Array2<f64> {
        let mut data = self.data.clone();
        data.zip_mut_with(&self.mask, |v, m| {
            if *m {
                *v = f64::NAN;
            }
        });
        data
    }

    /// Concatenate per-file products by scan-line in start time order.
    ///
    /// Areas are stacked only if every part has one, and the result is named for the
    /// overall time range.
    ///
    /// # Errors
    /// [Error::Merge] if the parts have different numbers of columns.
    pub fn merge(id: DatasetId, mut parts: Vec<Product>) -> Result<Self> {
        match parts.len() {
            0 => return Ok(Self::empty(id)),
            1 => {
                let mut product = parts.remove(0);
                product.id = id;
                return Ok(product);
            }
            _ => {}
        }
        parts.sort_by_key(|p| p.start_time);

        let data: Vec<ArrayView2<f64>> = parts.iter().map(|p| p.data.view()).collect();
        let mask: Vec<ArrayView2<bool>> = parts.iter().map(|p| p.mask.view()).collect();
        let data = concatenate(Axis(0), &data).map_err(|e| Error::Merge(format!("{id}: {e}")))?;
        let mask = concatenate(Axis(0), &mask).map_err(|e| Error::Merge(format!("{id}: {e}")))?;

        let start_time = parts.iter().filter_map(|p| p.start_time).min();
        let end_time = parts.iter().filter_map(|p| p.end_time).max();
        let platform_name = parts[0].platform_name.clone();

        let areas: Option<Vec<&SwathArea>> = parts.iter().map(|p| p.area.as_ref()).collect();
        let area = match areas {
            Some(areas) => {
                let name = area_name(platform_name.as_deref(), start_time, end_time);
                Some(SwathArea::stack(&name, &areas)?)
            }
            None => None,
        };

        Ok(Self {
            id,
            data,
            mask,
            area,
            platform_name,
            sensor: parts[0].sensor.clone(),
            start_time,
            end_time,
        })
    }
}

/// Area identity label, `<platform>_<start>_<end>`.
#[must_use]
pub fn area_name(
    platform_name: Option<&str>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> String {
    let fmt = |t: Option<DateTime<Utc>>| {
        t.map(|t| t.format("%Y%m%d%H%M%S").to_string())
            .unwrap_or_default()
    };
    format!(
        "{}_{}_{}",
        platform_name.unwrap_or_default(),
        fmt(start),
        fmt(end)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::arr2;

    fn product(hour: u32, rows: usize, cols: usize, value: f64) -> Product {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, hour, 0, 0).unwrap();
        Product {
            id: DatasetId::named("4"),
            data: Array2::from_elem((rows, cols), value),
            mask: Array2::from_elem((rows, cols), false),
            area: Some(SwathArea {
                name: format!("part{hour}"),
                lons: Array2::from_elem((rows, cols), value),
                lats: Array2::from_elem((rows, cols), -value),
            }),
            platform_name: Some("Metop-B".to_string()),
            sensor: Some("avhrr/3".to_string()),
            start_time: Some(start),
            end_time: Some(start + chrono::Duration::minutes(3)),
        }
    }

    #[test]
    fn merge_orders_by_start_time() {
        let merged =
            Product::merge(DatasetId::named("4"), vec![product(2, 1, 2, 2.0), product(1, 2, 2, 1.0)])
                .unwrap();

        assert_eq!(merged.data, arr2(&[[1.0, 1.0], [1.0, 1.0], [2.0, 2.0]]));
        assert_eq!(merged.mask.shape(), &[3, 2]);
        assert_eq!(
            merged.start_time,
            Some(Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap())
        );
        assert_eq!(
            merged.end_time,
            Some(Utc.with_ymd_and_hms(2023, 1, 1, 2, 3, 0).unwrap())
        );
        let area = merged.area.unwrap();
        assert_eq!(area.name, "Metop-B_20230101010000_20230101020300");
        assert_eq!(area.lats.column(0).to_vec(), vec![-1.0, -1.0, -2.0]);
    }

    #[test]
    fn merge_without_all_areas_drops_area() {
        let mut b = product(2, 1, 2, 2.0);
        b.area = None;
        let merged = Product::merge(DatasetId::named("4"), vec![product(1, 1, 2, 1.0), b]).unwrap();
        assert!(merged.area.is_none());
        assert_eq!(merged.data.nrows(), 2);
    }

    #[test]
    fn merge_column_mismatch() {
        let zult = Product::merge(
            DatasetId::named("4"),
            vec![product(1, 1, 2, 1.0), product(2, 1, 3, 1.0)],
        );
        assert!(matches!(zult, Err(Error::Merge(_))), "{zult:?}");
    }

    #[test]
    fn merge_nothing_is_empty() {
        let merged = Product::merge(DatasetId::named("4"), vec![]).unwrap();
        assert!(merged.is_empty());
        assert_eq!(merged.id, DatasetId::named("4"));
    }

    #[test]
    fn masked_values_are_nan() {
        let mut p = product(1, 1, 2, 1.0);
        p.mask[[0, 1]] = true;
        let masked = p.masked();
        assert_eq!(masked[[0, 0]], 1.0);
        assert!(masked[[0, 1]].is_nan());
    }
}
