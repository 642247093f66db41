//! Conversion of calibrated radiances to physical quantities.
use std::f64::consts::PI;
use std::fmt::Display;
use std::str::FromStr;

use ndarray::{Array, Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Dimension};
use serde::{Deserialize, Serialize};

use crate::Error;

/// First radiation constant, mW/(m2*sr*cm-4)
pub const C1: f64 = 1.191_062e-05;
/// Second radiation constant, K/cm-1
pub const C2: f64 = 1.438_786_3;

/// Bit of the per-scanline frame indicator set when the shared channel 3 is
/// operating as 3a (near-infrared) rather than 3b (thermal).
pub const CHANNEL_3A_BIT: u32 = 1 << 16;

/// Calibration levels, ordered from highest to lowest preference.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Calibration {
    BrightnessTemperature,
    Reflectance,
    Radiance,
    Counts,
}

impl Calibration {
    /// All levels in preference order.
    pub const PRIORITY: [Calibration; 4] = [
        Calibration::BrightnessTemperature,
        Calibration::Reflectance,
        Calibration::Radiance,
        Calibration::Counts,
    ];

    /// Position in [Calibration::PRIORITY]; lower is preferred.
    #[must_use]
    pub fn rank(&self) -> usize {
        *self as usize
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Calibration::BrightnessTemperature => "brightness_temperature",
            Calibration::Reflectance => "reflectance",
            Calibration::Radiance => "radiance",
            Calibration::Counts => "counts",
        }
    }
}

impl Display for Calibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Calibration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| Error::UnsupportedCalibration {
                dataset: String::new(),
                calibration: s.to_string(),
            })
    }
}

/// Convert radiance to reflectance in percent.
pub fn radiance_to_reflectance<S, D>(radiance: &ArrayBase<S, D>, solar_irradiance: f64) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    radiance.mapv(|r| r * PI * 100.0 / solar_irradiance)
}

/// Convert radiance to brightness temperature using the inverse Planck function with
/// the band correction coefficients `c1_const` and `c2_const`.
///
/// Radiances <= 0 produce non-finite values; callers are expected to mask them.
pub fn radiance_to_bt<S, D>(
    radiance: &ArrayBase<S, D>,
    wavenumber: f64,
    c1_const: f64,
    c2_const: f64,
) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let numerator = C2 * wavenumber;
    let cubed = C1 * wavenumber.powi(3);
    radiance.mapv(|r| c1_const + c2_const * numerator / (1.0 + cubed / r).ln())
}

/// Scan-line masks for the two halves of a switched channel, computed from a status
/// bitfield. `true` marks a scan-line where the channel is *not* active.
///
/// Returns `(mask_a, mask_b)` where `mask_a = (status & bit) != bit` and
/// `mask_b = (status & bit) != 0`.
#[must_use]
pub fn channel_switch_masks(status: ArrayView1<f64>, bit: u32) -> (Array1<bool>, Array1<bool>) {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bits = status.mapv(|s| (s as u32) & bit);
    (bits.mapv(|b| b != bit), bits.mapv(|b| b != 0))
}

/// Broadcast a per-scanline mask across `columns` detector positions.
#[must_use]
pub fn mask_scanlines(mask: ArrayView1<bool>, columns: usize) -> Array2<bool> {
    let mut out = Array2::from_elem((mask.len(), columns), false);
    for (mut row, masked) in out.axis_iter_mut(Axis(0)).zip(mask.iter()) {
        row.fill(*masked);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array1};
    use test_case::test_case;

    #[test]
    fn reflectance_zero_radiance() {
        let refl = radiance_to_reflectance(&arr1(&[0.0]), 139.873);
        assert_eq!(refl[0], 0.0);
    }

    #[test]
    fn reflectance_is_linear() {
        let s = 232.919;
        let a = radiance_to_reflectance(&arr1(&[10.0]), s)[0];
        let b = radiance_to_reflectance(&arr1(&[30.0]), s)[0];
        assert!((b - 3.0 * a).abs() < 1e-9, "a={a} b={b}");
        assert!((a - 10.0 * PI * 100.0 / s).abs() < 1e-9);
    }

    #[test]
    fn bt_is_monotonic() {
        // AVHRR/3 channel 4 like coefficients
        let radiance = Array1::linspace(1.0, 150.0, 500);
        let bt = radiance_to_bt(&radiance, 927.0, 0.3, 0.998);
        for pair in bt.windows(2) {
            assert!(pair[1] > pair[0], "{} !> {}", pair[1], pair[0]);
        }
        assert!(bt.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn bt_known_value() {
        let wavenumber: f64 = 927.0;
        // Planck radiance at 300K
        let radiance = C1 * wavenumber.powi(3) / ((C2 * wavenumber / 300.0).exp() - 1.0);
        let bt = radiance_to_bt(&arr1(&[radiance]), wavenumber, 0.0, 1.0);
        assert!((bt[0] - 300.0).abs() < 1e-6, "bt={}", bt[0]);
    }

    #[test]
    fn bt_non_positive_radiance_is_not_finite() {
        let bt = radiance_to_bt(&arr1(&[0.0, -1.0]), 927.0, 0.0, 1.0);
        assert!(!bt[0].is_finite() || bt[0] == 0.0);
        assert!(!bt[1].is_finite());
    }

    #[test]
    fn bt_preserves_shape() {
        let rad = arr2(&[[50.0, 60.0, 70.0], [80.0, 90.0, 100.0]]);
        let bt = radiance_to_bt(&rad, 837.0, 0.4, 0.998);
        assert_eq!(bt.shape(), &[2, 3]);
    }

    #[test]
    fn switch_masks() {
        let status = arr1(&[0.0, 65536.0, 65537.0, 1.0]);
        let (a, b) = channel_switch_masks(status.view(), CHANNEL_3A_BIT);

        assert_eq!(a.to_vec(), vec![true, false, false, true]);
        assert_eq!(b.to_vec(), vec![false, true, true, false]);
    }

    #[test]
    fn broadcast_mask() {
        let mask = mask_scanlines(arr1(&[true, false]).view(), 3);
        assert_eq!(mask, arr2(&[[true, true, true], [false, false, false]]));
    }

    #[test_case("brightness_temperature", Calibration::BrightnessTemperature)]
    #[test_case("reflectance", Calibration::Reflectance)]
    #[test_case("radiance", Calibration::Radiance)]
    #[test_case("counts", Calibration::Counts)]
    fn parse_calibration(s: &str, expected: Calibration) {
        assert_eq!(s.parse::<Calibration>().unwrap(), expected);
        assert_eq!(expected.to_string(), s);
    }

    #[test]
    fn unknown_calibration() {
        assert!(matches!(
            "albedo".parse::<Calibration>(),
            Err(Error::UnsupportedCalibration { .. })
        ));
    }

    #[test]
    fn priority_order() {
        assert!(Calibration::BrightnessTemperature.rank() < Calibration::Reflectance.rank());
        assert!(Calibration::Reflectance.rank() < Calibration::Radiance.rank());
        assert!(Calibration::Radiance.rank() < Calibration::Counts.rank());
    }
}
