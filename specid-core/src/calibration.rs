//! Energy calibration types.
//!
//! An [`EnergyCalibration`] maps fractional channel numbers to energies (keV).
//! Calibrations are immutable once built and are shared between spectra as
//! `Arc<EnergyCalibration>`. Two spectra use "the same" calibration only when
//! they hold the same `Arc` (see [`same_calibration`]); equal coefficients in
//! distinct instances still count as different calibrations.

use crate::{Error, Result};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default accuracy (in channels) for [`EnergyCalibration::channel_for_energy`].
pub const CHANNEL_SEARCH_ACCURACY: f64 = 1e-5;

/// Maximum number of bisection steps used when inverting a calibration.
const MAX_SEARCH_ITERATIONS: usize = 200;

/// Parameterization of an energy calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalibrationType {
    /// `E = sum(c_i * ch^i)`.
    Polynomial,
    /// `E = c0 + c1*x + c2*x^2 + c3*x^3 + c4/(1 + 60*x)` with `x = ch/N`.
    FullRangeFraction,
    /// Explicit lower energy of every channel.
    LowerChannelEdge,
}

/// A non-linear energy correction: at `energy`, add `offset` keV.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviationPair {
    pub energy: f64,
    pub offset: f64,
}

impl DeviationPair {
    pub fn new(energy: f64, offset: f64) -> Self {
        Self { energy, offset }
    }
}

/// Immutable energy calibration for a spectrum with a fixed channel count.
///
/// Deserialized calibrations are rebuilt through the validating constructors.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "SerializedCalibration")
)]
pub struct EnergyCalibration {
    kind: CalibrationType,
    num_channels: usize,
    coefficients: Vec<f64>,
    deviation_pairs: Vec<DeviationPair>,
    /// Lower edge of every channel plus the upper edge of the last one.
    channel_energies: Vec<f64>,
}

/// Wire form of [`EnergyCalibration`].
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct SerializedCalibration {
    kind: CalibrationType,
    num_channels: usize,
    #[serde(default)]
    coefficients: Vec<f64>,
    #[serde(default)]
    deviation_pairs: Vec<DeviationPair>,
    #[serde(default)]
    channel_energies: Vec<f64>,
}

#[cfg(feature = "serde")]
impl TryFrom<SerializedCalibration> for EnergyCalibration {
    type Error = Error;

    fn try_from(raw: SerializedCalibration) -> Result<Self> {
        match raw.kind {
            CalibrationType::Polynomial => {
                Self::polynomial(raw.num_channels, raw.coefficients, raw.deviation_pairs)
            }
            CalibrationType::FullRangeFraction => {
                Self::full_range_fraction(raw.num_channels, raw.coefficients, raw.deviation_pairs)
            }
            CalibrationType::LowerChannelEdge => {
                Self::lower_channel_edge(raw.num_channels, raw.channel_energies)
            }
        }
    }
}

impl EnergyCalibration {
    /// Creates a polynomial calibration.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCalibration`] if there are no channels, no
    /// coefficients, non-finite values, or the resulting channel energies are
    /// not strictly increasing.
    pub fn polynomial(
        num_channels: usize,
        coefficients: Vec<f64>,
        deviation_pairs: Vec<DeviationPair>,
    ) -> Result<Self> {
        Self::from_coefficients(
            CalibrationType::Polynomial,
            num_channels,
            coefficients,
            deviation_pairs,
        )
    }

    /// Creates a full-range-fraction calibration (at most five coefficients).
    ///
    /// # Errors
    /// Same conditions as [`EnergyCalibration::polynomial`], plus more than
    /// five coefficients.
    pub fn full_range_fraction(
        num_channels: usize,
        coefficients: Vec<f64>,
        deviation_pairs: Vec<DeviationPair>,
    ) -> Result<Self> {
        if coefficients.len() > 5 {
            return Err(Error::InvalidCalibration(format!(
                "full range fraction supports at most 5 coefficients, got {}",
                coefficients.len()
            )));
        }
        Self::from_coefficients(
            CalibrationType::FullRangeFraction,
            num_channels,
            coefficients,
            deviation_pairs,
        )
    }

    /// Creates a calibration from explicit channel lower-edge energies.
    ///
    /// `energies` may hold `num_channels` entries (the upper edge of the last
    /// channel is then extrapolated from the last channel width) or
    /// `num_channels + 1` entries.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCalibration`] for fewer than two channels, a
    /// wrong number of energies, or energies that are not strictly increasing.
    pub fn lower_channel_edge(num_channels: usize, mut energies: Vec<f64>) -> Result<Self> {
        if num_channels < 2 {
            return Err(Error::InvalidCalibration(
                "lower channel edge calibration needs at least 2 channels".to_string(),
            ));
        }
        if energies.len() == num_channels {
            let last = energies[num_channels - 1];
            let width = last - energies[num_channels - 2];
            energies.push(last + width);
        }
        if energies.len() != num_channels + 1 {
            return Err(Error::InvalidCalibration(format!(
                "expected {} or {} channel energies, got {}",
                num_channels,
                num_channels + 1,
                energies.len()
            )));
        }
        check_increasing(&energies)?;

        Ok(Self {
            kind: CalibrationType::LowerChannelEdge,
            num_channels,
            coefficients: Vec::new(),
            deviation_pairs: Vec::new(),
            channel_energies: energies,
        })
    }

    fn from_coefficients(
        kind: CalibrationType,
        num_channels: usize,
        coefficients: Vec<f64>,
        mut deviation_pairs: Vec<DeviationPair>,
    ) -> Result<Self> {
        if num_channels == 0 {
            return Err(Error::InvalidCalibration("zero channels".to_string()));
        }
        if coefficients.is_empty() {
            return Err(Error::InvalidCalibration("no coefficients".to_string()));
        }
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(Error::InvalidCalibration(
                "non-finite calibration coefficient".to_string(),
            ));
        }
        if deviation_pairs
            .iter()
            .any(|dp| !dp.energy.is_finite() || !dp.offset.is_finite())
        {
            return Err(Error::InvalidCalibration(
                "non-finite deviation pair".to_string(),
            ));
        }
        deviation_pairs.sort_by(|a, b| a.energy.total_cmp(&b.energy));

        let mut cal = Self {
            kind,
            num_channels,
            coefficients,
            deviation_pairs,
            channel_energies: Vec::new(),
        };

        #[allow(clippy::cast_precision_loss)]
        let energies: Vec<f64> = (0..=num_channels)
            .map(|ch| cal.energy_for_channel(ch as f64))
            .collect();
        check_increasing(&energies)?;
        cal.channel_energies = energies;

        Ok(cal)
    }

    /// Returns the calibration type.
    pub fn kind(&self) -> CalibrationType {
        self.kind
    }

    /// Returns the number of channels this calibration describes.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Returns the coefficients (empty for lower-channel-edge calibrations).
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Returns the deviation pairs, sorted by energy.
    pub fn deviation_pairs(&self) -> &[DeviationPair] {
        &self.deviation_pairs
    }

    /// Returns `num_channels + 1` channel edge energies.
    pub fn channel_energies(&self) -> &[f64] {
        &self.channel_energies
    }

    /// Energy of the lower edge of channel 0.
    pub fn lower_energy(&self) -> f64 {
        self.channel_energies.first().copied().unwrap_or(0.0)
    }

    /// Energy of the upper edge of the last channel.
    pub fn upper_energy(&self) -> f64 {
        self.channel_energies.last().copied().unwrap_or(0.0)
    }

    /// Returns true for polynomial and full-range-fraction calibrations.
    pub fn is_coefficient_based(&self) -> bool {
        matches!(
            self.kind,
            CalibrationType::Polynomial | CalibrationType::FullRangeFraction
        )
    }

    /// Energy at a (fractional) channel number.
    pub fn energy_for_channel(&self, channel: f64) -> f64 {
        match self.kind {
            CalibrationType::Polynomial => {
                let base = polynomial_energy(channel, &self.coefficients);
                base + deviation_pair_correction(base, &self.deviation_pairs)
            }
            CalibrationType::FullRangeFraction => {
                let base =
                    full_range_fraction_energy(channel, &self.coefficients, self.num_channels);
                base + deviation_pair_correction(base, &self.deviation_pairs)
            }
            CalibrationType::LowerChannelEdge => lower_edge_energy(channel, &self.channel_energies),
        }
    }

    /// Fractional channel number at which the calibration gives `energy`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if `energy` is not finite or cannot be
    /// bracketed.
    pub fn channel_for_energy(&self, energy: f64) -> Result<f64> {
        self.channel_for_energy_with_accuracy(energy, CHANNEL_SEARCH_ACCURACY)
    }

    /// Like [`EnergyCalibration::channel_for_energy`] with an explicit
    /// accuracy in channels.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if `energy` is not finite or cannot be
    /// bracketed.
    #[allow(clippy::cast_precision_loss)]
    pub fn channel_for_energy_with_accuracy(&self, energy: f64, accuracy: f64) -> Result<f64> {
        if !energy.is_finite() {
            return Err(Error::InvalidInput(format!(
                "cannot find channel for energy {energy}"
            )));
        }

        let span = self.num_channels.max(1) as f64;
        let mut low = 0.0;
        let mut high = span;

        let mut expansions = 0;
        while self.energy_for_channel(low) > energy {
            low -= span;
            expansions += 1;
            if expansions > 64 {
                return Err(Error::InvalidInput(format!(
                    "energy {energy} keV is below the calibrated range"
                )));
            }
        }
        expansions = 0;
        while self.energy_for_channel(high) < energy {
            high += span;
            expansions += 1;
            if expansions > 64 {
                return Err(Error::InvalidInput(format!(
                    "energy {energy} keV is above the calibrated range"
                )));
            }
        }

        let accuracy = accuracy.max(f64::EPSILON);
        for _ in 0..MAX_SEARCH_ITERATIONS {
            if (high - low) <= accuracy {
                break;
            }
            let mid = 0.5 * (low + high);
            if self.energy_for_channel(mid) < energy {
                low = mid;
            } else {
                high = mid;
            }
        }

        Ok(0.5 * (low + high))
    }
}

/// Returns true if both handles refer to the same calibration instance.
pub fn same_calibration(a: &Arc<EnergyCalibration>, b: &Arc<EnergyCalibration>) -> bool {
    Arc::ptr_eq(a, b)
}

/// Polynomial energy without deviation pairs.
pub fn polynomial_energy(channel: f64, coefficients: &[f64]) -> f64 {
    coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, &c| acc * channel + c)
}

/// Full-range-fraction energy without deviation pairs.
#[allow(clippy::cast_precision_loss)]
pub fn full_range_fraction_energy(channel: f64, coefficients: &[f64], num_channels: usize) -> f64 {
    let x = channel / num_channels.max(1) as f64;
    let mut energy = 0.0;
    let mut power = 1.0;
    for (i, &c) in coefficients.iter().enumerate().take(5) {
        if i == 4 {
            energy += c / (1.0 + 60.0 * x);
        } else {
            energy += c * power;
            power *= x;
        }
    }
    energy
}

/// Converts full-range-fraction coefficients into polynomial coefficients.
///
/// The low-energy `1/(1+60x)` term has no polynomial equivalent and is
/// dropped.
#[allow(clippy::cast_precision_loss)]
pub fn full_range_fraction_to_polynomial(coefficients: &[f64], num_channels: usize) -> Vec<f64> {
    let n = num_channels.max(1) as f64;
    let mut scale = 1.0;
    coefficients
        .iter()
        .take(4)
        .map(|&c| {
            let value = c / scale;
            scale *= n;
            value
        })
        .collect()
}

/// Offset to add to a base (no deviation pair) energy.
///
/// Offsets are linearly interpolated between pairs and held constant
/// outside the tabulated range.
pub fn deviation_pair_correction(energy: f64, pairs: &[DeviationPair]) -> f64 {
    match pairs {
        [] => 0.0,
        [only] => only.offset,
        _ => {
            let first = pairs[0];
            let last = pairs[pairs.len() - 1];
            if energy <= first.energy {
                return first.offset;
            }
            if energy >= last.energy {
                return last.offset;
            }
            let upper = pairs.partition_point(|dp| dp.energy <= energy);
            let (a, b) = (pairs[upper - 1], pairs[upper]);
            let width = b.energy - a.energy;
            if width <= 0.0 {
                return a.offset;
            }
            a.offset + (b.offset - a.offset) * (energy - a.energy) / width
        }
    }
}

/// Amount to subtract from a true energy to get the base calibration energy.
///
/// Inverse of [`deviation_pair_correction`]: if
/// `base + deviation_pair_correction(base) == energy` then this returns
/// `energy - base`.
pub fn correction_due_to_dev_pairs(energy: f64, pairs: &[DeviationPair]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }

    let max_offset = pairs.iter().map(|dp| dp.offset.abs()).fold(0.0, f64::max);
    let mut low = energy - max_offset - 1.0;
    let mut high = energy + max_offset + 1.0;
    for _ in 0..MAX_SEARCH_ITERATIONS {
        let mid = 0.5 * (low + high);
        if mid + deviation_pair_correction(mid, pairs) < energy {
            low = mid;
        } else {
            high = mid;
        }
        if (high - low) < 1e-9 {
            break;
        }
    }
    energy - 0.5 * (low + high)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
fn lower_edge_energy(channel: f64, edges: &[f64]) -> f64 {
    let nedges = edges.len();
    if nedges < 2 {
        return edges.first().copied().unwrap_or(0.0);
    }
    let last_index = (nedges - 2) as f64;
    let index = if channel <= 0.0 {
        0
    } else if channel >= last_index {
        nedges - 2
    } else {
        channel.floor() as usize
    };
    let frac = channel - index as f64;
    edges[index] + frac * (edges[index + 1] - edges[index])
}

fn check_increasing(energies: &[f64]) -> Result<()> {
    if energies.iter().any(|e| !e.is_finite()) {
        return Err(Error::InvalidCalibration(
            "non-finite channel energy".to_string(),
        ));
    }
    if let Some(pos) = energies.windows(2).position(|w| w[1] <= w[0]) {
        return Err(Error::InvalidCalibration(format!(
            "channel energies are not increasing at channel {}",
            pos + 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_polynomial_energies() {
        let cal = EnergyCalibration::polynomial(1024, vec![0.0, 3.0], vec![]).unwrap();
        assert_eq!(cal.channel_energies().len(), 1025);
        assert_abs_diff_eq!(cal.energy_for_channel(100.0), 300.0);
        assert_abs_diff_eq!(cal.upper_energy(), 3072.0);
        assert_abs_diff_eq!(cal.lower_energy(), 0.0);
    }

    #[test]
    fn test_full_range_fraction_energy() {
        let cal =
            EnergyCalibration::full_range_fraction(1000, vec![10.0, 3000.0, 0.0, 0.0, 5.0], vec![])
                .unwrap();
        let expected = 10.0 + 3000.0 * 0.5 + 5.0 / (1.0 + 30.0);
        assert_abs_diff_eq!(cal.energy_for_channel(500.0), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_channel_for_energy_inverts() {
        let cal = EnergyCalibration::polynomial(2048, vec![-2.0, 1.45, 1.0e-5], vec![]).unwrap();
        let energy = cal.energy_for_channel(731.25);
        let channel = cal.channel_for_energy(energy).unwrap();
        assert_abs_diff_eq!(channel, 731.25, epsilon = 1e-4);
    }

    #[test]
    fn test_channel_for_energy_outside_range() {
        let cal = EnergyCalibration::polynomial(100, vec![0.0, 1.0], vec![]).unwrap();
        assert_abs_diff_eq!(cal.channel_for_energy(250.0).unwrap(), 250.0, epsilon = 1e-4);
        assert!(cal.channel_for_energy(f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_decreasing() {
        let err = EnergyCalibration::polynomial(64, vec![100.0, -1.0], vec![]);
        assert!(matches!(err, Err(Error::InvalidCalibration(_))));

        let err = EnergyCalibration::lower_channel_edge(3, vec![0.0, 2.0, 1.0, 3.0]);
        assert!(matches!(err, Err(Error::InvalidCalibration(_))));
    }

    #[test]
    fn test_lower_channel_edge_extrapolates_last_edge() {
        let cal = EnergyCalibration::lower_channel_edge(4, vec![0.0, 1.0, 3.0, 6.0]).unwrap();
        assert_eq!(cal.channel_energies(), &[0.0, 1.0, 3.0, 6.0, 9.0]);
        assert_abs_diff_eq!(cal.energy_for_channel(1.5), 2.0);
        assert_abs_diff_eq!(cal.channel_for_energy(4.5).unwrap(), 2.5, epsilon = 1e-4);
    }

    #[test]
    fn test_deviation_pairs_round_trip() {
        let pairs = vec![
            DeviationPair::new(0.0, 0.0),
            DeviationPair::new(662.0, -5.0),
            DeviationPair::new(2614.0, 10.0),
        ];
        for base in [100.0, 661.0, 1460.0, 3000.0] {
            let true_energy = base + deviation_pair_correction(base, &pairs);
            let removed = correction_due_to_dev_pairs(true_energy, &pairs);
            assert_abs_diff_eq!(true_energy - removed, base, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_full_range_fraction_to_polynomial() {
        let frf = [5.0, 3000.0, 200.0];
        let poly = full_range_fraction_to_polynomial(&frf, 1000);
        for ch in [0.0, 250.0, 999.0] {
            assert_abs_diff_eq!(
                polynomial_energy(ch, &poly),
                full_range_fraction_energy(ch, &frf, 1000),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_same_calibration_is_identity() {
        let a = Arc::new(EnergyCalibration::polynomial(64, vec![0.0, 1.0], vec![]).unwrap());
        let b = Arc::new(EnergyCalibration::polynomial(64, vec![0.0, 1.0], vec![]).unwrap());
        assert!(same_calibration(&a, &a.clone()));
        assert!(!same_calibration(&a, &b));
    }
}

#[cfg(all(test, feature = "serde"))]
mod serde_tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_deserialize_recomputes_channel_energies() {
        let json = r#"{
            "kind": "Polynomial",
            "num_channels": 4,
            "coefficients": [0.0, 2.0],
            "deviation_pairs": [],
            "channel_energies": [9.0, 8.0, 7.0, 6.0, 5.0]
        }"#;
        let cal: EnergyCalibration = serde_json::from_str(json).unwrap();
        assert_eq!(cal.channel_energies().len(), 5);
        assert_abs_diff_eq!(cal.channel_energies()[4], 8.0);
    }

    #[test]
    fn test_deserialize_rejects_invalid_calibration() {
        let decreasing = r#"{"kind": "Polynomial", "num_channels": 16, "coefficients": [100.0, -1.0]}"#;
        assert!(serde_json::from_str::<EnergyCalibration>(decreasing).is_err());

        let no_channels = r#"{"kind": "FullRangeFraction", "num_channels": 0, "coefficients": [0.0, 300.0]}"#;
        assert!(serde_json::from_str::<EnergyCalibration>(no_channels).is_err());

        let short_edges = r#"{"kind": "LowerChannelEdge", "num_channels": 4, "channel_energies": [0.0, 1.0]}"#;
        assert!(serde_json::from_str::<EnergyCalibration>(short_edges).is_err());
    }

    #[test]
    fn test_serialized_calibration_reloads() {
        let cal = EnergyCalibration::lower_channel_edge(3, vec![0.0, 10.0, 25.0, 45.0]).unwrap();
        let json = serde_json::to_string(&cal).unwrap();
        let reloaded: EnergyCalibration = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.kind(), CalibrationType::LowerChannelEdge);
        assert_eq!(reloaded.channel_energies(), cal.channel_energies());
    }
}
