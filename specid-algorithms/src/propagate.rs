//! Propagation of an energy calibration change to other detectors.
//!
//! When one detector's calibration changes from `original` to `updated`,
//! every other detector should move so that channels that lined up in
//! energy before the change still line up afterwards.

use crate::fit::{CalibrationFitter, CalibrationModel};
use crate::{Error, Result};
use specid_core::calibration::{
    full_range_fraction_energy, polynomial_energy, same_calibration, CalibrationType,
    EnergyCalibration, CHANNEL_SEARCH_ACCURACY,
};
use std::sync::Arc;

/// Computes the new calibration of a second detector after the first
/// detector's calibration changed.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationPropagator {
    accuracy: f64,
}

impl Default for CalibrationPropagator {
    fn default() -> Self {
        Self {
            accuracy: CHANNEL_SEARCH_ACCURACY,
        }
    }
}

impl CalibrationPropagator {
    /// Creates a propagator with the default channel-search accuracy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the accuracy (in channels) of the energy-to-channel search.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Returns `other` adjusted for the change from `original` to `updated`.
    ///
    /// If `original` and `updated` are the same instance, `other` itself is
    /// returned (the same `Arc`).
    ///
    /// Channel/energy conversions for coefficient-based calibrations ignore
    /// deviation pairs; the result keeps `other`'s deviation pairs.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCalibration`] if `original` or `updated` is a
    /// lower-channel-edge calibration or has fewer than two coefficients,
    /// [`Error::CoreError`] if a channel cannot be found for a sampled
    /// energy, and fit errors from the refit of `other`.
    pub fn propagate(
        &self,
        original: &Arc<EnergyCalibration>,
        updated: &Arc<EnergyCalibration>,
        other: &Arc<EnergyCalibration>,
    ) -> Result<Arc<EnergyCalibration>> {
        if !original.is_coefficient_based() || !updated.is_coefficient_based() {
            return Err(invalid(
                "only polynomial or full range fraction calibrations can be propagated",
            ));
        }

        if same_calibration(original, updated) {
            return Ok(Arc::clone(other));
        }

        if other.kind() == CalibrationType::LowerChannelEdge {
            return self.propagate_lower_edges(original, updated, other);
        }

        let order = other
            .coefficients()
            .len()
            .max(original.coefficients().len())
            .max(updated.coefficients().len());
        if order < 2 {
            return Err(invalid("need at least two coefficients to propagate"));
        }

        let orig_channels = original.num_channels();
        let mut pairs = Vec::with_capacity(order);
        for i in 0..order {
            #[allow(clippy::cast_precision_loss)]
            let channel = (((order - i - 1) * orig_channels) / (order - 1)) as f64;
            let old_energy = base_energy(original, channel);
            let new_energy = base_energy(updated, channel);
            let other_channel = self.base_channel(other, old_energy)?;
            pairs.push((other_channel, new_energy));
        }

        let model = CalibrationModel::for_type(other.kind())
            .ok_or_else(|| invalid("other calibration is not coefficient based"))?;
        let coefficients = CalibrationFitter::new(model).fit_channel_energy_pairs(
            &pairs,
            other.num_channels(),
            order,
        )?;

        let dev_pairs = other.deviation_pairs().to_vec();
        let cal = match model {
            CalibrationModel::Polynomial => {
                EnergyCalibration::polynomial(other.num_channels(), coefficients, dev_pairs)
            }
            CalibrationModel::FullRangeFraction => {
                EnergyCalibration::full_range_fraction(other.num_channels(), coefficients, dev_pairs)
            }
        }
        .map_err(|e| Error::CalibrationFitFailure(format!("propagated calibration invalid: {e}")))?;

        Ok(Arc::new(cal))
    }

    fn propagate_lower_edges(
        &self,
        original: &EnergyCalibration,
        updated: &EnergyCalibration,
        other: &EnergyCalibration,
    ) -> Result<Arc<EnergyCalibration>> {
        let edges = other
            .channel_energies()
            .iter()
            .map(|&energy| {
                let channel = original.channel_for_energy_with_accuracy(energy, self.accuracy)?;
                Ok(updated.energy_for_channel(channel))
            })
            .collect::<Result<Vec<f64>>>()?;

        let cal = EnergyCalibration::lower_channel_edge(other.num_channels(), edges)?;
        Ok(Arc::new(cal))
    }

    /// Channel of `other` at `energy`, ignoring deviation pairs.
    fn base_channel(&self, other: &EnergyCalibration, energy: f64) -> Result<f64> {
        if other.deviation_pairs().is_empty() {
            return Ok(other.channel_for_energy_with_accuracy(energy, self.accuracy)?);
        }
        let stripped = match other.kind() {
            CalibrationType::Polynomial => EnergyCalibration::polynomial(
                other.num_channels(),
                other.coefficients().to_vec(),
                Vec::new(),
            ),
            CalibrationType::FullRangeFraction => EnergyCalibration::full_range_fraction(
                other.num_channels(),
                other.coefficients().to_vec(),
                Vec::new(),
            ),
            CalibrationType::LowerChannelEdge => {
                return Err(invalid("lower channel edge has no base calibration"));
            }
        }?;
        Ok(stripped.channel_for_energy_with_accuracy(energy, self.accuracy)?)
    }
}

fn base_energy(cal: &EnergyCalibration, channel: f64) -> f64 {
    match cal.kind() {
        CalibrationType::FullRangeFraction => {
            full_range_fraction_energy(channel, cal.coefficients(), cal.num_channels())
        }
        _ => polynomial_energy(channel, cal.coefficients()),
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidCalibration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use specid_core::calibration::DeviationPair;

    fn poly(n: usize, coefs: Vec<f64>) -> Arc<EnergyCalibration> {
        Arc::new(EnergyCalibration::polynomial(n, coefs, vec![]).unwrap())
    }

    #[test]
    fn test_identity_returns_other() {
        let orig = poly(1024, vec![0.0, 3.0]);
        let other = poly(512, vec![1.0, 6.0]);
        let out = CalibrationPropagator::new()
            .propagate(&orig, &Arc::clone(&orig), &other)
            .unwrap();
        assert!(Arc::ptr_eq(&out, &other));
    }

    #[test]
    fn test_rejects_lower_edge_inputs() {
        let edges: Vec<f64> = (0..=64).map(f64::from).collect();
        let lce = Arc::new(EnergyCalibration::lower_channel_edge(64, edges).unwrap());
        let p = poly(64, vec![0.0, 1.0]);
        let prop = CalibrationPropagator::new();
        assert!(prop.propagate(&lce, &p, &p).is_err());
        assert!(prop.propagate(&p, &lce, &p).is_err());
    }

    #[test]
    fn test_gain_change_carries_over() {
        // Detector B is offset by 10 keV; doubling A's gain doubles the energy
        // of every channel that matched between the two.
        let orig = poly(1024, vec![0.0, 1.0]);
        let updated = poly(1024, vec![0.0, 2.0]);
        let other = poly(1024, vec![10.0, 1.0]);

        let out = CalibrationPropagator::new()
            .propagate(&orig, &updated, &other)
            .unwrap();
        assert_eq!(out.kind(), CalibrationType::Polynomial);
        for ch in [0.0, 100.0, 990.0] {
            let old_energy = other.energy_for_channel(ch);
            let orig_channel = orig.channel_for_energy(old_energy).unwrap();
            assert_abs_diff_eq!(
                out.energy_for_channel(ch),
                updated.energy_for_channel(orig_channel),
                epsilon = 1e-3
            );
        }
    }

    #[test]
    fn test_lower_edge_other_is_mapped() {
        let orig = poly(16, vec![0.0, 1.0]);
        let updated = poly(16, vec![0.0, 1.5]);
        let edges: Vec<f64> = (0..=16).map(|i| f64::from(i) * 2.0).collect();
        let other = Arc::new(EnergyCalibration::lower_channel_edge(16, edges).unwrap());

        let out = CalibrationPropagator::new()
            .propagate(&orig, &updated, &other)
            .unwrap();
        assert_eq!(out.kind(), CalibrationType::LowerChannelEdge);
        for (i, &e) in out.channel_energies().iter().enumerate() {
            assert_abs_diff_eq!(e, f64::from(u32::try_from(i).unwrap()) * 3.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_keeps_other_deviation_pairs() {
        let orig = poly(1024, vec![0.0, 1.0]);
        let updated = poly(1024, vec![0.0, 1.1]);
        let pairs = vec![DeviationPair::new(0.0, 0.0), DeviationPair::new(1000.0, 5.0)];
        let other = Arc::new(EnergyCalibration::polynomial(1024, vec![0.0, 1.0], pairs.clone()).unwrap());

        let out = CalibrationPropagator::new()
            .propagate(&orig, &updated, &other)
            .unwrap();
        assert_eq!(out.deviation_pairs(), pairs.as_slice());
        assert_abs_diff_eq!(out.coefficients()[1], 1.1, epsilon = 1e-6);
    }
}
