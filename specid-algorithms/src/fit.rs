//! Generalized linear least-squares energy calibration fitting.
//!
//! Fits polynomial or full-range-fraction coefficients to
//! (channel, energy) constraints by solving the normal equations
//! `(A^T A) a = A^T b`. Parameter counts are small (at most five or six),
//! so a direct inverse is used; the inverse also gives the coefficient
//! uncertainties.

use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};
use specid_core::calibration::{
    correction_due_to_dev_pairs, deviation_pair_correction, CalibrationType, DeviationPair,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest number of coefficients the channel-energy fits accept.
pub const MAX_CHANNEL_ENERGY_COEFFICIENTS: usize = 5;

/// Fewest channel energies accepted by the channel-energy fits.
pub const MIN_CHANNEL_ENERGIES: usize = 6;

/// A fitted peak used as a calibration constraint.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecalPeak {
    /// Fitted peak mean (keV, under the current calibration).
    pub mean: f64,
    /// Uncertainty of the peak mean (keV).
    pub mean_uncertainty: f64,
    /// Channel number of the peak mean.
    pub mean_channel: f64,
    /// Energy the peak should be at (keV).
    pub photopeak_energy: f64,
}

impl RecalPeak {
    pub fn new(mean: f64, mean_uncertainty: f64, mean_channel: f64, photopeak_energy: f64) -> Self {
        Self {
            mean,
            mean_uncertainty,
            mean_channel,
            photopeak_energy,
        }
    }

    /// Uncertainty of the constraint in energy units.
    fn energy_uncertainty(&self) -> f64 {
        (self.photopeak_energy * self.mean_uncertainty / self.mean.max(1.0)).abs()
    }
}

/// Functional form being fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalibrationModel {
    Polynomial,
    FullRangeFraction,
}

impl CalibrationModel {
    /// Model matching a calibration type, if it is coefficient based.
    pub fn for_type(kind: CalibrationType) -> Option<Self> {
        match kind {
            CalibrationType::Polynomial => Some(Self::Polynomial),
            CalibrationType::FullRangeFraction => Some(Self::FullRangeFraction),
            CalibrationType::LowerChannelEdge => None,
        }
    }

    /// Value of basis function `order` at `channel`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    #[allow(clippy::cast_possible_wrap)]
    pub fn basis(self, order: usize, channel: f64, num_channels: usize) -> f64 {
        match self {
            Self::Polynomial => channel.powi(order as i32),
            Self::FullRangeFraction => {
                let x = channel / num_channels.max(1) as f64;
                if order == 4 {
                    1.0 / (1.0 + 60.0 * x)
                } else {
                    x.powi(order as i32)
                }
            }
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Polynomial => "polynomial",
            Self::FullRangeFraction => "full range fraction",
        }
    }
}

/// Output of a peak-based calibration fit.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationFit {
    /// All coefficients; fixed ones are copied from the input.
    pub coefficients: Vec<f64>,
    /// One-sigma uncertainties; zero for fixed coefficients.
    pub uncertainties: Vec<f64>,
    /// Chi-square of the fit, evaluated with deviation pairs applied.
    pub chi2: f64,
}

/// Output of a fit to an explicit channel-energy array.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelEnergyFit {
    pub coefficients: Vec<f64>,
    /// Mean absolute difference between the input and fitted energies (keV).
    pub mean_abs_error: f64,
}

/// Least-squares energy calibration fitter for one calibration model.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationFitter {
    model: CalibrationModel,
}

impl CalibrationFitter {
    /// Creates a fitter for the given model.
    pub fn new(model: CalibrationModel) -> Self {
        Self { model }
    }

    /// Polynomial fitter.
    pub fn polynomial() -> Self {
        Self::new(CalibrationModel::Polynomial)
    }

    /// Full-range-fraction fitter.
    pub fn full_range_fraction() -> Self {
        Self::new(CalibrationModel::FullRangeFraction)
    }

    /// The model this fitter uses.
    pub fn model(&self) -> CalibrationModel {
        self.model
    }

    /// Fits calibration coefficients to peak constraints.
    ///
    /// `fit_for[i]` marks coefficient `i` as free; fixed coefficients are
    /// taken from `coefficients` and subtracted from the target energies
    /// before solving. Deviation-pair corrections are removed from each
    /// target energy first.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if there are no peaks, no free
    ///   coefficients, more free coefficients than peaks, a fixed
    ///   coefficient without a supplied value, or a zero peak uncertainty.
    /// - [`Error::SingularMatrix`] if the normal equations cannot be solved.
    pub fn fit_peaks(
        &self,
        peaks: &[RecalPeak],
        fit_for: &[bool],
        num_channels: usize,
        deviation_pairs: &[DeviationPair],
        coefficients: &[f64],
    ) -> Result<CalibrationFit> {
        let npeaks = peaks.len();
        let free: Vec<usize> = (0..fit_for.len()).filter(|&i| fit_for[i]).collect();
        let nfree = free.len();

        if npeaks < 1 {
            return Err(Error::InvalidInput("must have at least one peak".to_string()));
        }
        if nfree < 1 {
            return Err(Error::InvalidInput(
                "must fit for at least one coefficient".to_string(),
            ));
        }
        if nfree > npeaks {
            return Err(Error::InvalidInput(format!(
                "must have at least as many peaks ({npeaks}) as coefficients fitting for ({nfree})"
            )));
        }
        if nfree != fit_for.len() && coefficients.len() < fit_for.len() {
            return Err(Error::InvalidInput(
                "an input coefficient must be supplied for every fixed coefficient".to_string(),
            ));
        }
        if self.model == CalibrationModel::FullRangeFraction && fit_for.len() > 5 {
            return Err(Error::InvalidInput(
                "full range fraction calibrations have at most 5 coefficients".to_string(),
            ));
        }

        let mut design = DMatrix::<f64>::zeros(npeaks, nfree);
        let mut target = DVector::<f64>::zeros(npeaks);
        let mut uncertainties = Vec::with_capacity(npeaks);

        for (row, peak) in peaks.iter().enumerate() {
            let uncert = peak.energy_uncertainty();
            if !(uncert > 0.0 && uncert.is_finite()) {
                return Err(Error::InvalidInput(format!(
                    "peak at {} keV has a non-positive uncertainty",
                    peak.photopeak_energy
                )));
            }
            uncertainties.push(uncert);

            let mut y = peak.photopeak_energy
                - correction_due_to_dev_pairs(peak.photopeak_energy, deviation_pairs);

            let mut col = 0;
            for (index, &is_free) in fit_for.iter().enumerate() {
                let basis = self.model.basis(index, peak.mean_channel, num_channels);
                if is_free {
                    design[(row, col)] = basis / uncert;
                    col += 1;
                } else {
                    y -= coefficients[index] * basis;
                }
            }
            target[row] = y / uncert;
        }

        let (solution, covariance) = solve_normal_equations(&design, &target)?;

        let mut fitted = vec![0.0; fit_for.len()];
        let mut fitted_uncert = vec![0.0; fit_for.len()];
        let mut col = 0;
        for (index, &is_free) in fit_for.iter().enumerate() {
            if is_free {
                fitted[index] = solution[col];
                fitted_uncert[index] = covariance[(col, col)].sqrt();
                col += 1;
            } else {
                fitted[index] = coefficients[index];
            }
        }

        let chi2 = peaks
            .iter()
            .zip(&uncertainties)
            .map(|(peak, uncert)| {
                let mut predicted: f64 = fitted
                    .iter()
                    .enumerate()
                    .map(|(i, c)| c * self.model.basis(i, peak.mean_channel, num_channels))
                    .sum();
                predicted += deviation_pair_correction(predicted, deviation_pairs);
                ((predicted - peak.photopeak_energy) / uncert).powi(2)
            })
            .sum();

        Ok(CalibrationFit {
            coefficients: fitted,
            uncertainties: fitted_uncert,
            chi2,
        })
    }

    /// Fits `ncoeffs` coefficients to an explicit array of channel edge
    /// energies; entry `i` is the energy of channel edge `i`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if fewer than two or more than five
    /// coefficients are requested (full-range-fraction accepts at most four),
    /// if there are fewer than six energies, or if they are not strictly
    /// increasing. Returns [`Error::SingularMatrix`] if the fit cannot be
    /// solved.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit_channel_energies(
        &self,
        ncoeffs: usize,
        channel_energies: &[f64],
    ) -> Result<ChannelEnergyFit> {
        if ncoeffs < 2 {
            return Err(Error::InvalidInput(
                "must request at least two coefficients".to_string(),
            ));
        }
        if ncoeffs > MAX_CHANNEL_ENERGY_COEFFICIENTS {
            return Err(Error::InvalidInput(format!(
                "must request at most {MAX_CHANNEL_ENERGY_COEFFICIENTS} coefficients"
            )));
        }
        if self.model == CalibrationModel::FullRangeFraction && ncoeffs >= 5 {
            return Err(Error::InvalidInput(
                "full range fraction fits from channel energies need fewer than 5 coefficients"
                    .to_string(),
            ));
        }

        let nenergies = channel_energies.len();
        if nenergies < MIN_CHANNEL_ENERGIES {
            return Err(Error::InvalidInput(format!(
                "need at least {MIN_CHANNEL_ENERGIES} channel energies, got {nenergies}"
            )));
        }
        if channel_energies.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::InvalidInput(
                "channel energies must be strictly increasing".to_string(),
            ));
        }

        let num_channels = nenergies - 1;
        let design = DMatrix::from_fn(nenergies, ncoeffs, |row, col| {
            self.model.basis(col, row as f64, num_channels)
        });
        let target = DVector::from_column_slice(channel_energies);

        let (coefficients, _) = solve_normal_equations(&design, &target)?;

        let total: f64 = channel_energies
            .iter()
            .enumerate()
            .map(|(row, &energy)| {
                let predicted: f64 = coefficients
                    .iter()
                    .enumerate()
                    .map(|(col, c)| c * self.model.basis(col, row as f64, num_channels))
                    .sum();
                (predicted - energy).abs()
            })
            .sum();

        Ok(ChannelEnergyFit {
            coefficients,
            mean_abs_error: total / nenergies as f64,
        })
    }

    /// Unweighted fit of `nterms` coefficients to (channel, energy) pairs.
    ///
    /// Full-range-fraction fits are limited to five terms.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if `nterms` is zero or exceeds the
    /// number of pairs, and [`Error::SingularMatrix`] if the fit cannot be
    /// solved.
    pub fn fit_channel_energy_pairs(
        &self,
        pairs: &[(f64, f64)],
        num_channels: usize,
        nterms: usize,
    ) -> Result<Vec<f64>> {
        let nterms = match self.model {
            CalibrationModel::Polynomial => nterms,
            CalibrationModel::FullRangeFraction => nterms.min(5),
        };
        if nterms == 0 || nterms > pairs.len() {
            return Err(Error::InvalidInput(format!(
                "cannot fit {nterms} {} terms to {} points",
                self.model.name(),
                pairs.len()
            )));
        }

        let design = DMatrix::from_fn(pairs.len(), nterms, |row, col| {
            self.model.basis(col, pairs[row].0, num_channels)
        });
        let target = DVector::from_iterator(pairs.len(), pairs.iter().map(|&(_, energy)| energy));

        let (coefficients, _) = solve_normal_equations(&design, &target)?;
        Ok(coefficients)
    }
}

/// Solves `design * a ~= target` in the least-squares sense.
///
/// Returns the solution and the covariance matrix `(A^T A)^-1`.
fn solve_normal_equations(
    design: &DMatrix<f64>,
    target: &DVector<f64>,
) -> Result<(Vec<f64>, DMatrix<f64>)> {
    let design_t = design.transpose();
    let alpha = &design_t * design;
    let (rows, cols) = alpha.shape();
    let covariance = alpha
        .try_inverse()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
        .ok_or_else(|| {
            Error::SingularMatrix(format!("could not invert {rows}x{cols} least squares matrix"))
        })?;
    let beta = design_t * target;
    let solution = &covariance * beta;
    Ok((solution.iter().copied().collect(), covariance))
}
