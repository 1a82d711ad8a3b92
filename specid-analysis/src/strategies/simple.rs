//! Single foreground against an optional background.

use super::{analysis_failure, isotope_results, take_results, Analyzer};
use crate::request::AnalysisRequest;
use crate::result::AnalysisResult;
use crate::{Error, Result};
use log::{debug, info, warn};
use specid_algorithms::{CalibrationFitter, CalibrationModel, CalibrationPropagator, RecalPeak};
use specid_core::{same_calibration, EnergyCalibration, Measurement, SourceType, SpectrumSet};
use specid_engine::codes::k40_fail_reason;
use specid_engine::{
    parse_isotope_confidences, EngineConfig, IdentificationEngine, K40Input, StaticInput,
};
use std::sync::Arc;

/// Energy of the K-40 photopeak (keV).
pub(crate) const K40_ENERGY: f64 = 1460.75;

const MIN_CHANNELS: usize = 32;
const MAX_CHANNELS: usize = 65536;

pub(crate) const SYNTHESIZED_BACKGROUND_WARNING: &str = "The background is being synthesized; \
this yields non-optimal results, and also prevents the energy calibration check.  \
It is recommended to upload a representative background.";

const K40_SKIPPED_BY_ENGINE: &str = "Energy calibration check was skipped.  You may want to \
manually make sure energy calibration is about correct (ex, the K40 peak is around 1460 keV).";

const K40_CONDITIONS_NOT_MET: &str =
    "Skipped checking energy calibration - you may want to manually check the K40 peak is near 1460 keV.";

const RECALIBRATION_FAILED: &str =
    "Performing energy recalibration hit an unexpected error, so was skipped.";

const ANALYSIS_FAILED: &str = "An analysis error occurred or template database was not found.";

pub(super) fn run<E: IdentificationEngine>(
    analyzer: &mut Analyzer<E>,
    request: &AnalysisRequest,
    result: &mut AnalysisResult,
) -> Result<()> {
    let (foreground, background) = select_spectra(analyzer, &request.spectra)?;
    let num_channels = foreground.num_channels();

    let config = EngineConfig::calibrated(analyzer.config.drf_path(&request.drf), num_channels);
    analyzer.cache.ensure(&mut analyzer.engine, &config)?;
    result.initialization_error = 0;

    let forecal = Arc::clone(foreground.valid_calibration().ok_or_else(|| {
        Error::InvalidInput("Foreground energy calibration was invalid".to_string())
    })?);

    let mut input = StaticInput {
        foreground: foreground.gamma_counts.clone(),
        foreground_live_time: to_f32(foreground.live_time),
        foreground_real_time: to_f32(foreground.real_time),
        foreground_neutrons: neutron_total(foreground.neutron_counts),
        channel_energies: forecal.channel_energies().iter().map(|&e| to_f32(e)).collect(),
        ..StaticInput::default()
    };

    match background {
        None => {
            result.warnings.push(SYNTHESIZED_BACKGROUND_WARNING.to_string());
            input.background = vec![0.0; num_channels];
        }
        Some(background) => {
            let backcal = background.valid_calibration().ok_or_else(|| {
                Error::InvalidInput("Background energy calibration was invalid".to_string())
            })?;
            input.background = if same_calibration(backcal, &forecal) {
                background.gamma_counts.clone()
            } else {
                debug!("Rebinning background onto the foreground calibration");
                background.rebinned(&forecal)?.gamma_counts
            };
            input.background_live_time = to_f32(background.live_time);
            input.background_real_time = to_f32(background.real_time);
            input.background_neutrons = neutron_total(background.neutron_counts);

            check_k40(analyzer, request, result, background, &forecal, &mut input)?;
        }
    }

    let output = analyzer.engine.static_analysis(&input)?;
    debug!("Static analysis returned status {}", output.status);
    result.analysis_error = output.status;
    if output.status < 0 {
        return Err(analysis_failure(output.status, ANALYSIS_FAILED).into());
    }

    result.stuff_of_interest = output.stuff_of_interest;
    result.rate_not_norm = output.rate_not_norm;
    result.isotope_string.clone_from(&output.isotope_string);

    let ids = take_results(&mut analyzer.engine)?;
    result.chi2 = ids.chi2;
    result.alarm_basis_duration = ids.alarm_basis_duration;
    result.isotopes = isotope_results(ids, &parse_isotope_confidences(&output.isotope_string));
    Ok(())
}

/// Picks the foreground and optional background of a simple request.
fn select_spectra<'a, E>(
    analyzer: &Analyzer<E>,
    spectra: &'a SpectrumSet,
) -> Result<(&'a Measurement, Option<&'a Measurement>)> {
    let measurements = spectra.measurements();
    if measurements.is_empty() || measurements.len() > 2 {
        return Err(Error::InvalidInput(format!(
            "Simple analysis takes one or two spectra, got {}",
            measurements.len()
        )));
    }

    let num_channels = measurements[0].num_channels();
    if measurements.iter().any(|m| m.num_channels() != num_channels) {
        return Err(Error::InvalidInput(
            "Foreground and background have different numbers of channels".to_string(),
        ));
    }
    if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&num_channels) {
        return Err(Error::InvalidInput(format!(
            "Invalid number of channels ({num_channels})"
        )));
    }

    let mut foregrounds = Vec::new();
    let mut backgrounds = Vec::new();
    for m in measurements {
        match m.source_type {
            SourceType::Calibration | SourceType::IntrinsicActivity => {
                return Err(Error::InvalidInput(
                    "Calibration or intrinsic activity spectra can not be analyzed".to_string(),
                ));
            }
            SourceType::Background => backgrounds.push(m),
            SourceType::Foreground | SourceType::Unknown => foregrounds.push(m),
        }
    }

    // Two untagged spectra: the higher count rate is the foreground.
    if foregrounds.len() == 2
        && foregrounds
            .iter()
            .all(|m| m.source_type == SourceType::Unknown)
    {
        let cps = [count_rate(foregrounds[0]), count_rate(foregrounds[1])];
        let ratio = analyzer.config.aggregation.ambiguous_cps_ratio;
        let index = specid_algorithms::foreground_by_count_rate(cps, ratio)
            .map_err(|e| Error::AmbiguousInput(e.to_string()))?;
        return Ok((foregrounds[index], Some(foregrounds[1 - index])));
    }

    if foregrounds.len() != 1 {
        return Err(Error::InvalidInput(format!(
            "Exactly one foreground spectrum is required, got {}",
            foregrounds.len()
        )));
    }
    if backgrounds.len() > 1 {
        return Err(Error::InvalidInput(
            "At most one background spectrum may be given".to_string(),
        ));
    }
    Ok((foregrounds[0], backgrounds.first().copied()))
}

/// Checks the energy calibration against the background's K-40 peak and
/// recalibrates if the peak is off.
fn check_k40<E: IdentificationEngine>(
    analyzer: &mut Analyzer<E>,
    request: &AnalysisRequest,
    result: &mut AnalysisResult,
    background: &Measurement,
    forecal: &Arc<EnergyCalibration>,
    input: &mut StaticInput,
) -> Result<()> {
    let limits = &analyzer.config.k40_check;
    let high_res = input.channel_energies.len() > analyzer.config.high_resolution_channels;
    let min_peak_counts = if high_res {
        limits.min_peak_counts_high_res
    } else {
        limits.min_peak_counts
    };
    let peak_region = background.gamma_integral(1260.0, 1660.0);
    let high_energy = background.gamma_integral(1000.0, 3000.0);

    let eligible = background.live_time > limits.min_live_time
        && peak_region > min_peak_counts
        && forecal.is_coefficient_based()
        && high_energy / background.live_time < limits.max_high_energy_cps;
    if !eligible {
        debug!(
            "K40 check skipped: live time {:.1}s, {peak_region:.0} counts in peak region",
            background.live_time
        );
        result.warnings.push(K40_CONDITIONS_NOT_MET.to_string());
        return Ok(());
    }
    let max_offset = limits.max_offset;

    let fit = analyzer.engine.fit_k40(&K40Input {
        live_time: input.background_live_time,
        channel_energies: input.channel_energies.clone(),
        spectrum: input.background.clone(),
    })?;
    debug!("K40 fit status {}, centroid {}", fit.status, fit.centroid);

    match fit.status {
        0 => {}
        1 => {
            result.warnings.push(K40_SKIPPED_BY_ENGINE.to_string());
            return Ok(());
        }
        code => {
            result.warnings.push(format!(
                "Checking energy calibration from K40 peak failed: {} You may want to manually \
                 make sure energy calibration is about correct (ex, the K40 peak is around 1460 keV).",
                k40_fail_reason(code)
            ));
            return Ok(());
        }
    }

    let centroid = f64::from(fit.centroid);
    if (centroid - K40_ENERGY).abs() <= max_offset {
        return Ok(());
    }

    match recalibrate(&request.spectra, forecal, centroid) {
        Ok((revised, updated)) => {
            info!(
                "Recalibrated from K40 peak at {centroid:.2} keV (gain {} -> {})",
                forecal.coefficients()[1],
                updated.coefficients()[1]
            );
            input.channel_energies = updated.channel_energies().iter().map(|&e| to_f32(e)).collect();
            result.revised_spectra = Some(revised);
        }
        Err(e) => {
            warn!("Energy recalibration from K40 peak failed: {e}");
            result.warnings.push(RECALIBRATION_FAILED.to_string());
        }
    }
    Ok(())
}

/// Refits the gain so the K-40 peak lands at its nominal energy and carries
/// the change to every spectrum.
fn recalibrate(
    spectra: &SpectrumSet,
    forecal: &Arc<EnergyCalibration>,
    centroid: f64,
) -> Result<(SpectrumSet, Arc<EnergyCalibration>)> {
    let model = CalibrationModel::for_type(forecal.kind()).ok_or_else(|| {
        Error::InvalidInput("foreground calibration is not coefficient based".to_string())
    })?;
    let coefficients = forecal.coefficients();
    if coefficients.len() < 2 {
        return Err(Error::InvalidInput(
            "foreground calibration has no gain coefficient".to_string(),
        ));
    }

    let channel = forecal.channel_for_energy(centroid)?;
    let peak = RecalPeak::new(centroid, 1.0, channel, K40_ENERGY);
    let mut fit_for = vec![false; coefficients.len()];
    fit_for[1] = true;

    let num_channels = forecal.num_channels();
    let fit = CalibrationFitter::new(model).fit_peaks(
        &[peak],
        &fit_for,
        num_channels,
        forecal.deviation_pairs(),
        coefficients,
    )?;
    let dev_pairs = forecal.deviation_pairs().to_vec();
    let updated = Arc::new(match model {
        CalibrationModel::Polynomial => {
            EnergyCalibration::polynomial(num_channels, fit.coefficients, dev_pairs)
        }
        CalibrationModel::FullRangeFraction => {
            EnergyCalibration::full_range_fraction(num_channels, fit.coefficients, dev_pairs)
        }
    }?);

    let propagator = CalibrationPropagator::new();
    let mut replacements = vec![(Arc::clone(forecal), Arc::clone(&updated))];
    for m in spectra.measurements() {
        if m.num_channels() < MIN_CHANNELS {
            continue;
        }
        let Some(cal) = m.valid_calibration() else {
            continue;
        };
        if replacements.iter().any(|(old, _)| same_calibration(old, cal)) {
            continue;
        }
        let propagated = propagator.propagate(forecal, &updated, cal)?;
        replacements.push((Arc::clone(cal), propagated));
    }

    let mut revised = spectra.clone();
    for (old, new) in &replacements {
        revised.set_energy_calibration(old, new)?;
    }
    Ok((revised, updated))
}

fn count_rate(m: &Measurement) -> f64 {
    if m.live_time > 0.0 {
        m.gamma_count_sum() / m.live_time
    } else {
        0.0
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32(value: f64) -> f32 {
    value as f32
}

/// Rounded neutron total; missing, negative, or non-finite totals are 0.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn neutron_total(counts: Option<f64>) -> i32 {
    match counts {
        Some(n) if n.is_finite() && n > 0.0 => n.round() as i32,
        _ => 0,
    }
}
