//! Search-mode and portal sample aggregation.
//!
//! Time-sliced data is analyzed as a background followed by a sequence of
//! short foreground windows. This module classifies samples, chooses a
//! common channel grid for every gamma detector, splits the non-background
//! samples into windows, and sums/rebins each window's data into the
//! buffers the identification engine consumes.

use crate::{Error, Result};
use log::debug;
use rayon::prelude::*;
use specid_core::calibration::{
    full_range_fraction_to_polynomial, same_calibration, CalibrationType, EnergyCalibration,
};
use specid_core::rebin::rebin_by_lower_edge;
use specid_core::spectrum::{Measurement, OccupancyStatus, SourceType, SpectrumSet};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Real-time below which an accumulated window counts as empty (seconds).
const ZERO_REAL_TIME: f64 = 1.0e-5;

/// Thresholds used to classify samples and build analysis windows.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AggregationConfig {
    /// Accumulated real time that closes a foreground window (seconds).
    pub window_real_time: f64,
    /// A background sample longer than this is used on its own (seconds).
    pub preferred_background_real_time: f64,
    /// Minimum real time for a sample to count as background (seconds).
    pub background_min_real_time: f64,
    /// Maximum real time for a sample to count as foreground (seconds).
    pub foreground_max_real_time: f64,
    /// Minimum channel count for a spectrum to define the grid.
    pub min_channels: usize,
    /// Minimum channel count for a spectrum to be summed into a window.
    pub min_summed_channels: usize,
    /// Two count rates within this fraction of each other are ambiguous.
    pub ambiguous_cps_ratio: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_real_time: 0.425,
            preferred_background_real_time: 55.0,
            background_min_real_time: 30.0,
            foreground_max_real_time: 2.0,
            min_channels: 32,
            min_summed_channels: 64,
            ambiguous_cps_ratio: 0.75,
        }
    }
}

impl AggregationConfig {
    /// Creates a configuration with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the window-closing real time.
    #[must_use]
    pub fn with_window_real_time(mut self, seconds: f64) -> Self {
        self.window_real_time = seconds;
        self
    }

    /// Sets the real time above which a single background sample is preferred.
    #[must_use]
    pub fn with_preferred_background_real_time(mut self, seconds: f64) -> Self {
        self.preferred_background_real_time = seconds;
        self
    }

    /// Sets the background classification threshold.
    #[must_use]
    pub fn with_background_min_real_time(mut self, seconds: f64) -> Self {
        self.background_min_real_time = seconds;
        self
    }

    /// Sets the foreground classification threshold.
    #[must_use]
    pub fn with_foreground_max_real_time(mut self, seconds: f64) -> Self {
        self.foreground_max_real_time = seconds;
        self
    }

    /// Sets the count-rate ratio below which two spectra are distinguishable.
    #[must_use]
    pub fn with_ambiguous_cps_ratio(mut self, ratio: f64) -> Self {
        self.ambiguous_cps_ratio = ratio;
        self
    }

    /// Checks that thresholds are usable.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for a non-positive window length,
    /// a cps ratio outside `(0, 1)`, or fewer than one channel.
    pub fn validate(&self) -> Result<()> {
        if !(self.window_real_time > 0.0) {
            return Err(Error::InvalidInput(
                "window real time must be positive".to_string(),
            ));
        }
        if !(self.ambiguous_cps_ratio > 0.0 && self.ambiguous_cps_ratio < 1.0) {
            return Err(Error::InvalidInput(
                "ambiguous cps ratio must be between 0 and 1".to_string(),
            ));
        }
        if self.min_channels == 0 || self.min_summed_channels == 0 {
            return Err(Error::InvalidInput(
                "channel thresholds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Kind of time-sliced data being aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AggregationMode {
    /// Hand-held or mobile search data.
    Search,
    /// Radiation portal monitor data with an occupancy.
    Portal,
}

/// Classification of one sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleClass {
    /// Long, background-tagged sample.
    Background,
    /// Short sample taken while occupied or untagged.
    Foreground,
    /// Anything else; still windowed with the foreground.
    Other,
}

/// Common analysis grid for all gamma detectors.
#[derive(Clone, Debug)]
pub struct DetectorGrid {
    /// Gamma detectors, sorted by name.
    pub detector_names: Vec<String>,
    /// Per-detector calibration, all with `num_channels` channels.
    pub calibrations: Vec<Arc<EnergyCalibration>>,
    /// Upper energy of each detector's calibration.
    pub energy_max: Vec<f32>,
    /// Channel count of every calibration in the grid.
    pub num_channels: usize,
    /// Calibration that summed spectra are rebinned onto.
    pub summed_calibration: Arc<EnergyCalibration>,
}

impl DetectorGrid {
    /// Number of gamma detectors.
    pub fn num_detectors(&self) -> usize {
        self.detector_names.len()
    }
}

/// A set of consecutive samples analyzed together.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleWindow {
    /// Sample numbers in the window.
    pub samples: BTreeSet<i32>,
    /// Accumulated real time of the window's samples (seconds).
    pub real_time: f64,
}

/// Everything needed to drive a search-mode analysis.
#[derive(Clone, Debug)]
pub struct AggregationPlan {
    /// Common detector grid.
    pub grid: DetectorGrid,
    /// Samples summed into the background.
    pub background_samples: BTreeSet<i32>,
    /// Foreground windows in sample order.
    pub windows: Vec<SampleWindow>,
}

/// Summed and rebinned data for one analysis window.
#[derive(Clone, Debug, Default)]
pub struct HighlightedSampleWindow {
    /// Sample numbers summed into this window.
    pub samples: BTreeSet<i32>,
    /// Accumulated real time used to close the window (seconds).
    pub real_time: f64,
    /// Per-detector live time, clamped at zero.
    pub live_times: Vec<f32>,
    /// Per-detector real time, clamped at zero.
    pub real_times: Vec<f32>,
    /// Per-detector counts on that detector's grid calibration.
    pub detector_counts: Vec<Vec<f32>>,
    /// Row-major `num_detectors x num_channels` rounded counts.
    pub spectrum_buffer: Vec<i32>,
    /// All detectors summed onto the grid's summed calibration.
    pub summed_counts: Vec<f32>,
    /// Live time summed over detectors.
    pub summed_live_time: f32,
    /// Real time summed over detectors.
    pub summed_real_time: f32,
    /// Rounded neutron total; negative or non-finite sums become 0.
    pub neutrons: i32,
}

/// Per-detector contribution to a window.
struct DetectorContribution {
    native: Vec<f32>,
    summed: Vec<f32>,
    live_time: f64,
    real_time: f64,
}

/// Builds search-mode analysis windows from time-sliced spectra.
#[derive(Clone, Debug, Default)]
pub struct SampleAggregator {
    config: AggregationConfig,
}

impl SampleAggregator {
    /// Creates an aggregator with the given thresholds.
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Thresholds in use.
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Classifies a single measurement from its tags and real time.
    pub fn classify_measurement(&self, m: &Measurement) -> SampleClass {
        let background_tagged = m.source_type == SourceType::Background
            || m.occupancy == OccupancyStatus::NotOccupied;
        let foreground_tagged = matches!(m.source_type, SourceType::Foreground | SourceType::Unknown)
            || m.occupancy == OccupancyStatus::Occupied;

        if background_tagged && m.real_time >= self.config.background_min_real_time {
            SampleClass::Background
        } else if foreground_tagged && m.real_time <= self.config.foreground_max_real_time {
            SampleClass::Foreground
        } else {
            SampleClass::Other
        }
    }

    /// Classifies every sample; a sample is background if any of its gamma
    /// measurements is.
    pub fn classify(&self, spectra: &SpectrumSet) -> BTreeMap<i32, SampleClass> {
        spectra
            .sample_numbers()
            .into_iter()
            .map(|sample| {
                let mut class = SampleClass::Other;
                for m in spectra
                    .sample_measurements(sample)
                    .filter(|m| m.num_channels() >= self.config.min_channels)
                {
                    match self.classify_measurement(m) {
                        SampleClass::Background => {
                            class = SampleClass::Background;
                            break;
                        }
                        SampleClass::Foreground => class = SampleClass::Foreground,
                        SampleClass::Other => {}
                    }
                }
                (sample, class)
            })
            .collect()
    }

    /// Longest real time among a sample's calibrated gamma spectra.
    pub fn real_time_of_sample(&self, spectra: &SpectrumSet, sample: i32) -> f64 {
        spectra
            .sample_measurements(sample)
            .filter(|m| {
                m.valid_calibration().is_some() && m.num_channels() >= self.config.min_channels
            })
            .map(|m| m.real_time)
            .fold(0.0, f64::max)
    }

    /// Classifies samples, chooses the detector grid, selects the
    /// background, and splits the remaining samples into windows.
    ///
    /// # Errors
    /// - [`Error::AmbiguousInput`] if no detector has a valid calibration
    ///   with enough channels, or no background sample exists.
    /// - [`Error::LogicError`] if the windows cannot be formed.
    /// - [`Error::CoreError`] if a calibration cannot be extended to the
    ///   common channel count.
    pub fn plan(&self, spectra: &SpectrumSet, mode: AggregationMode) -> Result<AggregationPlan> {
        let classes = self.classify(spectra);
        let mut background_samples: BTreeSet<i32> = classes
            .iter()
            .filter(|(_, class)| **class == SampleClass::Background)
            .map(|(sample, _)| *sample)
            .collect();

        let contributing: BTreeSet<i32> = match mode {
            AggregationMode::Search => spectra.sample_numbers(),
            AggregationMode::Portal => background_samples.clone(),
        };

        let grid = self.detector_grid(spectra, &contributing)?;

        if background_samples.is_empty() {
            return Err(Error::AmbiguousInput(
                "no background samples found; a background is required for search analysis"
                    .to_string(),
            ));
        }

        // Windows skip every background sample, including ones not summed.
        let windows = self.windows(spectra, &background_samples)?;

        if background_samples.len() > 1 {
            if let Some(sample) = self.preferred_background(spectra, &background_samples, &grid) {
                debug!("Using background sample {sample} on its own");
                background_samples = std::iter::once(sample).collect();
            }
        }

        Ok(AggregationPlan {
            grid,
            background_samples,
            windows,
        })
    }

    /// Picks, per detector, the calibration with the widest energy span and
    /// extends all of them to the largest channel count.
    fn detector_grid(
        &self,
        spectra: &SpectrumSet,
        samples: &BTreeSet<i32>,
    ) -> Result<DetectorGrid> {
        let mut widest: BTreeMap<String, Arc<EnergyCalibration>> = BTreeMap::new();

        for m in spectra
            .measurements()
            .iter()
            .filter(|m| samples.contains(&m.sample_number))
        {
            if m.num_channels() < self.config.min_channels {
                continue;
            }
            let Some(cal) = m.valid_calibration() else {
                continue;
            };
            match widest.get(&m.detector_name) {
                Some(prev) if same_calibration(prev, cal) => {}
                Some(prev) if energy_range(cal) <= energy_range(prev) => {}
                _ => {
                    widest.insert(m.detector_name.clone(), Arc::clone(cal));
                }
            }
        }

        let num_channels = widest
            .values()
            .map(|cal| cal.num_channels())
            .max()
            .unwrap_or(0);
        if widest.is_empty() || num_channels < self.config.min_channels {
            return Err(Error::AmbiguousInput(
                "no gamma spectra with valid energy calibrations found".to_string(),
            ));
        }

        let mut detector_names = Vec::with_capacity(widest.len());
        let mut calibrations = Vec::with_capacity(widest.len());
        for (name, cal) in widest {
            calibrations.push(extend_calibration(&cal, num_channels)?);
            detector_names.push(name);
        }

        #[allow(clippy::cast_possible_truncation)]
        let energy_max = calibrations
            .iter()
            .map(|cal| cal.upper_energy() as f32)
            .collect();

        let summed_calibration = calibrations
            .last()
            .cloned()
            .ok_or_else(|| Error::LogicError("detector grid has no calibrations".to_string()))?;

        Ok(DetectorGrid {
            detector_names,
            calibrations,
            energy_max,
            num_channels,
            summed_calibration,
        })
    }

    /// Longest background sample, if it is long enough and has data for
    /// every grid detector.
    fn preferred_background(
        &self,
        spectra: &SpectrumSet,
        background_samples: &BTreeSet<i32>,
        grid: &DetectorGrid,
    ) -> Option<i32> {
        let mut longest: Option<(i32, f64)> = None;
        for &sample in background_samples {
            let rt = self.real_time_of_sample(spectra, sample);
            if rt > 0.0 && rt.is_finite() && longest.map_or(true, |(_, best)| rt > best) {
                longest = Some((sample, rt));
            }
        }

        let (sample, real_time) = longest?;
        debug!("Longest background was {real_time} seconds");
        if real_time <= self.config.preferred_background_real_time {
            return None;
        }

        let detectors_with_data = spectra
            .sample_measurements(sample)
            .filter(|m| {
                m.num_channels() >= self.config.min_summed_channels
                    && m.valid_calibration().is_some()
            })
            .count();

        if detectors_with_data == grid.num_detectors() {
            Some(sample)
        } else {
            debug!(
                "Not using background sample {sample} alone: {detectors_with_data} detectors with data, {} expected",
                grid.num_detectors()
            );
            None
        }
    }

    /// Splits the non-background samples, in order, into windows that each
    /// accumulate at least the configured real time. The last window may
    /// be shorter.
    ///
    /// # Errors
    /// Returns [`Error::LogicError`] if there are no non-background samples,
    /// or a window accumulates no real time before the samples run out.
    pub fn windows(
        &self,
        spectra: &SpectrumSet,
        background_samples: &BTreeSet<i32>,
    ) -> Result<Vec<SampleWindow>> {
        let samples: Vec<i32> = spectra.sample_numbers().into_iter().collect();
        let mut windows = Vec::new();
        let mut pos = 0;

        while pos < samples.len() {
            let mut window = BTreeSet::new();
            let mut real_time = 0.0;

            while real_time < self.config.window_real_time && pos < samples.len() {
                let sample = samples[pos];
                pos += 1;
                if background_samples.contains(&sample) {
                    continue;
                }
                real_time += self.real_time_of_sample(spectra, sample);
                window.insert(sample);
            }

            if window.is_empty() {
                if windows.is_empty() {
                    return Err(Error::LogicError(
                        "no foreground samples; did the data only contain background?".to_string(),
                    ));
                }
                break;
            }

            if real_time <= ZERO_REAL_TIME {
                if pos < samples.len() {
                    return Err(Error::LogicError(
                        "zero-second window before reaching the end of the samples".to_string(),
                    ));
                }
                break;
            }

            windows.push(SampleWindow {
                samples: window,
                real_time,
            });
        }

        Ok(windows)
    }

    /// Sums and rebins the data of `samples` onto the grid.
    ///
    /// Detectors with no usable spectrum in these samples contribute zero
    /// counts and zero times.
    ///
    /// # Errors
    /// Returns [`Error::LogicError`] if `samples` is empty, and rebinning
    /// errors from the core crate.
    pub fn fill(
        &self,
        spectra: &SpectrumSet,
        grid: &DetectorGrid,
        samples: &BTreeSet<i32>,
        real_time: f64,
    ) -> Result<HighlightedSampleWindow> {
        if samples.is_empty() {
            return Err(Error::LogicError(
                "no samples specified for window".to_string(),
            ));
        }

        let contributions: Vec<Option<DetectorContribution>> = grid
            .detector_names
            .par_iter()
            .zip(grid.calibrations.par_iter())
            .map(|(name, cal)| self.detector_contribution(spectra, grid, samples, name, cal))
            .collect::<Result<_>>()?;

        let ndet = grid.num_detectors();
        let nchannels = grid.num_channels;
        let mut window = HighlightedSampleWindow {
            samples: samples.clone(),
            real_time,
            live_times: vec![0.0; ndet],
            real_times: vec![0.0; ndet],
            detector_counts: vec![vec![0.0; nchannels]; ndet],
            spectrum_buffer: vec![0; ndet * nchannels],
            summed_counts: vec![0.0; nchannels],
            ..HighlightedSampleWindow::default()
        };

        for (det, contribution) in contributions.into_iter().enumerate() {
            let Some(contribution) = contribution else {
                continue;
            };

            for (sum, &c) in window.summed_counts.iter_mut().zip(&contribution.summed) {
                if c.is_finite() {
                    *sum += c;
                }
            }

            let row = &mut window.spectrum_buffer[det * nchannels..(det + 1) * nchannels];
            for (cell, &c) in row.iter_mut().zip(&contribution.native) {
                *cell = round_count(c);
            }

            #[allow(clippy::cast_possible_truncation)]
            {
                window.summed_live_time += contribution.live_time as f32;
                window.summed_real_time += contribution.real_time as f32;
                window.live_times[det] = contribution.live_time.max(0.0) as f32;
                window.real_times[det] = contribution.real_time.max(0.0) as f32;
            }
            window.detector_counts[det] = contribution.native;
        }

        window.neutrons = neutron_total(spectra, samples);
        Ok(window)
    }

    fn detector_contribution(
        &self,
        spectra: &SpectrumSet,
        grid: &DetectorGrid,
        samples: &BTreeSet<i32>,
        name: &str,
        cal: &Arc<EnergyCalibration>,
    ) -> Result<Option<DetectorContribution>> {
        let measurement = if samples.len() > 1 {
            let calibrated = samples.iter().any(|&sample| {
                spectra
                    .measurement(sample, name)
                    .is_some_and(|m| m.valid_calibration().is_some())
            });
            if calibrated {
                Some(spectra.sum_measurements(samples, &[name.to_string()], cal)?)
            } else {
                None
            }
        } else {
            samples
                .first()
                .and_then(|&sample| spectra.measurement(sample, name))
                .cloned()
        };

        let Some(m) = measurement else {
            debug!("Missing samples {samples:?} for detector '{name}'");
            return Ok(None);
        };
        if m.num_channels() < self.config.min_summed_channels {
            return Ok(None);
        }
        let Some(own_cal) = m.valid_calibration() else {
            return Ok(None);
        };

        let summed = if same_calibration(own_cal, &grid.summed_calibration) {
            m.gamma_counts.clone()
        } else {
            rebin_by_lower_edge(
                own_cal.channel_energies(),
                &m.gamma_counts,
                grid.summed_calibration.channel_energies(),
            )?
        };

        let native = if same_calibration(own_cal, cal) {
            m.gamma_counts.clone()
        } else {
            rebin_by_lower_edge(own_cal.channel_energies(), &m.gamma_counts, cal.channel_energies())?
        };

        Ok(Some(DetectorContribution {
            native,
            summed,
            live_time: m.live_time,
            real_time: m.real_time,
        }))
    }
}

/// Iterator that fills each planned window on demand.
pub struct WindowStream<'a> {
    aggregator: &'a SampleAggregator,
    spectra: &'a SpectrumSet,
    plan: &'a AggregationPlan,
    next: usize,
}

impl<'a> WindowStream<'a> {
    /// Creates a stream over the windows of `plan`.
    pub fn new(
        aggregator: &'a SampleAggregator,
        spectra: &'a SpectrumSet,
        plan: &'a AggregationPlan,
    ) -> Self {
        Self {
            aggregator,
            spectra,
            plan,
            next: 0,
        }
    }

    /// Fills the plan's background samples.
    ///
    /// # Errors
    /// See [`SampleAggregator::fill`].
    pub fn background(&self) -> Result<HighlightedSampleWindow> {
        let real_time = self
            .plan
            .background_samples
            .iter()
            .map(|&s| self.aggregator.real_time_of_sample(self.spectra, s))
            .sum();
        self.aggregator.fill(
            self.spectra,
            &self.plan.grid,
            &self.plan.background_samples,
            real_time,
        )
    }
}

impl Iterator for WindowStream<'_> {
    type Item = Result<HighlightedSampleWindow>;

    fn next(&mut self) -> Option<Self::Item> {
        let window = self.plan.windows.get(self.next)?;
        self.next += 1;
        Some(self.aggregator.fill(
            self.spectra,
            &self.plan.grid,
            &window.samples,
            window.real_time,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.windows.len() - self.next;
        (remaining, Some(remaining))
    }
}

/// Decides which of two spectra is the foreground from their count rates.
///
/// Returns the index (0 or 1) of the spectrum with the higher rate.
///
/// # Errors
/// Returns [`Error::AmbiguousInput`] if each rate exceeds `ratio` times the
/// other.
pub fn foreground_by_count_rate(cps: [f64; 2], ratio: f64) -> Result<usize> {
    let [first, second] = cps;
    if first > ratio * second && second > ratio * first {
        return Err(Error::AmbiguousInput(
            "could not determine foreground and background; the two spectra have about the same count rate"
                .to_string(),
        ));
    }
    Ok(usize::from(second > first))
}

/// Re-expresses `cal` with `num_channels` channels, keeping the
/// energy of every existing channel.
///
/// # Errors
/// Returns [`Error::CoreError`] if the extended calibration is invalid.
pub fn extend_calibration(
    cal: &Arc<EnergyCalibration>,
    num_channels: usize,
) -> Result<Arc<EnergyCalibration>> {
    let prev_channels = cal.num_channels();
    if prev_channels == num_channels {
        return Ok(Arc::clone(cal));
    }

    let extended = match cal.kind() {
        CalibrationType::Polynomial => EnergyCalibration::polynomial(
            num_channels,
            cal.coefficients().to_vec(),
            cal.deviation_pairs().to_vec(),
        )?,
        CalibrationType::FullRangeFraction => EnergyCalibration::polynomial(
            num_channels,
            full_range_fraction_to_polynomial(cal.coefficients(), prev_channels),
            cal.deviation_pairs().to_vec(),
        )?,
        CalibrationType::LowerChannelEdge => {
            if num_channels < prev_channels {
                return Err(Error::InvalidInput(format!(
                    "cannot shrink lower channel edge calibration from {prev_channels} to {num_channels} channels"
                )));
            }
            let mut edges = cal.channel_energies().to_vec();
            let prev_upper = cal.upper_energy();
            #[allow(clippy::cast_precision_loss)]
            let (upper, delta) = {
                let upper = prev_upper * num_channels as f64 / prev_channels as f64;
                (upper, (upper - prev_upper) / (num_channels - prev_channels) as f64)
            };
            debug_assert!(upper > prev_upper);
            #[allow(clippy::cast_precision_loss)]
            edges.extend((prev_channels + 1..=num_channels).map(|i| {
                prev_upper + delta * (i - prev_channels) as f64
            }));
            EnergyCalibration::lower_channel_edge(num_channels, edges)?
        }
    };

    Ok(Arc::new(extended))
}

fn energy_range(cal: &EnergyCalibration) -> f64 {
    (cal.upper_energy() - cal.lower_energy()).abs()
}

#[allow(clippy::cast_possible_truncation)]
fn round_count(count: f32) -> i32 {
    if count.is_finite() {
        count.round() as i32
    } else {
        0
    }
}

#[allow(clippy::cast_possible_truncation)]
fn neutron_total(spectra: &SpectrumSet, samples: &BTreeSet<i32>) -> i32 {
    let total: f64 = samples
        .iter()
        .flat_map(|&s| spectra.sample_measurements(s))
        .filter_map(|m| m.neutron_counts)
        .sum();
    if total.is_finite() && total > 0.0 {
        total.round() as i32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn cal(n: usize, gain: f64) -> Arc<EnergyCalibration> {
        Arc::new(EnergyCalibration::polynomial(n, vec![0.0, gain], vec![]).unwrap())
    }

    fn slice(sample: i32, det: &str, rt: f64, cal: &Arc<EnergyCalibration>) -> Measurement {
        Measurement::new(sample, det, vec![1.0; cal.num_channels()])
            .with_times(rt * 0.9, rt)
            .with_calibration(Arc::clone(cal))
    }

    #[test]
    fn test_classify_measurement() {
        let agg = SampleAggregator::default();
        let c = cal(64, 3.0);
        let bg = slice(1, "A", 60.0, &c).with_occupancy(OccupancyStatus::NotOccupied);
        let short_bg = slice(1, "A", 10.0, &c).with_source_type(SourceType::Background);
        let fg = slice(2, "A", 0.2, &c).with_occupancy(OccupancyStatus::Occupied);
        let long_fg = slice(3, "A", 5.0, &c).with_source_type(SourceType::Foreground);

        assert_eq!(agg.classify_measurement(&bg), SampleClass::Background);
        assert_eq!(agg.classify_measurement(&short_bg), SampleClass::Other);
        assert_eq!(agg.classify_measurement(&fg), SampleClass::Foreground);
        assert_eq!(agg.classify_measurement(&long_fg), SampleClass::Other);
    }

    #[test]
    fn test_widest_calibration_wins() {
        let narrow = cal(128, 2.0);
        let wide = cal(64, 6.0);
        let set = SpectrumSet::new(vec![
            slice(1, "A", 100.0, &narrow).with_source_type(SourceType::Background),
            slice(2, "A", 0.5, &wide),
        ]);

        let plan = SampleAggregator::default()
            .plan(&set, AggregationMode::Search)
            .unwrap();
        assert_eq!(plan.grid.num_channels, 64);
        assert!(same_calibration(&plan.grid.calibrations[0], &wide));
        assert_abs_diff_eq!(f64::from(plan.grid.energy_max[0]), 384.0);
    }

    #[test]
    fn test_extend_lower_channel_edge() {
        let edges: Vec<f64> = (0..=4).map(|i| f64::from(i) * 10.0).collect();
        let lce = Arc::new(EnergyCalibration::lower_channel_edge(4, edges).unwrap());
        let extended = extend_calibration(&lce, 8).unwrap();
        assert_eq!(extended.num_channels(), 8);
        assert_abs_diff_eq!(extended.upper_energy(), 80.0, epsilon = 1e-9);
        assert_abs_diff_eq!(extended.channel_energies()[6], 60.0, epsilon = 1e-9);
    }

    #[test]
    fn test_extend_full_range_fraction_keeps_energies() {
        let frf =
            Arc::new(EnergyCalibration::full_range_fraction(64, vec![0.0, 640.0], vec![]).unwrap());
        let extended = extend_calibration(&frf, 128).unwrap();
        assert_eq!(extended.kind(), CalibrationType::Polynomial);
        assert_abs_diff_eq!(extended.energy_for_channel(32.0), 320.0, epsilon = 1e-9);
        assert_abs_diff_eq!(extended.upper_energy(), 1280.0, epsilon = 1e-9);
    }

    #[test]
    fn test_foreground_by_count_rate() {
        assert_eq!(foreground_by_count_rate([100.0, 50.0], 0.75), Ok(0));
        assert_eq!(foreground_by_count_rate([10.0, 50.0], 0.75), Ok(1));
        assert!(matches!(
            foreground_by_count_rate([100.0, 90.0], 0.75),
            Err(Error::AmbiguousInput(_))
        ));
    }

    #[test]
    fn test_only_background_is_logic_error() {
        let c = cal(64, 3.0);
        let set = SpectrumSet::new(vec![
            slice(1, "A", 100.0, &c).with_source_type(SourceType::Background)
        ]);
        let err = SampleAggregator::default().plan(&set, AggregationMode::Search);
        assert!(matches!(err, Err(Error::LogicError(_))));
    }

    #[test]
    fn test_fill_rounds_and_clamps() {
        let c = cal(64, 3.0);
        let mut counts = vec![1.4_f32; 64];
        counts[0] = f32::NAN;
        counts[1] = 2.6;
        let set = SpectrumSet::new(vec![Measurement::new(5, "A", counts)
            .with_times(0.4, 0.5)
            .with_neutrons(-3.0)
            .with_calibration(Arc::clone(&c))]);

        let agg = SampleAggregator::default();
        let grid = agg
            .detector_grid(&set, &set.sample_numbers())
            .unwrap();
        let window = agg.fill(&set, &grid, &[5].into_iter().collect(), 0.5).unwrap();

        assert_eq!(window.spectrum_buffer[0], 0);
        assert_eq!(window.spectrum_buffer[1], 3);
        assert_eq!(window.spectrum_buffer[2], 1);
        assert_abs_diff_eq!(window.summed_counts[0], 0.0);
        assert_eq!(window.neutrons, 0);
        assert_abs_diff_eq!(window.live_times[0], 0.4);
    }

    #[test]
    fn test_fill_skips_detector_without_calibrated_samples() {
        let c = cal(64, 3.0);
        let set = SpectrumSet::new(vec![
            slice(1, "A", 0.2, &c),
            slice(2, "A", 0.2, &c),
            Measurement::new(1, "B", vec![5.0; 64]).with_times(0.18, 0.2),
            Measurement::new(2, "B", vec![5.0; 64]).with_times(0.18, 0.2),
        ]);

        let agg = SampleAggregator::default();
        let grid = DetectorGrid {
            detector_names: vec!["A".to_string(), "B".to_string()],
            calibrations: vec![Arc::clone(&c), Arc::clone(&c)],
            energy_max: vec![192.0, 192.0],
            num_channels: 64,
            summed_calibration: Arc::clone(&c),
        };
        let window = agg
            .fill(&set, &grid, &[1, 2].into_iter().collect(), 0.4)
            .unwrap();

        assert_eq!(window.spectrum_buffer[0], 2);
        assert_eq!(window.spectrum_buffer[64], 0);
        assert_abs_diff_eq!(window.real_times[1], 0.0);
        assert_abs_diff_eq!(window.summed_counts[0], 2.0);
    }
}
