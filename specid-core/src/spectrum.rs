//! Measurement and spectrum-set types.
//!
//! A [`SpectrumSet`] is the normalized form a spectrum parser hands to the
//! analysis core: a flat list of [`Measurement`]s, each identified by a
//! sample number and a detector name.

use crate::calibration::{same_calibration, EnergyCalibration};
use crate::rebin::rebin_by_lower_edge;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the instrument (or the user) tagged a measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SourceType {
    Foreground,
    Background,
    Calibration,
    IntrinsicActivity,
    #[default]
    Unknown,
}

/// Portal occupancy flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OccupancyStatus {
    Occupied,
    NotOccupied,
    #[default]
    Unknown,
}

/// One detector's spectrum for one sample (time slice).
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    /// Sample (time slice) number.
    pub sample_number: i32,
    /// Detector this spectrum came from.
    pub detector_name: String,
    /// Gamma counts per channel.
    pub gamma_counts: Vec<f32>,
    /// Live time in seconds.
    pub live_time: f64,
    /// Real time in seconds.
    pub real_time: f64,
    /// Total neutron counts, if the detector has a neutron channel.
    pub neutron_counts: Option<f64>,
    pub source_type: SourceType,
    pub occupancy: OccupancyStatus,
    /// Energy calibration; `None` means the spectrum is uncalibrated.
    pub calibration: Option<Arc<EnergyCalibration>>,
}

impl Measurement {
    /// Creates a measurement with the given identity and counts.
    pub fn new(sample_number: i32, detector_name: impl Into<String>, counts: Vec<f32>) -> Self {
        Self {
            sample_number,
            detector_name: detector_name.into(),
            gamma_counts: counts,
            ..Self::default()
        }
    }

    /// Sets live and real time.
    #[must_use]
    pub fn with_times(mut self, live_time: f64, real_time: f64) -> Self {
        self.live_time = live_time;
        self.real_time = real_time;
        self
    }

    /// Sets the neutron count.
    #[must_use]
    pub fn with_neutrons(mut self, counts: f64) -> Self {
        self.neutron_counts = Some(counts);
        self
    }

    /// Sets the source type.
    #[must_use]
    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    /// Sets the occupancy flag.
    #[must_use]
    pub fn with_occupancy(mut self, occupancy: OccupancyStatus) -> Self {
        self.occupancy = occupancy;
        self
    }

    /// Sets the energy calibration.
    #[must_use]
    pub fn with_calibration(mut self, calibration: Arc<EnergyCalibration>) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Number of gamma channels.
    pub fn num_channels(&self) -> usize {
        self.gamma_counts.len()
    }

    /// Returns the calibration if it is present and matches the channel count.
    pub fn valid_calibration(&self) -> Option<&Arc<EnergyCalibration>> {
        self.calibration
            .as_ref()
            .filter(|cal| cal.num_channels() == self.gamma_counts.len())
    }

    /// Sum of all gamma counts.
    pub fn gamma_count_sum(&self) -> f64 {
        self.gamma_counts.iter().map(|&c| f64::from(c)).sum()
    }

    /// Gamma counts between two energies, with partial channels weighted by
    /// overlap. Returns 0 without a valid calibration.
    pub fn gamma_integral(&self, lower_energy: f64, upper_energy: f64) -> f64 {
        let Some(cal) = self.valid_calibration() else {
            return 0.0;
        };
        let (lo, hi) = if lower_energy <= upper_energy {
            (lower_energy, upper_energy)
        } else {
            (upper_energy, lower_energy)
        };

        let edges = cal.channel_energies();
        self.gamma_counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                let (e0, e1) = (edges[i], edges[i + 1]);
                let overlap = hi.min(e1) - lo.max(e0);
                if overlap <= 0.0 || e1 <= e0 {
                    0.0
                } else {
                    f64::from(count) * overlap / (e1 - e0)
                }
            })
            .sum()
    }

    /// Returns a copy of this measurement rebinned onto `calibration`.
    ///
    /// If the measurement already uses that calibration instance the counts
    /// are copied unchanged.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCalibration`] if this measurement has no valid
    /// calibration.
    pub fn rebinned(&self, calibration: &Arc<EnergyCalibration>) -> Result<Self> {
        let current = self.valid_calibration().ok_or_else(|| {
            Error::InvalidCalibration(format!(
                "measurement for detector '{}' sample {} has no valid calibration",
                self.detector_name, self.sample_number
            ))
        })?;

        let mut out = self.clone();
        if !same_calibration(current, calibration) {
            out.gamma_counts = rebin_by_lower_edge(
                current.channel_energies(),
                &self.gamma_counts,
                calibration.channel_energies(),
            )?;
        }
        out.calibration = Some(Arc::clone(calibration));
        Ok(out)
    }
}

/// An ordered collection of measurements.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumSet {
    measurements: Vec<Measurement>,
}

impl SpectrumSet {
    /// Creates a spectrum set from measurements.
    pub fn new(measurements: Vec<Measurement>) -> Self {
        Self { measurements }
    }

    /// Appends a measurement.
    pub fn push(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    /// All measurements in insertion order.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Mutable access to the measurements.
    pub fn measurements_mut(&mut self) -> &mut [Measurement] {
        &mut self.measurements
    }

    /// Returns true if there are no measurements.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Number of measurements.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Sorted, de-duplicated sample numbers.
    pub fn sample_numbers(&self) -> BTreeSet<i32> {
        self.measurements.iter().map(|m| m.sample_number).collect()
    }

    /// Detector names in first-seen order.
    pub fn detector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for m in &self.measurements {
            if !names.iter().any(|n| n == &m.detector_name) {
                names.push(m.detector_name.clone());
            }
        }
        names
    }

    /// Measurements belonging to a sample.
    pub fn sample_measurements(&self, sample: i32) -> impl Iterator<Item = &Measurement> {
        self.measurements
            .iter()
            .filter(move |m| m.sample_number == sample)
    }

    /// Measurement for a specific sample and detector.
    pub fn measurement(&self, sample: i32, detector: &str) -> Option<&Measurement> {
        self.measurements
            .iter()
            .find(|m| m.sample_number == sample && m.detector_name == detector)
    }

    /// Moves every measurement using the `current` calibration instance onto
    /// `updated`, without touching the counts. Returns how many changed.
    ///
    /// # Errors
    /// Returns [`Error::ChannelMismatch`] if the two calibrations have
    /// different channel counts.
    pub fn set_energy_calibration(
        &mut self,
        current: &Arc<EnergyCalibration>,
        updated: &Arc<EnergyCalibration>,
    ) -> Result<usize> {
        if current.num_channels() != updated.num_channels() {
            return Err(Error::ChannelMismatch {
                expected: current.num_channels(),
                actual: updated.num_channels(),
            });
        }

        let mut changed = 0;
        for m in &mut self.measurements {
            let uses_current = m
                .calibration
                .as_ref()
                .is_some_and(|cal| same_calibration(cal, current));
            if uses_current {
                m.calibration = Some(Arc::clone(updated));
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Sums the measurements of `samples` for `detectors` onto `calibration`.
    ///
    /// Measurements without a valid calibration are skipped. Times and
    /// neutron counts are summed. The result is tagged with the first
    /// sample number and the first detector name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if nothing could be summed.
    pub fn sum_measurements(
        &self,
        samples: &BTreeSet<i32>,
        detectors: &[String],
        calibration: &Arc<EnergyCalibration>,
    ) -> Result<Measurement> {
        let mut counts = vec![0.0_f64; calibration.num_channels()];
        let mut summed: Option<Measurement> = None;

        for m in self.measurements.iter().filter(|m| {
            samples.contains(&m.sample_number) && detectors.iter().any(|d| d == &m.detector_name)
        }) {
            if m.valid_calibration().is_none() {
                continue;
            }
            let rebinned = m.rebinned(calibration)?;
            for (acc, &c) in counts.iter_mut().zip(&rebinned.gamma_counts) {
                *acc += f64::from(c);
            }

            let entry = summed.get_or_insert_with(|| {
                let mut first = Measurement::new(m.sample_number, m.detector_name.clone(), vec![]);
                first.source_type = m.source_type;
                first.occupancy = m.occupancy;
                first
            });
            entry.live_time += m.live_time;
            entry.real_time += m.real_time;
            if let Some(n) = m.neutron_counts {
                entry.neutron_counts = Some(entry.neutron_counts.unwrap_or(0.0) + n);
            }
        }

        let mut summed = summed.ok_or_else(|| {
            Error::InvalidInput("no calibrated measurements to sum".to_string())
        })?;

        #[allow(clippy::cast_possible_truncation)]
        {
            summed.gamma_counts = counts.into_iter().map(|c| c as f32).collect();
        }
        summed.calibration = Some(Arc::clone(calibration));
        Ok(summed)
    }
}

impl FromIterator<Measurement> for SpectrumSet {
    fn from_iter<I: IntoIterator<Item = Measurement>>(iter: I) -> Self {
        Self {
            measurements: iter.into_iter().collect(),
        }
    }
}
