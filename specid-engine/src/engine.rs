//! Interface to the external nuclide-identification engine.
//!
//! The engine keeps hidden process-wide state, so an implementation is
//! owned by exactly one thread and every method takes `&mut self`.

use crate::Result;
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How spectra are handed to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EngineMode {
    /// Integer counts from several detectors; the engine fits the gain.
    RawMultiDetector,
    /// Float counts from one detector with a known calibration.
    CalibratedSingleDetector,
}

/// Peak used by the engine to track gain drift in raw mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GainAdjust {
    #[default]
    None,
    /// 1460 keV K-40 peak.
    K40,
    /// 2614 keV Th-232 chain peak.
    Th232,
}

impl GainAdjust {
    /// Calibration tag understood by the engine.
    pub fn tag(self) -> &'static str {
        match self {
            GainAdjust::None => "",
            GainAdjust::K40 => "k",
            GainAdjust::Th232 => "t",
        }
    }
}

/// Everything that determines the engine's loaded state.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Detector response function directory.
    pub drf: String,
    pub num_channels: usize,
    pub mode: EngineMode,
    pub num_detectors: usize,
    pub gain_adjust: GainAdjust,
}

impl EngineConfig {
    /// Single-detector configuration for static analysis.
    pub fn calibrated(drf: impl Into<String>, num_channels: usize) -> Self {
        Self {
            drf: drf.into(),
            num_channels,
            mode: EngineMode::CalibratedSingleDetector,
            num_detectors: 1,
            gain_adjust: GainAdjust::None,
        }
    }

    /// Multi-detector configuration for streaming search.
    pub fn raw(drf: impl Into<String>, num_channels: usize, num_detectors: usize) -> Self {
        Self {
            drf: drf.into(),
            num_channels,
            mode: EngineMode::RawMultiDetector,
            num_detectors,
            gain_adjust: GainAdjust::None,
        }
    }

    #[must_use]
    pub fn with_gain_adjust(mut self, gain_adjust: GainAdjust) -> Self {
        self.gain_adjust = gain_adjust;
        self
    }
}

/// Step of the engine's streaming-search state machine.
///
/// Every `Initialize` must eventually be followed by a `Reset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisStep {
    Initialize,
    Analyze,
    Reset,
}

impl AnalysisStep {
    /// Numeric value passed across the native boundary.
    pub fn code(self) -> i32 {
        match self {
            AnalysisStep::Initialize => 0,
            AnalysisStep::Analyze => 1,
            AnalysisStep::Reset => 2,
        }
    }
}

/// Input to a single foreground/background analysis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticInput {
    pub foreground: Vec<f32>,
    pub foreground_live_time: f32,
    pub foreground_real_time: f32,
    pub background: Vec<f32>,
    pub background_live_time: f32,
    pub background_real_time: f32,
    pub foreground_neutrons: i32,
    pub background_neutrons: i32,
    /// `foreground.len() + 1` lower channel energies.
    pub channel_energies: Vec<f32>,
}

/// Input to one streaming-search step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchInput {
    pub live_times: Vec<f32>,
    pub real_times: Vec<f32>,
    /// Row-major `num_detectors x num_channels` counts.
    pub counts: Vec<i32>,
    /// Upper energy of each detector.
    pub energy_max: Vec<f32>,
    pub neutrons: i32,
}

impl SearchInput {
    /// All-zero input, as sent with [`AnalysisStep::Reset`].
    pub fn zeroed(num_detectors: usize, num_channels: usize) -> Self {
        Self {
            live_times: vec![0.0; num_detectors],
            real_times: vec![0.0; num_detectors],
            counts: vec![0; num_detectors * num_channels],
            energy_max: vec![0.0; num_detectors],
            neutrons: 0,
        }
    }
}

/// Output of an analysis call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineOutput {
    /// Negative values are failures.
    pub status: i32,
    /// `Name(H)+Name(F)...` or `None`.
    pub isotope_string: String,
    pub stuff_of_interest: f32,
    pub rate_not_norm: f32,
    /// Per-detector gain-fit status (streaming search only).
    pub detector_status: Vec<i32>,
}

/// One isotope of the engine's current result record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineIsotope {
    pub name: String,
    pub category: String,
    pub count_rate: f32,
    pub confidence: f32,
}

/// The engine's current result record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdResults {
    pub chi2: f32,
    pub alarm_basis_duration: f32,
    pub isotopes: Vec<EngineIsotope>,
}

/// Input to the K-40 peak fit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct K40Input {
    pub live_time: f32,
    pub channel_energies: Vec<f32>,
    pub spectrum: Vec<f32>,
}

/// Outcome of the K-40 peak fit.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct K40Fit {
    /// 0 on success, otherwise a reason code.
    pub status: i32,
    /// Fitted peak energy (keV).
    pub centroid: f32,
}

/// Call surface of the identification engine.
pub trait IdentificationEngine: Send {
    /// Engine version number, e.g. `190102`.
    fn version(&self) -> i32;

    /// Loads the detector response and sets up internal buffers.
    ///
    /// # Errors
    /// [`crate::EngineError::Initialization`] with the engine's code.
    fn configure(&mut self, app_dir: &Path, config: &EngineConfig) -> Result<()>;

    /// Analyzes one foreground against one background.
    fn static_analysis(&mut self, input: &StaticInput) -> Result<EngineOutput>;

    /// Steps the streaming-search state machine.
    fn streaming_search(&mut self, step: AnalysisStep, input: &SearchInput) -> Result<EngineOutput>;

    /// Result record of the most recent analysis.
    fn current_results(&mut self) -> Result<IdResults>;

    /// Drops the current result record.
    fn clear_results(&mut self);

    /// Fits the K-40 peak of a background spectrum.
    fn fit_k40(&mut self, input: &K40Input) -> Result<K40Fit>;
}

impl<E: IdentificationEngine + ?Sized> IdentificationEngine for Box<E> {
    fn version(&self) -> i32 {
        (**self).version()
    }

    fn configure(&mut self, app_dir: &Path, config: &EngineConfig) -> Result<()> {
        (**self).configure(app_dir, config)
    }

    fn static_analysis(&mut self, input: &StaticInput) -> Result<EngineOutput> {
        (**self).static_analysis(input)
    }

    fn streaming_search(&mut self, step: AnalysisStep, input: &SearchInput) -> Result<EngineOutput> {
        (**self).streaming_search(step, input)
    }

    fn current_results(&mut self) -> Result<IdResults> {
        (**self).current_results()
    }

    fn clear_results(&mut self) {
        (**self).clear_results();
    }

    fn fit_k40(&mut self, input: &K40Input) -> Result<K40Fit> {
        (**self).fit_k40(input)
    }
}
