//! Scripted engine and spectrum helpers shared by the integration tests.
#![allow(dead_code)]

use specid_core::{EnergyCalibration, Measurement, OccupancyStatus, SourceType, SpectrumSet};
use specid_engine::{
    AnalysisStep, EngineConfig, EngineError, EngineIsotope, EngineOutput, IdResults,
    IdentificationEngine, K40Fit, K40Input, SearchInput, StaticInput,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One call made to the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Configure(EngineConfig),
    Static(StaticInput),
    Search(AnalysisStep, SearchInput),
    CurrentResults,
    ClearResults,
    FitK40(K40Input),
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Engine that replays scripted outputs and records every call.
pub struct ScriptedEngine {
    pub calls: CallLog,
    pub init_error: Option<i32>,
    pub static_output: EngineOutput,
    /// Outputs for `Initialize` and `Analyze` steps, in order.
    pub search_outputs: VecDeque<EngineOutput>,
    /// Records returned by `current_results`, in order.
    pub results: VecDeque<IdResults>,
    pub k40: K40Fit,
    pub panic_on_static: bool,
}

impl ScriptedEngine {
    pub fn new() -> (Self, CallLog) {
        let calls = CallLog::default();
        let engine = Self {
            calls: Arc::clone(&calls),
            init_error: None,
            static_output: EngineOutput {
                status: 0,
                isotope_string: "None".to_string(),
                ..EngineOutput::default()
            },
            search_outputs: VecDeque::new(),
            results: VecDeque::new(),
            k40: K40Fit::default(),
            panic_on_static: false,
        };
        (engine, calls)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl IdentificationEngine for ScriptedEngine {
    fn version(&self) -> i32 {
        190_102
    }

    fn configure(&mut self, _app_dir: &Path, config: &EngineConfig) -> specid_engine::Result<()> {
        self.record(Call::Configure(config.clone()));
        match self.init_error {
            Some(code) => Err(EngineError::initialization(code)),
            None => Ok(()),
        }
    }

    fn static_analysis(&mut self, input: &StaticInput) -> specid_engine::Result<EngineOutput> {
        self.record(Call::Static(input.clone()));
        assert!(!self.panic_on_static, "scripted engine failure");
        Ok(self.static_output.clone())
    }

    fn streaming_search(
        &mut self,
        step: AnalysisStep,
        input: &SearchInput,
    ) -> specid_engine::Result<EngineOutput> {
        self.record(Call::Search(step, input.clone()));
        if step == AnalysisStep::Reset {
            return Ok(EngineOutput::default());
        }
        Ok(self.search_outputs.pop_front().unwrap_or_else(|| EngineOutput {
            isotope_string: "None".to_string(),
            ..EngineOutput::default()
        }))
    }

    fn current_results(&mut self) -> specid_engine::Result<IdResults> {
        self.record(Call::CurrentResults);
        Ok(self.results.pop_front().unwrap_or_default())
    }

    fn clear_results(&mut self) {
        self.record(Call::ClearResults);
    }

    fn fit_k40(&mut self, input: &K40Input) -> specid_engine::Result<K40Fit> {
        self.record(Call::FitK40(input.clone()));
        Ok(self.k40)
    }
}

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

pub fn configure_count(log: &CallLog) -> usize {
    calls(log)
        .iter()
        .filter(|c| matches!(c, Call::Configure(_)))
        .count()
}

pub fn search_steps(log: &CallLog) -> Vec<AnalysisStep> {
    calls(log)
        .iter()
        .filter_map(|c| match c {
            Call::Search(step, _) => Some(*step),
            _ => None,
        })
        .collect()
}

pub fn static_inputs(log: &CallLog) -> Vec<StaticInput> {
    calls(log)
        .into_iter()
        .filter_map(|c| match c {
            Call::Static(input) => Some(input),
            _ => None,
        })
        .collect()
}

pub fn output(status: i32, isotopes: &str) -> EngineOutput {
    EngineOutput {
        status,
        isotope_string: isotopes.to_string(),
        ..EngineOutput::default()
    }
}

pub fn isotope(name: &str, count_rate: f32, confidence: f32) -> EngineIsotope {
    EngineIsotope {
        name: name.to_string(),
        category: "Industrial".to_string(),
        count_rate,
        confidence,
    }
}

pub fn id_results(chi2: f32, isotopes: Vec<EngineIsotope>) -> IdResults {
    IdResults {
        chi2,
        alarm_basis_duration: 10.0,
        isotopes,
    }
}

pub fn linear(num_channels: usize, gain: f64) -> Arc<EnergyCalibration> {
    Arc::new(EnergyCalibration::polynomial(num_channels, vec![0.0, gain], vec![]).unwrap())
}

/// Flat spectrum with equal live and real time.
pub fn spectrum(
    sample: i32,
    counts_per_channel: f32,
    live_time: f64,
    cal: &Arc<EnergyCalibration>,
) -> Measurement {
    Measurement::new(sample, "Aa1", vec![counts_per_channel; cal.num_channels()])
        .with_times(live_time, live_time)
        .with_calibration(Arc::clone(cal))
}

/// Search data: one long background sample then nine 0.1 s samples.
pub fn search_data(occupancy_tags: bool) -> SpectrumSet {
    let cal = linear(64, 3.0);
    let mut background = spectrum(1, 1.0, 120.0, &cal).with_source_type(SourceType::Background);
    if occupancy_tags {
        background = background.with_occupancy(OccupancyStatus::NotOccupied);
    }
    let mut spectra = SpectrumSet::new(vec![background]);
    for sample in 2..=10 {
        let mut m = spectrum(sample, 2.0, 0.1, &cal).with_neutrons(1.0);
        if occupancy_tags {
            m = m.with_occupancy(OccupancyStatus::Occupied);
        }
        spectra.push(m);
    }
    spectra
}
