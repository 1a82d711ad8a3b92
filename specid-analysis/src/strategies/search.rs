//! Windowed streaming search over time-sliced and portal data.

use super::{analysis_failure, take_results, Analyzer};
use crate::request::AnalysisRequest;
use crate::result::{AnalysisResult, IsotopeResult};
use crate::Result;
use log::{debug, warn};
use specid_algorithms::{
    AggregationMode, DetectorGrid, HighlightedSampleWindow, SampleAggregator, WindowStream,
};
use specid_engine::codes::stream_search_status;
use specid_engine::{
    parse_isotope_confidences, AnalysisStep, EngineConfig, EngineOutput, GainAdjust,
    IdentificationEngine, SearchInput,
};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) const PORTAL_WARNING: &str = "The search-mode analysis algorithm was used for this RPM \
data, pending proper RPM replay implementation";

pub(crate) const CALIBRATION_NOT_APPLIED_WARNING: &str =
    "The displayed data has not been updated to the fit energy calibration, pending implementation.";

/// Issues the streaming-search `Reset` step when dropped.
struct ResetGuard<'a, E: IdentificationEngine> {
    engine: &'a mut E,
    reset: SearchInput,
}

impl<'a, E: IdentificationEngine> ResetGuard<'a, E> {
    fn new(engine: &'a mut E, grid: &DetectorGrid) -> Self {
        Self {
            engine,
            reset: SearchInput::zeroed(grid.num_detectors(), grid.num_channels),
        }
    }

    fn engine(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: IdentificationEngine> Drop for ResetGuard<'_, E> {
    fn drop(&mut self) {
        match self.engine.streaming_search(AnalysisStep::Reset, &self.reset) {
            Ok(out) => debug!("StreamingSearch reset returned {}", out.status),
            Err(e) => warn!("StreamingSearch reset failed: {e}"),
        }
    }
}

pub(super) fn run<E: IdentificationEngine>(
    analyzer: &mut Analyzer<E>,
    request: &AnalysisRequest,
    result: &mut AnalysisResult,
    mode: AggregationMode,
) -> Result<()> {
    let aggregator = SampleAggregator::new(analyzer.config.aggregation.clone());
    let plan = aggregator.plan(&request.spectra, mode)?;
    let grid = &plan.grid;
    let num_channels = grid.num_channels;
    debug!(
        "Search plan: {} detectors, {} channels, {} background samples, {} windows",
        grid.num_detectors(),
        num_channels,
        plan.background_samples.len(),
        plan.windows.len()
    );

    let config = EngineConfig::raw(
        analyzer.config.drf_path(&request.drf),
        num_channels,
        grid.num_detectors(),
    )
    .with_gain_adjust(GainAdjust::K40);
    analyzer.cache.ensure(&mut analyzer.engine, &config)?;
    result.initialization_error = 0;

    let mut stream = WindowStream::new(&aggregator, &request.spectra, &plan);
    let background = search_input(&stream.background()?, grid);

    let status = analyzer
        .engine
        .streaming_search(AnalysisStep::Initialize, &background)?
        .status;
    let mut guard = ResetGuard::new(&mut analyzer.engine, grid);
    if status < 0 {
        return Err(stream_failure("Failed to initialize StreamingSearch", status));
    }

    let status = guard
        .engine()
        .streaming_search(AnalysisStep::Analyze, &background)?
        .status;
    if status < 0 {
        return Err(stream_failure("Failed to analyze background in StreamingSearch", status));
    }
    take_results(guard.engine())?;

    let mut summary = SearchSummary::default();
    for window in &mut stream {
        let window = window?;
        let output = guard
            .engine()
            .streaming_search(AnalysisStep::Analyze, &search_input(&window, grid))?;
        if output.status < 0 {
            let what = format!(
                "Failed to analyze samples {:?} in StreamingSearch",
                window.samples
            );
            return Err(stream_failure(&what, output.status));
        }
        let ids = take_results(guard.engine())?;
        summary.add_window(&window.samples, &output, ids.isotopes);
    }
    drop(guard);

    let threshold = analyzer.config.fair_threshold_for(num_channels);
    summary.finish(result, threshold);

    if mode == AggregationMode::Portal {
        result.warnings.push(PORTAL_WARNING.to_string());
    }
    result.warnings.push(CALIBRATION_NOT_APPLIED_WARNING.to_string());
    result.analysis_error = 0;
    Ok(())
}

fn stream_failure(what: &str, status: i32) -> crate::Error {
    analysis_failure(status, format!("{what}: {}", stream_search_status(status))).into()
}

fn search_input(window: &HighlightedSampleWindow, grid: &DetectorGrid) -> SearchInput {
    SearchInput {
        live_times: window.live_times.clone(),
        real_times: window.real_times.clone(),
        counts: window.spectrum_buffer.clone(),
        energy_max: grid.energy_max.clone(),
        neutrons: window.neutrons,
    }
}

/// Isotope calls accumulated over all windows.
#[derive(Default)]
struct SearchSummary {
    /// High-confidence isotopes and the samples that produced them.
    high: BTreeMap<String, BTreeSet<i32>>,
    /// Fair-confidence isotopes and the samples that produced them.
    fair: BTreeMap<String, BTreeSet<i32>>,
    isotopes: Vec<IsotopeResult>,
    stuff_of_interest: f32,
}

impl SearchSummary {
    fn add_window(
        &mut self,
        samples: &BTreeSet<i32>,
        output: &EngineOutput,
        isotopes: Vec<specid_engine::EngineIsotope>,
    ) {
        self.stuff_of_interest = self.stuff_of_interest.max(output.stuff_of_interest);

        let labels = parse_isotope_confidences(&output.isotope_string);
        for (name, label) in &labels {
            let calls = match label.as_str() {
                "H" => &mut self.high,
                "F" => &mut self.fair,
                "L" | "" => continue,
                other => {
                    debug!("Ignoring unknown confidence '{other}' for {name}");
                    continue;
                }
            };
            calls.entry(name.clone()).or_default().extend(samples);
        }

        for iso in isotopes {
            let index = match self.isotopes.iter().position(|r| r.name == iso.name) {
                Some(index) => index,
                None => {
                    self.isotopes.push(IsotopeResult {
                        name: iso.name.clone(),
                        category: iso.category.clone(),
                        count_rate: -1.0,
                        confidence: -1.0,
                        confidence_label: String::new(),
                    });
                    self.isotopes.len() - 1
                }
            };
            let record = &mut self.isotopes[index];
            record.count_rate = record.count_rate.max(iso.count_rate);
            if iso.confidence > record.confidence {
                record.confidence = iso.confidence;
                if let Some(label) = labels.get(&iso.name) {
                    record.confidence_label.clone_from(label);
                }
            }
        }
    }

    fn finish(mut self, result: &mut AnalysisResult, fair_threshold: f32) {
        for (name, samples) in &self.high {
            debug!("{name}(H) in samples {samples:?}");
        }

        let mut parts: Vec<String> = self.high.keys().map(|n| format!("{n}(H)")).collect();
        parts.extend(
            self.fair
                .keys()
                .filter(|n| !self.high.contains_key(*n))
                .map(|n| format!("{n}(F)")),
        );
        result.isotope_string = if parts.is_empty() {
            "None".to_string()
        } else {
            parts.join("+")
        };

        let (high, fair) = (&self.high, &self.fair);
        self.isotopes.retain(|r| {
            high.contains_key(&r.name) || fair.contains_key(&r.name) || r.confidence >= fair_threshold
        });
        result.isotopes = self.isotopes;
        result.stuff_of_interest = self.stuff_of_interest;
    }
}
