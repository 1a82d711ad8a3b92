#![allow(clippy::float_cmp)]
mod common;

use common::{
    calls, configure_count, id_results, isotope, output, search_data, search_steps, Call,
    ScriptedEngine,
};
use specid_analysis::{AnalysisConfig, AnalysisMode, AnalysisRequest, Analyzer, RESULT_CODE_FAILURE};
use specid_core::SpectrumSet;
use specid_engine::{AnalysisStep, EngineMode, GainAdjust, IdResults};

const NOT_UPDATED: &str =
    "The displayed data has not been updated to the fit energy calibration, pending implementation.";

fn request(mode: AnalysisMode, spectra: SpectrumSet) -> AnalysisRequest {
    AnalysisRequest::new(11, "Portal-1", mode, spectra, |_| {})
}

fn run(engine: ScriptedEngine, mode: AnalysisMode, spectra: SpectrumSet) -> specid_analysis::AnalysisResult {
    Analyzer::new(engine, AnalysisConfig::default()).analyze(&request(mode, spectra))
}

#[test]
fn test_search_drives_engine_per_window() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (mut engine, log) = ScriptedEngine::new();
    engine.search_outputs.extend([
        output(1, "None"),
        output(1, "None"),
        output(0, "Cs137(F)"),
        output(0, "Cs137(H)+Co60(L)"),
    ]);
    engine.results.extend([
        IdResults::default(),
        id_results(-1.0, vec![isotope("Cs137", 4.0, 2.0)]),
        id_results(-1.0, vec![isotope("Cs137", 3.0, 7.5), isotope("Co60", 0.2, 0.4)]),
    ]);

    let result = run(engine, AnalysisMode::Search, search_data(false));
    assert_eq!(result.code(), 0, "{}", result.error_message);
    assert_eq!(result.initialization_error, 0);
    assert_eq!(result.analysis_error, 0);

    assert_eq!(
        search_steps(&log),
        vec![
            AnalysisStep::Initialize,
            AnalysisStep::Analyze,
            AnalysisStep::Analyze,
            AnalysisStep::Analyze,
            AnalysisStep::Reset,
        ]
    );

    match &calls(&log)[0] {
        Call::Configure(config) => {
            assert_eq!(config.drf, "drfs/Portal-1");
            assert_eq!(config.mode, EngineMode::RawMultiDetector);
            assert_eq!(config.gain_adjust, GainAdjust::K40);
            assert_eq!(config.num_detectors, 1);
            assert_eq!(config.num_channels, 64);
        }
        other => panic!("expected configure first, got {other:?}"),
    }

    // Background, then windows {2..6} and {7..10}.
    let inputs: Vec<_> = calls(&log)
        .into_iter()
        .filter_map(|c| match c {
            Call::Search(AnalysisStep::Analyze, input) => Some(input),
            _ => None,
        })
        .collect();
    assert_eq!(inputs[0].counts, vec![1; 64]);
    assert_eq!(inputs[1].counts, vec![10; 64]);
    assert_eq!(inputs[1].neutrons, 5);
    assert_eq!(inputs[2].counts, vec![8; 64]);
    assert_eq!(inputs[2].neutrons, 4);
    assert_eq!(inputs[2].energy_max, vec![192.0]);

    assert_eq!(result.isotope_string, "Cs137(H)");
    assert_eq!(result.isotopes.len(), 1);
    assert_eq!(result.isotopes[0].count_rate, 4.0);
    assert_eq!(result.isotopes[0].confidence, 7.5);
    assert_eq!(result.isotopes[0].confidence_label, "H");
    assert_eq!(result.chi2, -1.0);
    assert_eq!(result.alarm_basis_duration, -1.0);
    assert_eq!(result.warnings, vec![NOT_UPDATED]);
}

#[test]
fn test_reset_runs_when_window_fails() {
    let (mut engine, log) = ScriptedEngine::new();
    engine
        .search_outputs
        .extend([output(1, "None"), output(1, "None"), output(-3, "")]);

    let result = run(engine, AnalysisMode::Search, search_data(false));
    assert_eq!(result.code(), RESULT_CODE_FAILURE);
    assert_eq!(result.analysis_error, -3);
    assert!(result.error_message.contains("StreamingSearch"));
    assert!(result
        .error_message
        .ends_with("There was a large error (based on chi-square) in the fit to the photopeak"));
    assert_eq!(search_steps(&log).last(), Some(&AnalysisStep::Reset));
    assert_eq!(search_steps(&log).len(), 4);
}

#[test]
fn test_reset_runs_when_initialize_fails() {
    let (mut engine, log) = ScriptedEngine::new();
    engine.search_outputs.push_back(output(-2, ""));

    let result = run(engine, AnalysisMode::Search, search_data(false));
    assert_eq!(result.analysis_error, -2);
    assert_eq!(
        result.error_message,
        "Failed to initialize StreamingSearch: The specified background peak was not found"
    );
    assert_eq!(
        search_steps(&log),
        vec![AnalysisStep::Initialize, AnalysisStep::Reset]
    );
}

#[test]
fn test_background_failure_message() {
    let (mut engine, log) = ScriptedEngine::new();
    engine
        .search_outputs
        .extend([output(1, "None"), output(-1, "")]);

    let result = run(engine, AnalysisMode::Search, search_data(false));
    assert_eq!(
        result.error_message,
        "Failed to analyze background in StreamingSearch: Spectrum not suitable for energy calibration"
    );
    assert_eq!(search_steps(&log).last(), Some(&AnalysisStep::Reset));
}

#[test]
fn test_portal_uses_search_path_with_warning() {
    let (engine, log) = ScriptedEngine::new();
    let result = run(engine, AnalysisMode::Portal, search_data(true));
    assert_eq!(result.code(), 0, "{}", result.error_message);
    assert_eq!(result.isotope_string, "None");
    assert_eq!(result.warnings.len(), 2);
    assert!(result.warnings[0].starts_with("The search-mode analysis algorithm was used"));
    assert_eq!(result.warnings[1], NOT_UPDATED);
    assert_eq!(search_steps(&log).last(), Some(&AnalysisStep::Reset));
}

#[test]
fn test_missing_background_fails_without_engine() {
    let (engine, log) = ScriptedEngine::new();
    let spectra = search_data(false);
    let foreground_only = SpectrumSet::new(
        spectra
            .measurements()
            .iter()
            .filter(|m| m.sample_number != 1)
            .cloned()
            .collect(),
    );

    let result = run(engine, AnalysisMode::Search, foreground_only);
    assert_eq!(result.code(), RESULT_CODE_FAILURE);
    assert!(result.error_message.contains("no background"));
    assert_eq!(configure_count(&log), 0);
    assert!(search_steps(&log).is_empty());
}

#[test]
fn test_repeated_search_initializes_once() {
    let (engine, log) = ScriptedEngine::new();
    let mut analyzer = Analyzer::new(engine, AnalysisConfig::default());
    for _ in 0..3 {
        let result = analyzer.analyze(&request(AnalysisMode::Search, search_data(false)));
        assert_eq!(result.code(), 0);
    }
    assert_eq!(configure_count(&log), 1);
    let resets = search_steps(&log)
        .into_iter()
        .filter(|s| *s == AnalysisStep::Reset)
        .count();
    assert_eq!(resets, 3);
}
