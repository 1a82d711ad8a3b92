//! Analysis strategies and the engine-owning analyzer that runs them.

mod search;
mod simple;

use crate::config::AnalysisConfig;
use crate::request::{AnalysisMode, AnalysisRequest};
use crate::result::{AnalysisResult, IsotopeResult};
use log::{debug, error};
use specid_algorithms::AggregationMode;
use specid_engine::{EngineError, EngineStateCache, IdResults, IdentificationEngine};
use std::collections::BTreeMap;

/// Owns the engine and its state cache, and runs requests one at a time.
///
/// The worker thread holds the only `Analyzer`; it can also be driven
/// directly when no background thread is wanted.
pub struct Analyzer<E> {
    engine: E,
    cache: EngineStateCache,
    config: AnalysisConfig,
}

impl<E: IdentificationEngine> Analyzer<E> {
    pub fn new(engine: E, config: AnalysisConfig) -> Self {
        let cache = EngineStateCache::new(config.app_dir.clone());
        Self {
            engine,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Forgets the loaded engine configuration.
    pub fn invalidate_engine(&mut self) {
        self.cache.invalidate();
    }

    /// Runs `request` with the strategy for its mode.
    ///
    /// Failures are recorded in the returned result.
    pub fn analyze(&mut self, request: &AnalysisRequest) -> AnalysisResult {
        let mut result = AnalysisResult::new(request.number, request.drf.clone());
        result.warnings.extend(request.warnings.iter().cloned());

        debug!(
            "Analyzing request {} ({:?}, DRF '{}', {} measurements)",
            request.number,
            request.mode,
            request.drf,
            request.spectra.len()
        );

        let outcome = match request.mode {
            AnalysisMode::Simple => simple::run(self, request, &mut result),
            AnalysisMode::Search => search::run(self, request, &mut result, AggregationMode::Search),
            AnalysisMode::Portal => search::run(self, request, &mut result, AggregationMode::Portal),
        };

        if let Err(e) = outcome {
            error!("Analysis request {} failed: {e}", request.number);
            result.set_error(&e);
        }
        result
    }
}

/// Engine failure for a negative analysis status.
fn analysis_failure(code: i32, message: impl Into<String>) -> EngineError {
    EngineError::Analysis {
        code,
        message: message.into(),
    }
}

/// Converts the engine's result record to per-isotope results, labelling
/// each with its letter from the isotope string.
fn isotope_results(ids: IdResults, labels: &BTreeMap<String, String>) -> Vec<IsotopeResult> {
    ids.isotopes
        .into_iter()
        .map(|iso| IsotopeResult {
            confidence_label: labels.get(&iso.name).cloned().unwrap_or_default(),
            name: iso.name,
            category: iso.category,
            count_rate: iso.count_rate,
            confidence: iso.confidence,
        })
        .collect()
}

/// Fetches and then clears the engine's result record.
fn take_results<E: IdentificationEngine + ?Sized>(
    engine: &mut E,
) -> specid_engine::Result<IdResults> {
    let ids = engine.current_results();
    engine.clear_results();
    ids
}
