use specid_engine::{
    AnalysisStep, EngineConfig, EngineError, EngineOutput, EngineStateCache, GainAdjust,
    IdResults, IdentificationEngine, K40Fit, K40Input, SearchInput, StaticInput,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Records every configuration it receives.
struct RecordingEngine {
    seen: Arc<Mutex<Vec<(PathBuf, EngineConfig)>>>,
}

impl IdentificationEngine for RecordingEngine {
    fn version(&self) -> i32 {
        190_102
    }

    fn configure(&mut self, app_dir: &Path, config: &EngineConfig) -> specid_engine::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push((app_dir.to_path_buf(), config.clone()));
        if config.drf.is_empty() {
            return Err(EngineError::initialization(-3));
        }
        Ok(())
    }

    fn static_analysis(&mut self, _input: &StaticInput) -> specid_engine::Result<EngineOutput> {
        Ok(EngineOutput::default())
    }

    fn streaming_search(
        &mut self,
        _step: AnalysisStep,
        _input: &SearchInput,
    ) -> specid_engine::Result<EngineOutput> {
        Ok(EngineOutput::default())
    }

    fn current_results(&mut self) -> specid_engine::Result<IdResults> {
        Ok(IdResults::default())
    }

    fn clear_results(&mut self) {}

    fn fit_k40(&mut self, _input: &K40Input) -> specid_engine::Result<K40Fit> {
        Ok(K40Fit::default())
    }
}

#[test]
fn test_boxed_engine_through_cache() {
    let _ = env_logger::builder().is_test(true).try_init();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut engine: Box<dyn IdentificationEngine> = Box::new(RecordingEngine {
        seen: Arc::clone(&seen),
    });
    let mut cache = EngineStateCache::new("gadras_isotope_id_run_directory");

    let raw = EngineConfig::raw("drfs/Portal", 512, 4).with_gain_adjust(GainAdjust::K40);
    cache.ensure(&mut engine, &raw).unwrap();
    cache.ensure(&mut engine, &raw).unwrap();
    assert_eq!(cache.current(), Some(&raw));

    // Same response and channels, different detector count.
    let fewer = EngineConfig::raw("drfs/Portal", 512, 2).with_gain_adjust(GainAdjust::K40);
    cache.ensure(&mut engine, &fewer).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, Path::new("gadras_isotope_id_run_directory"));
    assert_eq!(seen[1].1.num_detectors, 2);
}

#[test]
fn test_initialization_reason_is_mapped() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut engine = RecordingEngine { seen };
    let mut cache = EngineStateCache::new("app");

    let err = cache
        .ensure(&mut engine, &EngineConfig::calibrated("", 1024))
        .unwrap_err();
    match err {
        EngineError::Initialization { code, reason } => {
            assert_eq!(code, -3);
            assert_eq!(reason, "DRF Init Error: error initializing detector directory");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(cache.current().is_none());
}

#[test]
fn test_gain_adjust_tags() {
    assert_eq!(GainAdjust::None.tag(), "");
    assert_eq!(GainAdjust::K40.tag(), "k");
    assert_eq!(GainAdjust::Th232.tag(), "t");
    assert_eq!(AnalysisStep::Reset.code(), 2);
    let zeroed = SearchInput::zeroed(3, 8);
    assert_eq!(zeroed.counts.len(), 24);
}
