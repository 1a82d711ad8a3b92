//! Analysis configuration.

use crate::{Error, Result};
use serde::Deserialize;
use specid_algorithms::AggregationConfig;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Files that make a directory a usable detector response.
const DRF_FILES: [&str; 2] = ["Detector.dat", "DB.pcf"];

/// Conditions for checking the energy calibration against the K-40 peak
/// of a simple-mode background.
#[derive(Clone, Debug, PartialEq)]
pub struct K40CheckConfig {
    /// Minimum background live time (seconds).
    pub min_live_time: f64,
    /// Minimum counts in the K-40 region for low-resolution data.
    pub min_peak_counts: f64,
    /// Minimum counts in the K-40 region for high-resolution data.
    pub min_peak_counts_high_res: f64,
    /// Maximum 1000-3000 keV count rate (counts per second).
    pub max_high_energy_cps: f64,
    /// Centroid offset from 1460.75 keV that triggers a recalibration (keV).
    pub max_offset: f64,
}

impl Default for K40CheckConfig {
    fn default() -> Self {
        Self {
            min_live_time: 60.0,
            min_peak_counts: 400.0,
            min_peak_counts_high_res: 200.0,
            max_high_energy_cps: 6.0,
            max_offset: 0.5,
        }
    }
}

/// Configuration shared by the worker and every analysis strategy.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisConfig {
    /// Engine application directory.
    pub app_dir: PathBuf,
    /// Sub-directory of `app_dir` holding detector responses.
    pub drf_dir: String,
    /// Search and portal windowing thresholds.
    pub aggregation: AggregationConfig,
    /// Fair-confidence cutoff for search results.
    pub fair_threshold: f32,
    /// Fair-confidence cutoff for high-resolution search results.
    pub fair_threshold_high_res: f32,
    /// More channels than this counts as high resolution.
    pub high_resolution_channels: usize,
    pub k40_check: K40CheckConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("gadras_isotope_id_run_directory"),
            drf_dir: "drfs".to_string(),
            aggregation: AggregationConfig::default(),
            fair_threshold: 1.9,
            fair_threshold_high_res: 2.3,
            high_resolution_channels: 5000,
            k40_check: K40CheckConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_app_dir(mut self, app_dir: impl Into<PathBuf>) -> Self {
        self.app_dir = app_dir.into();
        self
    }

    #[must_use]
    pub fn with_drf_dir(mut self, drf_dir: impl Into<String>) -> Self {
        self.drf_dir = drf_dir.into();
        self
    }

    #[must_use]
    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    #[must_use]
    pub fn with_fair_thresholds(mut self, low_res: f32, high_res: f32) -> Self {
        self.fair_threshold = low_res;
        self.fair_threshold_high_res = high_res;
        self
    }

    #[must_use]
    pub fn with_k40_check(mut self, k40_check: K40CheckConfig) -> Self {
        self.k40_check = k40_check;
        self
    }

    /// Fair-confidence cutoff for data with `num_channels` channels.
    pub fn fair_threshold_for(&self, num_channels: usize) -> f32 {
        if num_channels > self.high_resolution_channels {
            self.fair_threshold_high_res
        } else {
            self.fair_threshold
        }
    }

    /// Path of a detector response relative to the application directory,
    /// as handed to the engine.
    pub fn drf_path(&self, drf: &str) -> String {
        format!("{}/{}", self.drf_dir.trim_end_matches('/'), drf)
    }

    /// Detector responses installed under `app_dir/drf_dir`.
    ///
    /// A directory qualifies when it holds both `Detector.dat` and
    /// `DB.pcf`. Names are relative to the DRF directory, use `/`
    /// separators, and are sorted.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the DRF directory cannot be read.
    pub fn available_drfs(&self) -> Result<Vec<String>> {
        let root = self.app_dir.join(&self.drf_dir);
        let mut found = Vec::new();
        collect_drfs(&root, &root, &mut found)?;
        found.sort();
        Ok(found)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for empty directories, non-positive
    /// thresholds, or an invalid aggregation section.
    pub fn validate(&self) -> Result<()> {
        if self.app_dir.as_os_str().is_empty() {
            return Err(Error::Config("app_dir must not be empty".to_string()));
        }
        if self.drf_dir.is_empty() {
            return Err(Error::Config("drf_dir must not be empty".to_string()));
        }
        if !(self.fair_threshold > 0.0 && self.fair_threshold_high_res > 0.0) {
            return Err(Error::Config(
                "fair confidence thresholds must be positive".to_string(),
            ));
        }
        let k40 = &self.k40_check;
        if k40.min_live_time < 0.0 || k40.max_offset <= 0.0 || k40.max_high_energy_cps <= 0.0 {
            return Err(Error::Config(
                "K40 check thresholds must be positive".to_string(),
            ));
        }
        self.aggregation
            .validate()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads configuration from a JSON string. Missing keys keep their
    /// defaults.
    ///
    /// # Errors
    /// Returns [`Error::Json`] for malformed JSON and [`Error::Config`] if
    /// the result does not validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: JsonConfig = serde_json::from_str(json)?;
        parsed.into_config()
    }

    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be opened, otherwise as
    /// [`Self::from_json`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let parsed: JsonConfig = serde_json::from_reader(BufReader::new(file))?;
        parsed.into_config()
    }
}

fn collect_drfs(root: &Path, dir: &Path, found: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if DRF_FILES.iter().all(|f| path.join(f).is_file()) {
            if let Ok(relative) = path.strip_prefix(root) {
                let name: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                found.push(name.join("/"));
            }
        }
        collect_drfs(root, &path, found)?;
    }
    Ok(())
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonConfig {
    engine: JsonEngine,
    aggregation: JsonAggregation,
    identification: JsonIdentification,
    k40_check: JsonK40Check,
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonEngine {
    app_dir: String,
    drf_dir: String,
}

impl Default for JsonEngine {
    fn default() -> Self {
        let defaults = AnalysisConfig::default();
        Self {
            app_dir: defaults.app_dir.to_string_lossy().into_owned(),
            drf_dir: defaults.drf_dir,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonAggregation {
    window_real_time: f64,
    preferred_background_real_time: f64,
    background_min_real_time: f64,
    foreground_max_real_time: f64,
    min_channels: usize,
    min_summed_channels: usize,
    ambiguous_cps_ratio: f64,
}

impl Default for JsonAggregation {
    fn default() -> Self {
        let d = AggregationConfig::default();
        Self {
            window_real_time: d.window_real_time,
            preferred_background_real_time: d.preferred_background_real_time,
            background_min_real_time: d.background_min_real_time,
            foreground_max_real_time: d.foreground_max_real_time,
            min_channels: d.min_channels,
            min_summed_channels: d.min_summed_channels,
            ambiguous_cps_ratio: d.ambiguous_cps_ratio,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonIdentification {
    fair_threshold: f32,
    fair_threshold_high_res: f32,
    high_resolution_channels: usize,
}

impl Default for JsonIdentification {
    fn default() -> Self {
        let d = AnalysisConfig::default();
        Self {
            fair_threshold: d.fair_threshold,
            fair_threshold_high_res: d.fair_threshold_high_res,
            high_resolution_channels: d.high_resolution_channels,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonK40Check {
    min_live_time: f64,
    min_peak_counts: f64,
    min_peak_counts_high_res: f64,
    max_high_energy_cps: f64,
    max_offset: f64,
}

impl Default for JsonK40Check {
    fn default() -> Self {
        let d = K40CheckConfig::default();
        Self {
            min_live_time: d.min_live_time,
            min_peak_counts: d.min_peak_counts,
            min_peak_counts_high_res: d.min_peak_counts_high_res,
            max_high_energy_cps: d.max_high_energy_cps,
            max_offset: d.max_offset,
        }
    }
}

impl JsonConfig {
    fn into_config(self) -> Result<AnalysisConfig> {
        let agg = self.aggregation;
        let k40 = self.k40_check;
        let config = AnalysisConfig {
            app_dir: PathBuf::from(self.engine.app_dir),
            drf_dir: self.engine.drf_dir,
            aggregation: AggregationConfig {
                window_real_time: agg.window_real_time,
                preferred_background_real_time: agg.preferred_background_real_time,
                background_min_real_time: agg.background_min_real_time,
                foreground_max_real_time: agg.foreground_max_real_time,
                min_channels: agg.min_channels,
                min_summed_channels: agg.min_summed_channels,
                ambiguous_cps_ratio: agg.ambiguous_cps_ratio,
            },
            fair_threshold: self.identification.fair_threshold,
            fair_threshold_high_res: self.identification.fair_threshold_high_res,
            high_resolution_channels: self.identification.high_resolution_channels,
            k40_check: K40CheckConfig {
                min_live_time: k40.min_live_time,
                min_peak_counts: k40.min_peak_counts,
                min_peak_counts_high_res: k40.min_peak_counts_high_res,
                max_high_energy_cps: k40.max_high_energy_cps,
                max_offset: k40.max_offset,
            },
        };
        config.validate()?;
        Ok(config)
    }
}
