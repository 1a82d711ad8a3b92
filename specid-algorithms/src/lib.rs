//! specid-algorithms: Numerical building blocks for nuclide identification.
//!
//! This crate provides:
//! - **Calibration fitting** - weighted least squares for polynomial and
//!   full-range-fraction calibrations, with fixed coefficients
//! - **Calibration propagation** - carry one detector's recalibration over
//!   to the other detectors
//! - **Sample aggregation** - background selection, foreground windowing,
//!   and multi-detector summing for search and portal data
//!
#![warn(missing_docs)]

pub mod aggregate;
mod error;
pub mod fit;
pub mod propagate;

pub use aggregate::{
    extend_calibration, foreground_by_count_rate, AggregationConfig, AggregationMode,
    AggregationPlan, DetectorGrid, HighlightedSampleWindow, SampleAggregator, SampleClass,
    SampleWindow, WindowStream,
};
pub use error::{Error, Result};
pub use fit::{
    CalibrationFit, CalibrationFitter, CalibrationModel, ChannelEnergyFit, RecalPeak,
    MAX_CHANNEL_ENERGY_COEFFICIENTS, MIN_CHANNEL_ENERGIES,
};
pub use propagate::CalibrationPropagator;
