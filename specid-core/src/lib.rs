//! specid-core: Core types for gamma/neutron spectral analysis.
//!
//! This crate provides the immutable energy calibration model, the
//! measurement and spectrum-set containers handed to the analysis core, and
//! count-conserving rebinning between channel grids.
//!

pub mod calibration;
pub mod error;
pub mod rebin;
pub mod spectrum;

pub use calibration::{
    correction_due_to_dev_pairs, deviation_pair_correction, full_range_fraction_energy,
    full_range_fraction_to_polynomial, polynomial_energy, same_calibration, CalibrationType,
    DeviationPair, EnergyCalibration, CHANNEL_SEARCH_ACCURACY,
};
pub use error::{Error, Result};
pub use rebin::rebin_by_lower_edge;
pub use spectrum::{Measurement, OccupancyStatus, SourceType, SpectrumSet};
