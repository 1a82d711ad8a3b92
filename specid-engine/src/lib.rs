//! specid-engine: Access to the external nuclide-identification engine.
//!
//! - [`IdentificationEngine`] is the call surface the analysis core drives;
//!   tests substitute scripted implementations.
//! - [`EngineStateCache`] re-initializes the engine only when the detector
//!   response, channel count, detector count, or mode changes.
//! - [`codes`] turns the engine's numeric statuses into readable reasons.
//! - With the `native` feature, `NativeEngine` loads the vendor library at
//!   runtime.
//!

mod cache;
pub mod codes;
mod engine;
mod error;
pub mod isotopes;
#[cfg(feature = "native")]
pub mod native;

pub use cache::EngineStateCache;
pub use engine::{
    AnalysisStep, EngineConfig, EngineIsotope, EngineMode, EngineOutput, GainAdjust, IdResults,
    IdentificationEngine, K40Fit, K40Input, SearchInput, StaticInput,
};
pub use error::{EngineError, Result};
pub use isotopes::parse_isotope_confidences;
#[cfg(feature = "native")]
pub use native::NativeEngine;
