//! specid-analysis: Request queue and analysis strategies for nuclide
//! identification.
//!
//! - [`AnalysisWorker`] owns the identification engine on one thread and
//!   drains a FIFO queue of [`AnalysisRequest`]s in batches.
//! - [`Analyzer`] runs the simple, search, and portal strategies against
//!   the engine, re-initializing it only when its configuration changes.
//! - [`AnalysisResult`] carries isotope calls, warnings, and error codes,
//!   with JSON and text renderings.
//! - [`SessionDispatcher`] routes results back to the caller's own context.
//!
//! # Example
//!
//! ```no_run
//! use specid_analysis::{AnalysisConfig, AnalysisMode, AnalysisRequest, AnalysisWorker};
//! use specid_core::SpectrumSet;
//! # fn engine() -> Box<dyn specid_engine::IdentificationEngine> { unimplemented!() }
//!
//! let worker = AnalysisWorker::new(AnalysisConfig::default());
//! worker.start(engine())?;
//! let request = AnalysisRequest::new(1, "Detective-EX", AnalysisMode::Simple, SpectrumSet::default(), |_| {});
//! let result = worker.analyze_blocking(request)?;
//! println!("{}", result.brief_summary());
//! worker.stop()?;
//! # Ok::<(), specid_analysis::Error>(())
//! ```

pub mod config;
mod error;
pub mod request;
pub mod result;
pub mod session;
mod strategies;
mod worker;

pub use config::{AnalysisConfig, K40CheckConfig};
pub use error::{Error, Result};
pub use request::{AnalysisMode, AnalysisRequest, ResultCallback};
pub use result::{AnalysisResult, IsotopeResult, RESULT_CODE_FAILURE, RESULT_CODE_SUCCESS};
pub use session::{run_pending, ChannelDispatcher, SessionDispatcher, SessionTask};
pub use strategies::Analyzer;
pub use worker::AnalysisWorker;
