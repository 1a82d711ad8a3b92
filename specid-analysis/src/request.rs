//! Analysis requests.

use crate::result::AnalysisResult;
use specid_core::SpectrumSet;
use std::fmt;

/// Callback receiving the result of one request. Invoked exactly once.
pub type ResultCallback = Box<dyn FnOnce(AnalysisResult) + Send + 'static>;

/// Strategy used to analyze a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnalysisMode {
    /// One foreground against at most one background.
    Simple,
    /// Time-sliced data analyzed in short windows.
    Search,
    /// Portal-monitor data; search analysis with occupancy-based background.
    Portal,
}

/// One unit of work for the analysis worker.
pub struct AnalysisRequest {
    /// Caller-assigned sequence number, echoed in the result.
    pub number: u64,
    /// Originating session; empty for synchronous callers.
    pub session_id: String,
    /// Detector response name.
    pub drf: String,
    pub mode: AnalysisMode,
    pub spectra: SpectrumSet,
    /// Advisory warnings copied into the result.
    pub warnings: Vec<String>,
    callback: Option<ResultCallback>,
}

impl AnalysisRequest {
    /// Creates a request with no session and no warnings.
    pub fn new<F>(
        number: u64,
        drf: impl Into<String>,
        mode: AnalysisMode,
        spectra: SpectrumSet,
        callback: F,
    ) -> Self
    where
        F: FnOnce(AnalysisResult) + Send + 'static,
    {
        Self {
            number,
            session_id: String::new(),
            drf: drf.into(),
            mode,
            spectra,
            warnings: Vec::new(),
            callback: Some(Box::new(callback)),
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Replaces the callback.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(AnalysisResult) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub(crate) fn take_callback(&mut self) -> Option<ResultCallback> {
        self.callback.take()
    }
}

impl fmt::Debug for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("number", &self.number)
            .field("session_id", &self.session_id)
            .field("drf", &self.drf)
            .field("mode", &self.mode)
            .field("measurements", &self.spectra.len())
            .field("warnings", &self.warnings)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
