//! Analysis results and their JSON and text renderings.

use crate::{Error, Result};
use serde::Serialize;
use specid_core::SpectrumSet;
use specid_engine::EngineError;
use std::fmt::Write as _;

/// Error code left in place when a step never ran.
pub const UNSET_ERROR_CODE: i32 = -999;

/// Result code for a successful analysis.
pub const RESULT_CODE_SUCCESS: i32 = 0;

/// Result code for an initialization or analysis failure.
pub const RESULT_CODE_FAILURE: i32 = 6;

/// One identified isotope.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IsotopeResult {
    pub name: String,
    #[serde(rename = "type")]
    pub category: String,
    pub count_rate: f32,
    pub confidence: f32,
    /// `H`, `F`, `L`, or empty.
    #[serde(rename = "confidenceStr")]
    pub confidence_label: String,
}

/// Outcome of one analysis request.
#[derive(Clone, Debug)]
pub struct AnalysisResult {
    pub number: u64,
    /// Detector response used.
    pub drf: String,
    pub initialization_error: i32,
    pub analysis_error: i32,
    /// Empty unless the request failed.
    pub error_message: String,
    pub warnings: Vec<String>,
    pub stuff_of_interest: f32,
    pub rate_not_norm: f32,
    pub isotope_string: String,
    /// -1 when not applicable.
    pub chi2: f32,
    /// -1 when not applicable.
    pub alarm_basis_duration: f32,
    pub isotopes: Vec<IsotopeResult>,
    /// Spectra after an energy recalibration, if one happened.
    pub revised_spectra: Option<SpectrumSet>,
}

impl AnalysisResult {
    pub fn new(number: u64, drf: impl Into<String>) -> Self {
        Self {
            number,
            drf: drf.into(),
            initialization_error: UNSET_ERROR_CODE,
            analysis_error: UNSET_ERROR_CODE,
            error_message: String::new(),
            warnings: Vec::new(),
            stuff_of_interest: 0.0,
            rate_not_norm: 0.0,
            isotope_string: String::new(),
            chi2: -1.0,
            alarm_basis_duration: -1.0,
            isotopes: Vec::new(),
            revised_spectra: None,
        }
    }

    /// True if the request failed; other fields should then be ignored.
    pub fn is_failure(&self) -> bool {
        self.initialization_error < 0 || self.analysis_error < 0 || !self.error_message.is_empty()
    }

    /// Result code: [`RESULT_CODE_FAILURE`] or [`RESULT_CODE_SUCCESS`].
    pub fn code(&self) -> i32 {
        if self.is_failure() {
            RESULT_CODE_FAILURE
        } else {
            RESULT_CODE_SUCCESS
        }
    }

    /// Records `error` in the error fields.
    pub fn set_error(&mut self, error: &Error) {
        match error {
            Error::Engine(EngineError::Initialization { code, .. }) => {
                self.initialization_error = *code;
            }
            Error::Engine(EngineError::Analysis { code, .. }) => {
                self.analysis_error = *code;
            }
            _ => {}
        }
        self.error_message = error.user_message();
    }

    /// Isotope names, in result order.
    pub fn isotope_names(&self) -> impl Iterator<Item = &str> {
        self.isotopes.iter().map(|iso| iso.name.as_str())
    }

    /// JSON document for downstream consumers.
    ///
    /// # Errors
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let failed = self.is_failure();
        let doc = JsonResult {
            analysis_error: self.analysis_error,
            error_message: (!self.error_message.is_empty()).then_some(self.error_message.as_str()),
            code: self.code(),
            initialization_error: (failed && self.initialization_error < 0)
                .then_some(self.initialization_error),
            analysis_warnings: (!failed && !self.warnings.is_empty()).then_some(&self.warnings),
            success: (!failed).then(|| JsonSuccess {
                drf: &self.drf,
                stuff_of_interest: self.stuff_of_interest,
                isotope_string: &self.isotope_string,
                chi2: self.chi2,
                alarm_basis_duration: self.alarm_basis_duration,
                isotopes: &self.isotopes,
            }),
        };
        Ok(serde_json::to_value(doc)?)
    }

    /// One or two line summary.
    pub fn brief_summary(&self) -> String {
        let mut out = String::new();
        if !self.error_message.is_empty() {
            let _ = write!(out, "Error: {}", self.error_message);
        }
        if self.initialization_error < 0 {
            let _ = write!(out, "\nGadras Initialization Error:{}", self.initialization_error);
        }
        if self.analysis_error < 0 {
            let _ = write!(out, "\nAnalysis Error Code: {}", self.analysis_error);
        }
        if !out.is_empty() {
            return out;
        }

        let names: Vec<&str> = self.isotope_names().collect();
        if names.is_empty() {
            out.push_str("No isotopes identified");
        } else {
            out.push_str(&names.join(", "));
        }
        if self.chi2 > 0.0 {
            let _ = write!(out, ", Chi2={:.3}", self.chi2);
        }
        out
    }

    /// Multi-line summary with an isotope table.
    pub fn full_summary(&self) -> String {
        let mut out = String::new();
        if !self.error_message.is_empty() {
            let _ = writeln!(out, "{:<12}: {}", "Error", self.error_message);
        }
        if self.initialization_error < 0 {
            let _ = writeln!(out, "{:<12}: {}", "Init Error", self.initialization_error);
        }
        if self.analysis_error < 0 {
            let _ = writeln!(out, "{:<12}: {}", "Ana Error", self.analysis_error);
        }
        if self.is_failure() {
            return out;
        }

        for warning in &self.warnings {
            let _ = writeln!(out, "{:<12}: {}", "Warning", warning);
        }
        let _ = writeln!(out, "{:<12}: {}", "Isotopes", self.isotope_string);
        let _ = writeln!(out, "{:<12}: {}", "DRF Used", self.drf);
        let _ = writeln!(out, "{:<12}: {:.3}", "SOI", self.stuff_of_interest);
        let _ = writeln!(out, "{:<12}: {:.3}s", "Alarm Basis", self.alarm_basis_duration);
        let _ = writeln!(out, "{:<12}: {:.3}", "Chi2", self.chi2);

        if !self.isotopes.is_empty() {
            let _ = writeln!(
                out,
                "\t{:<10}{:<12}{:<12}{:<10}",
                "Isotope", "Type", "Confidence", "Count Rate"
            );
            for iso in &self.isotopes {
                let _ = writeln!(
                    out,
                    "\t{:<10}{:<12}{:<12}{:<10}",
                    iso.name,
                    iso.category,
                    format!("{:.2} ({})", iso.confidence, iso.confidence_label),
                    format!("{:.3}", iso.count_rate)
                );
            }
        }
        out
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonResult<'a> {
    analysis_error: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
    code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    initialization_error: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis_warnings: Option<&'a Vec<String>>,
    #[serde(flatten)]
    success: Option<JsonSuccess<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonSuccess<'a> {
    drf: &'a str,
    stuff_of_interest: f32,
    isotope_string: &'a str,
    chi2: f32,
    alarm_basis_duration: f32,
    isotopes: &'a [IsotopeResult],
}
