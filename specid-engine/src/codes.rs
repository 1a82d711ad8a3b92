//! Human-readable reasons for the engine's numeric status codes.

/// Reason for an initialization status code.
pub fn init_error_reason(code: i32) -> String {
    let reason = match code {
        0 => "Success",
        -1 => "DRF Init Error: error initializing application directory",
        -2 => "DRF Init Error: general error initializing application",
        -3 => "DRF Init Error: error initializing detector directory",
        -4 => "DRF Init Error: Detector.dat read error",
        -5 => "DRF Init Error: Response.win out of date",
        -6 => "DRF Init Error: Response.win does not exist",
        -9..=-7 => "DRF Init Error: General response read errors",
        _ => return format!("DRF Init Error: Unknown error code {code}"),
    };
    reason.to_string()
}

/// Reason the K-40 peak fit could not be used.
pub fn k40_fail_reason(code: i32) -> String {
    let reason = match code {
        0 => "Success",
        1 => "High count rate above 1100 keV.",
        2 => "High continuum to K40 peak count rate.",
        3 => "Low K40 peak-to-background ratio.",
        4 => "Nominal K40 peak off by over 200 keV.",
        5 => "Measurement live time is less than 60 seconds.",
        _ => return format!("Unknown reason: code={code}"),
    };
    reason.to_string()
}

/// Meaning of a streaming-search status code.
pub fn stream_search_status(code: i32) -> String {
    let status = match code {
        0 => "Energy calibration was not performed (e.g., calTag=\"\")",
        1 => "Calibration was successful",
        -1 => "Spectrum not suitable for energy calibration",
        -2 => "The specified background peak was not found",
        -3 => "There was a large error (based on chi-square) in the fit to the photopeak",
        -4 => "There were large uncertainties in the peak characteristics",
        _ => return format!("Other code {code}"),
    };
    status.to_string()
}

/// Formats an engine version number such as `190102` as `"19.1.2"`.
pub fn version_string(version: i32) -> String {
    format!(
        "{}.{}.{}",
        version / 10000,
        (version % 10000) / 100,
        version % 100
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_reasons() {
        assert_eq!(
            init_error_reason(-5),
            "DRF Init Error: Response.win out of date"
        );
        assert_eq!(
            init_error_reason(-8),
            "DRF Init Error: General response read errors"
        );
        assert_eq!(init_error_reason(-42), "DRF Init Error: Unknown error code -42");
    }

    #[test]
    fn test_k40_and_stream_codes() {
        assert_eq!(k40_fail_reason(5), "Measurement live time is less than 60 seconds.");
        assert_eq!(k40_fail_reason(9), "Unknown reason: code=9");
        assert_eq!(stream_search_status(1), "Calibration was successful");
        assert_eq!(stream_search_status(7), "Other code 7");
    }

    #[test]
    fn test_version_string() {
        assert_eq!(version_string(190_102), "19.1.2");
        assert_eq!(version_string(180_905), "18.9.5");
    }
}
