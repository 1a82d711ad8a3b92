//! Native identification engine loaded at runtime.
//!
//! The engine library is opened with `libloading`, so the same binary runs
//! with or without it installed. Every entry point is resolved up front;
//! a missing one makes the whole engine unavailable.
//!
//! The layout of [`RawIdResult`] and the numeric values of
//! [`AnalysisStep::code`] must match the vendor header the library was
//! built with.
#![allow(unsafe_code)]

use crate::codes::{stream_search_status, version_string};
use crate::engine::{
    AnalysisStep, EngineConfig, EngineIsotope, EngineMode, EngineOutput, IdResults,
    IdentificationEngine, K40Fit, K40Input, SearchInput, StaticInput,
};
use crate::isotopes::split_list;
use crate::{EngineError, Result};
use libloading::Library;
use log::{debug, info};
use std::ffi::{c_char, c_int, c_void, CStr, CString, OsStr};
use std::path::Path;
use std::ptr;

/// Capacity of the per-isotope arrays in the engine's result record.
pub const MAX_RESULT_ISOTOPES: usize = 100;

#[cfg(target_os = "linux")]
const LIB_NAMES: &[&str] = &["libgadras.so", "libGadrasIsotopeID.so"];

#[cfg(target_os = "macos")]
const LIB_NAMES: &[&str] = &["libgadras.dylib", "libGadrasIsotopeID.dylib"];

#[cfg(target_os = "windows")]
const LIB_NAMES: &[&str] = &["LibGadrasIsotopeID.dll", "gadras.dll"];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const LIB_NAMES: &[&str] = &[];

/// Result record filled by `GetCurrentIsotopeIDResults`.
#[repr(C)]
struct RawIdResult {
    chi_sqr: f32,
    alarm_basis_duration: f32,
    n_isotopes: i32,
    list_of_isotope_strings: *mut c_char,
    list_of_isotope_types: *mut c_char,
    isotope_count_rates: [f32; MAX_RESULT_ISOTOPES],
    isotope_confidences: [f32; MAX_RESULT_ISOTOPES],
}

impl RawIdResult {
    fn empty() -> Self {
        Self {
            chi_sqr: 0.0,
            alarm_basis_duration: 0.0,
            n_isotopes: 0,
            list_of_isotope_strings: ptr::null_mut(),
            list_of_isotope_types: ptr::null_mut(),
            isotope_count_rates: [0.0; MAX_RESULT_ISOTOPES],
            isotope_confidences: [0.0; MAX_RESULT_ISOTOPES],
        }
    }
}

type VersionFn = unsafe extern "C" fn() -> i32;
type InitCalibratedFn = unsafe extern "C" fn(*const c_char, *const c_char, i32) -> i32;
type InitRawFn = unsafe extern "C" fn(*const c_char, *const c_char, i32, i32, *const c_char) -> i32;
type StaticFn = unsafe extern "C" fn(
    f32,
    f32,
    *mut f32,
    f32,
    f32,
    *mut f32,
    *mut f32,
    *mut *mut c_char,
    *mut f32,
    c_int,
    c_int,
    *mut f32,
) -> i32;
type StreamingFn = unsafe extern "C" fn(
    *mut f32,
    *mut f32,
    *mut i32,
    *mut f32,
    *mut *mut c_char,
    *mut f32,
    c_int,
    *mut i32,
    i32,
    *mut f32,
) -> i32;
type ResultsFn = unsafe extern "C" fn(*mut RawIdResult);
type ClearFn = unsafe extern "C" fn();
type RebinK40Fn = unsafe extern "C" fn(i32, f32, *mut f32, *mut f32, *mut f32, *mut f32) -> i32;
type FreeFn = unsafe extern "C" fn(*mut c_void);

struct Symbols {
    version: VersionFn,
    init_calibrated: InitCalibratedFn,
    init_raw: InitRawFn,
    static_id: StaticFn,
    streaming_search: StreamingFn,
    current_results: ResultsFn,
    clear_results: ClearFn,
    rebin_k40: RebinK40Fn,
    /// Releases strings the engine allocates; not exported on every platform.
    free: Option<FreeFn>,
}

/// Looks up `name` (NUL-terminated) and copies out the function pointer.
///
/// # Safety
/// `T` must be the exact signature of the exported symbol.
unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Result<T> {
    lib.get::<T>(name).map(|s| *s).map_err(|e| {
        let printable = String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name));
        EngineError::Unavailable(format!("missing entry point '{printable}': {e}"))
    })
}

impl Symbols {
    /// # Safety
    /// The library must export these symbols with the declared signatures.
    unsafe fn resolve(lib: &Library) -> Result<Self> {
        Ok(Self {
            version: symbol(lib, b"gadrasversionnumber\0")?,
            init_calibrated: symbol(lib, b"InitializeIsotopeIdCalibrated\0")?,
            init_raw: symbol(lib, b"InitializeIsotopeIdRaw\0")?,
            static_id: symbol(lib, b"StaticIsotopeID\0")?,
            streaming_search: symbol(lib, b"StreamingSearch\0")?,
            current_results: symbol(lib, b"GetCurrentIsotopeIDResults\0")?,
            clear_results: symbol(lib, b"ClearIsotopeIDResults\0")?,
            rebin_k40: symbol(lib, b"RebinUsingK40\0")?,
            free: symbol(lib, b"free\0").ok(),
        })
    }
}

/// Engine backed by the dynamically loaded vendor library.
pub struct NativeEngine {
    symbols: Symbols,
    // Must outlive the function pointers in `symbols`.
    _lib: Library,
}

impl NativeEngine {
    /// Opens the first library from the platform's candidate names.
    ///
    /// # Errors
    /// [`EngineError::Unavailable`] if no candidate loads with every entry
    /// point.
    pub fn load() -> Result<Self> {
        let mut last_error =
            EngineError::Unavailable("no engine library names for this platform".to_string());
        for name in LIB_NAMES {
            match Self::load_from(name) {
                Ok(engine) => {
                    info!(
                        "Loaded identification engine {name} (version {})",
                        version_string(engine.version())
                    );
                    return Ok(engine);
                }
                Err(e) => {
                    debug!("Could not load {name}: {e}");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Opens the engine library at `path`.
    ///
    /// # Errors
    /// [`EngineError::Unavailable`] if the library or an entry point is
    /// missing.
    pub fn load_from(path: impl AsRef<OsStr>) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initializers; the engine has none
        // with preconditions.
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            EngineError::Unavailable(format!("cannot open {}: {e}", path.to_string_lossy()))
        })?;
        // SAFETY: signatures follow the engine's C header.
        let symbols = unsafe { Symbols::resolve(&lib)? };
        Ok(Self { symbols, _lib: lib })
    }

    /// Copies and releases a string allocated by the engine.
    fn take_string(&self, raw: *mut c_char) -> String {
        if raw.is_null() {
            return String::new();
        }
        // SAFETY: the engine hands back NUL-terminated strings it allocated.
        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        if let Some(free) = self.symbols.free {
            // SAFETY: allocated with malloc by the engine and not used again.
            unsafe { free(raw.cast::<c_void>()) };
        }
        text
    }
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| EngineError::LogicError(format!("'{value}' contains a NUL byte")))
}

fn c_count(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| EngineError::LogicError(format!("too many {what}: {value}")))
}

impl IdentificationEngine for NativeEngine {
    fn version(&self) -> i32 {
        // SAFETY: takes no arguments.
        unsafe { (self.symbols.version)() }
    }

    fn configure(&mut self, app_dir: &Path, config: &EngineConfig) -> Result<()> {
        let app = c_string(&app_dir.to_string_lossy())?;
        let drf = c_string(&config.drf)?;
        let nchannels = c_count(config.num_channels, "channels")?;

        let code = match config.mode {
            EngineMode::CalibratedSingleDetector => {
                // SAFETY: both strings outlive the call.
                unsafe { (self.symbols.init_calibrated)(app.as_ptr(), drf.as_ptr(), nchannels) }
            }
            EngineMode::RawMultiDetector => {
                let ndet = c_count(config.num_detectors, "detectors")?;
                let tag = c_string(config.gain_adjust.tag())?;
                // SAFETY: all strings outlive the call.
                unsafe {
                    (self.symbols.init_raw)(
                        app.as_ptr(),
                        drf.as_ptr(),
                        nchannels,
                        ndet,
                        tag.as_ptr(),
                    )
                }
            }
        };

        if code < 0 {
            return Err(EngineError::initialization(code));
        }
        debug!("Engine initialization returned {code}");
        Ok(())
    }

    fn static_analysis(&mut self, input: &StaticInput) -> Result<EngineOutput> {
        let nchannels = input.foreground.len();
        if input.background.len() != nchannels || input.channel_energies.len() != nchannels + 1 {
            return Err(EngineError::LogicError(format!(
                "static analysis buffers disagree: {} foreground, {} background, {} energies",
                nchannels,
                input.background.len(),
                input.channel_energies.len()
            )));
        }
        let mut foreground = input.foreground.clone();
        let mut background = input.background.clone();
        let mut energies = input.channel_energies.clone();
        let mut soi = 0.0_f32;
        let mut rate = 0.0_f32;
        let mut isotopes: *mut c_char = ptr::null_mut();

        // SAFETY: buffers match the channel count the engine was initialized
        // with, energies holding one extra entry.
        let status = unsafe {
            (self.symbols.static_id)(
                input.foreground_live_time,
                input.foreground_real_time,
                foreground.as_mut_ptr(),
                input.background_live_time,
                input.background_real_time,
                background.as_mut_ptr(),
                &mut soi,
                &mut isotopes,
                energies.as_mut_ptr(),
                input.foreground_neutrons,
                input.background_neutrons,
                &mut rate,
            )
        };

        Ok(EngineOutput {
            status,
            isotope_string: self.take_string(isotopes),
            stuff_of_interest: soi,
            rate_not_norm: rate,
            detector_status: Vec::new(),
        })
    }

    fn streaming_search(&mut self, step: AnalysisStep, input: &SearchInput) -> Result<EngineOutput> {
        let ndet = input.live_times.len();
        if input.real_times.len() != ndet
            || input.energy_max.len() != ndet
            || ndet == 0
            || input.counts.len() % ndet != 0
        {
            return Err(EngineError::LogicError(format!(
                "streaming search buffers disagree for {ndet} detectors"
            )));
        }

        let mut live_times = input.live_times.clone();
        let mut real_times = input.real_times.clone();
        let mut counts = input.counts.clone();
        let mut energy_max = input.energy_max.clone();
        let mut detector_status = vec![0_i32; ndet];
        let mut soi = 0.0_f32;
        let mut rate = 0.0_f32;
        let mut isotopes: *mut c_char = ptr::null_mut();

        // SAFETY: buffer sizes match the detector and channel counts the
        // engine was initialized with.
        let status = unsafe {
            (self.symbols.streaming_search)(
                live_times.as_mut_ptr(),
                real_times.as_mut_ptr(),
                counts.as_mut_ptr(),
                &mut soi,
                &mut isotopes,
                energy_max.as_mut_ptr(),
                step.code(),
                detector_status.as_mut_ptr(),
                input.neutrons,
                &mut rate,
            )
        };

        for (det, &code) in detector_status.iter().enumerate() {
            debug!("{step:?} detector {det}: {}", stream_search_status(code));
        }

        Ok(EngineOutput {
            status,
            isotope_string: self.take_string(isotopes),
            stuff_of_interest: soi,
            rate_not_norm: rate,
            detector_status,
        })
    }

    fn current_results(&mut self) -> Result<IdResults> {
        let mut raw = RawIdResult::empty();
        // SAFETY: `raw` matches the engine's result record layout.
        unsafe { (self.symbols.current_results)(&mut raw) };

        let names = split_list(&self.take_string(raw.list_of_isotope_strings));
        let categories = split_list(&self.take_string(raw.list_of_isotope_types));
        let count = usize::try_from(raw.n_isotopes)
            .unwrap_or(0)
            .min(MAX_RESULT_ISOTOPES);

        if names.len() != count || categories.len() != count {
            return Err(EngineError::ResultMismatch(format!(
                "engine reported {count} isotopes with {} names and {} categories",
                names.len(),
                categories.len()
            )));
        }

        let isotopes = names
            .into_iter()
            .zip(categories)
            .enumerate()
            .map(|(i, (name, category))| EngineIsotope {
                name,
                category,
                count_rate: raw.isotope_count_rates[i],
                confidence: raw.isotope_confidences[i],
            })
            .collect();

        Ok(IdResults {
            chi2: raw.chi_sqr,
            alarm_basis_duration: raw.alarm_basis_duration,
            isotopes,
        })
    }

    fn clear_results(&mut self) {
        // SAFETY: takes no arguments.
        unsafe { (self.symbols.clear_results)() };
    }

    fn fit_k40(&mut self, input: &K40Input) -> Result<K40Fit> {
        let nchannels = input.spectrum.len();
        if input.channel_energies.len() != nchannels + 1 {
            return Err(EngineError::LogicError(format!(
                "K40 fit needs {} channel energies, got {}",
                nchannels + 1,
                input.channel_energies.len()
            )));
        }
        let nch = c_count(nchannels, "channels")?;

        let mut energies = input.channel_energies.clone();
        let mut spectrum = input.spectrum.clone();
        let mut rebinned = k40_output_buffer(nchannels);
        let mut centroid = 0.0_f32;

        // SAFETY: inputs hold `nch` and `nch + 1` values; the output holds `nch + 2`.
        let status = unsafe {
            (self.symbols.rebin_k40)(
                nch,
                input.live_time,
                energies.as_mut_ptr(),
                spectrum.as_mut_ptr(),
                rebinned.as_mut_ptr(),
                &mut centroid,
            )
        };

        Ok(K40Fit { status, centroid })
    }
}

/// Output buffer for the K40 rebin call; the library may write two slots
/// past the last channel.
fn k40_output_buffer(nchannels: usize) -> Vec<f32> {
    vec![0.0_f32; nchannels + 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k40_output_buffer_has_two_spare_slots() {
        assert_eq!(k40_output_buffer(1024).len(), 1026);
        assert_eq!(k40_output_buffer(0).len(), 2);
    }

    #[test]
    fn test_missing_library_is_unavailable() {
        let err = NativeEngine::load_from("/nonexistent/libgadras-missing.so")
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
