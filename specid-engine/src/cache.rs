//! Tracks which configuration is loaded into the engine.

use crate::engine::{EngineConfig, IdentificationEngine};
use crate::Result;
use log::{debug, error, info};
use std::path::{Path, PathBuf};

/// Re-initializes the engine only when the requested configuration differs
/// from the one currently loaded.
///
/// Owned by the thread that owns the engine.
#[derive(Debug)]
pub struct EngineStateCache {
    app_dir: PathBuf,
    current: Option<EngineConfig>,
}

impl EngineStateCache {
    /// Creates an empty cache; the engine is considered uninitialized.
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            current: None,
        }
    }

    /// Engine application directory passed to every initialization.
    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Configuration currently loaded, if any.
    pub fn current(&self) -> Option<&EngineConfig> {
        self.current.as_ref()
    }

    /// Forgets the loaded configuration so the next request re-initializes.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    /// Makes sure `engine` is configured for `config`.
    ///
    /// # Errors
    /// Returns the engine's initialization error; the cache is then left
    /// uninitialized.
    pub fn ensure<E>(&mut self, engine: &mut E, config: &EngineConfig) -> Result<()>
    where
        E: IdentificationEngine + ?Sized,
    {
        if self.current.as_ref() == Some(config) {
            debug!("Engine already configured for '{}'", config.drf);
            return Ok(());
        }

        self.current = None;
        match engine.configure(&self.app_dir, config) {
            Ok(()) => {
                info!(
                    "Initialized engine with DRF '{}' ({} channels, {} detectors, {:?})",
                    config.drf, config.num_channels, config.num_detectors, config.mode
                );
                self.current = Some(config.clone());
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize engine with DRF '{}': {e}", config.drf);
                Err(e)
            }
        }
    }
}
