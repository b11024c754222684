//! Local key/value preferences: credential, tier choice, handoff number.
//!
//! Written by the settings endpoint and by the automatic tier downgrade.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::errors::ConfigResult;
use crate::llm::tier::ModelTier;

/// Stored user preferences.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// API credential entered by the user.
    pub credential: Option<String>,
    /// Prefer the cheapest model tier.
    pub use_lite: bool,
    /// Destination number for the WhatsApp handoff link.
    pub handoff_number: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            credential: None,
            use_lite: true,
            handoff_number: None,
        }
    }
}

impl Preferences {
    /// Tier implied by `use_lite`.
    #[must_use]
    pub const fn tier(&self) -> ModelTier {
        ModelTier::from_use_lite(self.use_lite)
    }

    /// Stored credential, ignoring blank values.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.credential
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Persistence for [`Preferences`].
pub trait PreferenceStore: Send + Sync {
    /// Load preferences, falling back to defaults when nothing is stored.
    ///
    /// # Errors
    /// Returns an error if stored preferences cannot be read or parsed.
    fn load(&self) -> ConfigResult<Preferences>;

    /// Replace stored preferences.
    ///
    /// # Errors
    /// Returns an error if preferences cannot be written.
    fn save(&self, preferences: &Preferences) -> ConfigResult<()>;

    /// Load, edit and save as one step.
    ///
    /// # Errors
    /// Returns an error if loading or saving fails.
    fn update(&self, edit: &dyn Fn(&mut Preferences)) -> ConfigResult<Preferences>;
}

/// JSON file store.
pub struct FilePreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferenceStore {
    /// Create a store backed by `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> ConfigResult<Preferences> {
        if !self.path.exists() {
            return Ok(Preferences::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Preferences::default());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, preferences: &Preferences) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(preferences)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Preferences saved");
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> ConfigResult<Preferences> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read()
    }

    fn save(&self, preferences: &Preferences) -> ConfigResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(preferences)
    }

    fn update(&self, edit: &dyn Fn(&mut Preferences)) -> ConfigResult<Preferences> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut preferences = self.read()?;
        edit(&mut preferences);
        self.write(&preferences)?;
        Ok(preferences)
    }
}

/// Process-local store, used when no file is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    preferences: Mutex<Preferences>,
}

impl MemoryPreferenceStore {
    /// Create a store holding `preferences`.
    #[must_use]
    pub const fn new(preferences: Preferences) -> Self {
        Self {
            preferences: Mutex::new(preferences),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> ConfigResult<Preferences> {
        Ok(self
            .preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, preferences: &Preferences) -> ConfigResult<()> {
        *self
            .preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = preferences.clone();
        Ok(())
    }

    fn update(&self, edit: &dyn Fn(&mut Preferences)) -> ConfigResult<Preferences> {
        let mut guard = self
            .preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        edit(&mut guard);
        Ok(guard.clone())
    }
}
