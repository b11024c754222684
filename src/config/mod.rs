//! Configuration: stored preferences and environment-driven server settings.

pub mod errors;
pub mod preferences;
pub mod settings;

pub use errors::{ConfigError, ConfigResult};
pub use preferences::{FilePreferenceStore, MemoryPreferenceStore, PreferenceStore, Preferences};
pub use settings::{AuthKeySettings, ServerSettings, resolve_credential};
