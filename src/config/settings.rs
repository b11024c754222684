//! Process settings read from the environment at startup.

use std::path::PathBuf;

use tracing::warn;

use crate::config::errors::{ConfigError, ConfigResult};
use crate::llm::tier::ModelTier;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default directory served for unmatched paths.
pub const DEFAULT_STATIC_DIR: &str = "static";
/// Default preference file.
pub const DEFAULT_PREFERENCES_PATH: &str = "hub_concierge.json";
/// Default recipient for emailed appointment summaries.
pub const DEFAULT_COMPANY_EMAIL: &str = "appointments@digitalhub.example";
/// Build-time placeholder that must never be treated as a real key.
pub const CREDENTIAL_PLACEHOLDER: &str = "__GENAI_API_KEY__";
/// AuthKey SMS/WhatsApp request endpoint.
pub const AUTHKEY_ENDPOINT: &str = "https://api.authkey.io/request";
/// Default country code for AuthKey delivery.
pub const DEFAULT_COUNTRY_CODE: &str = "233";

/// Credentials for outbound AuthKey delivery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthKeySettings {
    /// Account token.
    pub token: String,
    /// Sender id shown to the recipient.
    pub sender_id: String,
    /// Country code prefix.
    pub country_code: String,
    /// Request endpoint.
    pub endpoint: String,
}

/// Server settings.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// Listening port.
    pub port: u16,
    /// Static asset directory.
    pub static_dir: PathBuf,
    /// Preference file path.
    pub preferences_path: PathBuf,
    /// Override for the Gemini API base URL.
    pub gemini_base_url: Option<String>,
    /// Credential from the environment, used when none is stored.
    pub env_credential: Option<String>,
    /// Recipient of emailed summaries from the webhook relay.
    pub company_email: String,
    /// Default WhatsApp handoff number.
    pub handoff_number: Option<String>,
    /// Outbound delivery; `None` means test mode.
    pub authkey: Option<AuthKeySettings>,
    /// Tier used by webhook conversations.
    pub webhook_tier: ModelTier,
    /// Maximum live widget sessions.
    pub max_widget_sessions: usize,
    /// Maximum live webhook conversations.
    pub max_webhook_sessions: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            preferences_path: PathBuf::from(DEFAULT_PREFERENCES_PATH),
            gemini_base_url: None,
            env_credential: None,
            company_email: DEFAULT_COMPANY_EMAIL.to_string(),
            handoff_number: None,
            authkey: None,
            webhook_tier: ModelTier::CHEAPEST,
            max_widget_sessions: 1024,
            max_webhook_sessions: 1024,
        }
    }
}

impl ServerSettings {
    /// Read settings from process environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns an error if a variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let port = var("HUB_PORT")
            .map(|raw| {
                raw.parse::<u16>()
                    .map_err(|_| ConfigError::Invalid(format!("HUB_PORT is not a port: {raw}")))
            })
            .transpose()?
            .unwrap_or(defaults.port);

        let webhook_tier = var("HUB_WEBHOOK_TIER")
            .map(|raw| {
                raw.parse::<ModelTier>().map_err(|other| {
                    ConfigError::Invalid(format!("HUB_WEBHOOK_TIER is not a tier: {other}"))
                })
            })
            .transpose()?
            .unwrap_or(defaults.webhook_tier);

        let authkey = var("AUTHKEY_AUTH_TOKEN").map(|token| AuthKeySettings {
            token,
            sender_id: var("AUTHKEY_SENDER_ID").unwrap_or_default(),
            country_code: var("AUTHKEY_COUNTRY_CODE")
                .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string()),
            endpoint: AUTHKEY_ENDPOINT.to_string(),
        });

        let settings = Self {
            port,
            static_dir: var("HUB_STATIC_DIR").map_or(defaults.static_dir, PathBuf::from),
            preferences_path: var("HUB_PREFERENCES_PATH")
                .map_or(defaults.preferences_path, PathBuf::from),
            gemini_base_url: var("HUB_GEMINI_URL"),
            env_credential: var("GEMINI_API_KEY")
                .or_else(|| var("API_KEY"))
                .filter(|c| c != CREDENTIAL_PLACEHOLDER),
            company_email: var("HUB_COMPANY_EMAIL").unwrap_or(defaults.company_email),
            handoff_number: var("HUB_HANDOFF_NUMBER"),
            authkey,
            webhook_tier,
            ..defaults
        };
        settings.validate()?;

        if settings.authkey.is_none() {
            warn!("AUTHKEY_AUTH_TOKEN not set; webhook replies will only be logged");
        }
        Ok(settings)
    }

    /// Builder: set the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder: set the environment credential.
    #[must_use]
    pub fn with_env_credential(mut self, credential: impl Into<String>) -> Self {
        self.env_credential = Some(credential.into());
        self
    }

    /// Builder: set the static asset directory.
    #[must_use]
    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = dir.into();
        self
    }

    /// Validate settings.
    ///
    /// # Errors
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.company_email.contains('@') {
            return Err(ConfigError::Invalid(format!(
                "company email is not an address: {}",
                self.company_email
            )));
        }
        if self.max_widget_sessions == 0 || self.max_webhook_sessions == 0 {
            return Err(ConfigError::Invalid(
                "session capacities must be positive".to_string(),
            ));
        }
        if let Some(url) = &self.gemini_base_url {
            url::Url::parse(url)?;
        }
        Ok(())
    }

    /// Pick the credential to use: stored first, then environment.
    #[must_use]
    pub fn resolve_credential(&self, stored: Option<&str>) -> Option<String> {
        resolve_credential(stored, self.env_credential.as_deref())
    }
}

/// Pick the first usable credential. Blank values and the build placeholder are skipped.
#[must_use]
pub fn resolve_credential(stored: Option<&str>, env: Option<&str>) -> Option<String> {
    [stored, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|c| !c.is_empty() && *c != CREDENTIAL_PLACEHOLDER)
        .map(str::to_string)
}
