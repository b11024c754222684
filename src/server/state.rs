//! Application state shared across all request handlers.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::errors::{ConfigError, ConfigResult};
use crate::config::preferences::{FilePreferenceStore, PreferenceStore, Preferences};
use crate::config::settings::ServerSettings;
use crate::conversation::client::{ClientConfig, ConversationClient};
use crate::llm::backend::ChatBackend;
use crate::llm::gemini::GeminiBackend;
use crate::llm::prompt::{webhook_system_prompt, widget_system_prompt};
use crate::reply::markers::SentinelMarkers;
use crate::widget::ChatWidget;

/// Conversation client shared between webhook requests from one sender.
pub type SharedClient = Arc<tokio::sync::Mutex<ConversationClient>>;

/// Shared application state.
pub struct AppState {
    /// Settings read at startup.
    pub settings: ServerSettings,
    backend: Arc<dyn ChatBackend>,
    preferences: Arc<dyn PreferenceStore>,
    widgets: Mutex<LruCache<Uuid, Arc<ChatWidget>>>,
    webhook_sessions: Mutex<LruCache<String, SharedClient>>,
    http: reqwest::Client,
}

impl AppState {
    /// Build state from settings: Gemini backend and a JSON preference file.
    ///
    /// # Errors
    /// Returns an error if the backend or HTTP client cannot be created.
    pub fn from_settings(
        settings: ServerSettings,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let backend = GeminiBackend::new(settings.gemini_base_url.as_deref())
            .map_err(|e| format!("Failed to create Gemini client: {e}"))?;
        let preferences = FilePreferenceStore::new(&settings.preferences_path);
        Ok(Self::new(settings, Arc::new(backend), Arc::new(preferences))?)
    }

    /// Build state from explicit parts.
    ///
    /// # Errors
    /// Returns an error if a session capacity is zero or the HTTP client cannot be built.
    pub fn new(
        settings: ServerSettings,
        backend: Arc<dyn ChatBackend>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> ConfigResult<Arc<Self>> {
        let widget_capacity = capacity(settings.max_widget_sessions)?;
        let webhook_capacity = capacity(settings.max_webhook_sessions)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

        Ok(Arc::new(Self {
            settings,
            backend,
            preferences,
            widgets: Mutex::new(LruCache::new(widget_capacity)),
            webhook_sessions: Mutex::new(LruCache::new(webhook_capacity)),
            http,
        }))
    }

    /// Current preferences. Falls back to defaults if the store cannot be read.
    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.preferences.load().unwrap_or_else(|err| {
            warn!(error = %err, "Failed to load preferences, using defaults");
            Preferences::default()
        })
    }

    /// Edit stored preferences under the store lock and return the result.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub fn update_preferences(&self, edit: &dyn Fn(&mut Preferences)) -> ConfigResult<Preferences> {
        self.preferences.update(edit)
    }

    /// Credential in effect: stored first, then environment.
    #[must_use]
    pub fn credential(&self) -> Option<String> {
        self.settings
            .resolve_credential(self.preferences().credential())
    }

    /// WhatsApp handoff number: stored first, then environment.
    #[must_use]
    pub fn handoff_number(&self) -> Option<String> {
        self.preferences()
            .handoff_number
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.settings.handoff_number.clone())
    }

    /// Create and register a widget session.
    #[must_use]
    pub fn create_widget(&self) -> (Uuid, Arc<ChatWidget>) {
        let preferences = self.preferences();
        let markers = SentinelMarkers::APPOINTMENT;
        let config = ClientConfig::new(widget_system_prompt(&markers))
            .with_credential(self.settings.resolve_credential(preferences.credential()))
            .with_tier(preferences.tier());
        let client = ConversationClient::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.preferences),
            config,
        );

        let id = Uuid::new_v4();
        let widget = Arc::new(ChatWidget::new(client, markers));
        let evicted = lock(&self.widgets).push(id, Arc::clone(&widget));
        if let Some((old, _)) = evicted.filter(|(old, _)| *old != id) {
            debug!(session = %old, "Evicted idle widget session");
        }
        (id, widget)
    }

    /// Look up a widget session.
    #[must_use]
    pub fn widget(&self, id: &Uuid) -> Option<Arc<ChatWidget>> {
        lock(&self.widgets).get(id).cloned()
    }

    /// All live widget sessions.
    #[must_use]
    pub fn widgets(&self) -> Vec<Arc<ChatWidget>> {
        lock(&self.widgets)
            .iter()
            .map(|(_, widget)| Arc::clone(widget))
            .collect()
    }

    /// Conversation client for a webhook sender, created on first contact.
    #[must_use]
    pub fn webhook_client(&self, sender: &str) -> SharedClient {
        let mut sessions = lock(&self.webhook_sessions);
        if let Some(client) = sessions.get(sender) {
            return Arc::clone(client);
        }

        let config = ClientConfig::new(webhook_system_prompt(
            &SentinelMarkers::EMAIL,
            &self.settings.company_email,
        ))
        .with_credential(self.credential())
        .with_tier(self.settings.webhook_tier);
        let client = Arc::new(tokio::sync::Mutex::new(ConversationClient::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.preferences),
            config,
        )));
        debug!(sender, "New webhook conversation");
        sessions.put(sender.to_string(), Arc::clone(&client));
        client
    }

    /// Drop every webhook conversation.
    pub fn reset_webhook_sessions(&self) {
        lock(&self.webhook_sessions).clear();
    }

    /// Outbound HTTP client.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

fn capacity(value: usize) -> ConfigResult<NonZeroUsize> {
    NonZeroUsize::new(value)
        .ok_or_else(|| ConfigError::Invalid("session capacity must be positive".to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
