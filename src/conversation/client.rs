//! Conversation client with capacity retry and tier downgrade.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::preferences::PreferenceStore;
use crate::conversation::errors::{ConversationError, ConversationResult};
use crate::conversation::retry::{RetryPolicy, StatusUpdate};
use crate::llm::backend::{ChatBackend, ChatSession, ConversationTurn, SessionRequest};
use crate::llm::tier::ModelTier;

/// Optional receiver for retry progress.
pub type StatusSink<'a> = Option<&'a (dyn Fn(StatusUpdate) + Send + Sync)>;

/// Construction parameters for [`ConversationClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API credential. `None` makes every send fail with a configuration error.
    pub credential: Option<String>,
    /// Initial tier.
    pub tier: ModelTier,
    /// System prompt applied to every session.
    pub system_prompt: String,
    /// Capacity retry policy.
    pub policy: RetryPolicy,
}

impl ClientConfig {
    /// Config with no credential on the default tier.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            credential: None,
            tier: ModelTier::default(),
            system_prompt: system_prompt.into(),
            policy: RetryPolicy::default(),
        }
    }

    /// Builder: set the credential.
    #[must_use]
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    /// Builder: set the initial tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    /// Builder: set the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Delivers user messages to the remote model.
///
/// The session is opened lazily on the first send. Capacity failures on a
/// non-cheapest tier trigger a single switch to the cheapest tier, which is
/// persisted through the preference store. Capacity failures on the cheapest
/// tier are retried up to the policy ceiling.
pub struct ConversationClient {
    backend: Arc<dyn ChatBackend>,
    preferences: Arc<dyn PreferenceStore>,
    credential: Option<String>,
    tier: ModelTier,
    system_prompt: String,
    policy: RetryPolicy,
    session: Option<Box<dyn ChatSession>>,
}

impl ConversationClient {
    /// Create a client. No remote call is made until the first send.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        preferences: Arc<dyn PreferenceStore>,
        config: ClientConfig,
    ) -> Self {
        Self {
            backend,
            preferences,
            credential: config.credential,
            tier: config.tier,
            system_prompt: config.system_prompt,
            policy: config.policy,
            session: None,
        }
    }

    /// Send one message and return the full reply text.
    ///
    /// # Errors
    /// - [`ConversationError::Configuration`] if no credential is available
    /// - [`ConversationError::CapacityExceeded`] once retries on the cheapest tier run out
    /// - [`ConversationError::Remote`] on any other failure, without retrying
    pub async fn send(&mut self, message: &str, status: StatusSink<'_>) -> ConversationResult<String> {
        let mut attempt: u32 = 0;

        loop {
            let outcome = self.ensure_session()?.send_message(message).await;
            let failure = match outcome {
                Ok(reply) => return Ok(reply),
                Err(failure) if !failure.is_capacity() => {
                    warn!(error = %failure, tier = %self.tier, "Remote call failed");
                    return Err(ConversationError::Remote(failure));
                }
                Err(failure) => failure,
            };

            if !self.tier.is_cheapest() {
                self.downgrade(status)?;
                attempt = 0;
                tokio::time::sleep(self.policy.downgrade_pause).await;
                continue;
            }

            attempt += 1;
            if attempt > self.policy.max_retries {
                warn!(attempts = self.policy.max_retries, "Capacity retries exhausted");
                return Err(ConversationError::CapacityExceeded {
                    attempts: self.policy.max_retries,
                    source: failure,
                });
            }

            let wait = self.policy.wait_for(&failure);
            warn!(attempt, wait_secs = wait.as_secs(), detail = %failure.detail, "Capacity failure, waiting");
            notify(status, StatusUpdate::Waiting { seconds: wait.as_secs() });
            tokio::time::sleep(wait).await;
            notify(status, StatusUpdate::Retrying);
        }
    }

    /// Drop the active session. The next send opens a fresh one.
    pub fn reset_session(&mut self) {
        if self.session.take().is_some() {
            debug!("Chat session reset");
        }
    }

    /// Replace the credential and reset the session.
    pub fn set_credential(&mut self, credential: Option<String>) {
        self.credential = credential;
        self.reset_session();
    }

    /// Switch tier and reset the session.
    pub fn set_tier(&mut self, tier: ModelTier) {
        self.tier = tier;
        self.reset_session();
    }

    /// Active tier.
    #[must_use]
    pub const fn tier(&self) -> ModelTier {
        self.tier
    }

    /// Turns completed in the active session.
    #[must_use]
    pub fn history(&self) -> &[ConversationTurn] {
        self.session
            .as_deref()
            .map_or(&[][..], ChatSession::history)
    }

    fn ensure_session(&mut self) -> ConversationResult<&mut Box<dyn ChatSession>> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.open(Vec::new())?,
        };
        Ok(self.session.insert(session))
    }

    fn open(&self, history: Vec<ConversationTurn>) -> ConversationResult<Box<dyn ChatSession>> {
        let credential = self
            .credential
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ConversationError::Configuration("API credential is missing".to_string()))?;

        let session = self
            .backend
            .open_session(SessionRequest {
                credential: credential.to_string(),
                tier: self.tier,
                system_prompt: self.system_prompt.clone(),
                history,
            })
            .map_err(|failure| ConversationError::Configuration(failure.detail))?;

        info!(model = session.tier().model_id(), "Chat initialized");
        Ok(session)
    }

    fn downgrade(&mut self, status: StatusSink<'_>) -> ConversationResult<()> {
        warn!(from = %self.tier, to = %ModelTier::CHEAPEST, "High traffic, switching tier");
        notify(status, StatusUpdate::Downgrading);

        let history = self.history().to_vec();
        self.tier = ModelTier::CHEAPEST;
        self.session = Some(self.open(history)?);

        if let Err(err) = self.preferences.update(&|p| p.use_lite = true) {
            warn!(error = %err, "Failed to persist tier preference");
        }
        Ok(())
    }
}

fn notify(status: StatusSink<'_>, update: StatusUpdate) {
    if let Some(sink) = status {
        sink(update);
    }
}
