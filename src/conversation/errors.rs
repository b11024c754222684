//! Error types for the conversation client.

use thiserror::Error;

use crate::llm::backend::RemoteFailure;

/// Bubble shown when no credential is configured.
pub const SETUP_PROMPT: &str =
    "I'm not connected yet. Please add your API key in Settings to start chatting.";
/// Bubble shown when capacity retries ran out.
pub const TRY_LATER: &str =
    "We're experiencing very high traffic right now. Please try again in a few minutes.";
/// Bubble shown for any other remote failure.
pub const CONNECTION_TROUBLE: &str = "I apologize, I'm having trouble connecting to the server. Please check your internet connection.";

/// Terminal outcome of a conversation turn that did not produce a reply.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// No usable credential, or the session could not be configured.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Capacity failures persisted past the retry ceiling.
    #[error("capacity exceeded after {attempts} retries: {source}")]
    CapacityExceeded {
        /// Retries performed on the cheapest tier.
        attempts: u32,
        /// Last failure observed.
        source: RemoteFailure,
    },
    /// Non-capacity remote failure.
    #[error(transparent)]
    Remote(#[from] RemoteFailure),
}

impl ConversationError {
    /// Text for the single error bubble shown to the user.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Configuration(_) => SETUP_PROMPT,
            Self::CapacityExceeded { .. } => TRY_LATER,
            Self::Remote(_) => CONNECTION_TROUBLE,
        }
    }

    /// Whether the failure was caused by remote overload.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Convenience result alias for conversation operations.
pub type ConversationResult<T> = Result<T, ConversationError>;
