//! Remote chat API boundary.
//!
//! The conversation client only needs two capabilities from a vendor:
//! open a session bound to a system prompt and model tier, then send
//! messages within it. Failures are classified so the retry policy can
//! tell capacity signals apart from everything else.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::tier::ModelTier;

/// Longest vendor-suggested retry delay honoured.
pub const MAX_SUGGESTED_DELAY: Duration = Duration::from_secs(3_600);

/// Boxed future type for chat session operations.
pub type ChatFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Class of a remote failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// Rate limiting or temporary overload.
    Capacity,
    /// Anything else (validation, auth, transport, malformed response).
    Other,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity => write!(f, "capacity"),
            Self::Other => write!(f, "remote"),
        }
    }
}

/// Failure reported by a chat backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{class} failure: {detail}")]
pub struct RemoteFailure {
    /// Machine-readable class.
    pub class: FailureClass,
    /// Human-readable detail as returned by the vendor.
    pub detail: String,
    /// Delay suggested by the vendor, when it sent one.
    pub retry_after: Option<Duration>,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
}

impl RemoteFailure {
    /// Build a capacity-class failure.
    #[must_use]
    pub fn capacity(detail: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Capacity,
            detail: detail.into(),
            retry_after: None,
            status: None,
        }
    }

    /// Build a non-capacity failure.
    #[must_use]
    pub fn other(detail: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Other,
            detail: detail.into(),
            retry_after: None,
            status: None,
        }
    }

    /// Attach a vendor-suggested retry delay.
    #[must_use]
    pub const fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Attach the HTTP status the failure came from.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the failure is a rate-limit or overload signal.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self.class, FailureClass::Capacity)
    }
}

impl From<reqwest::Error> for RemoteFailure {
    fn from(err: reqwest::Error) -> Self {
        let failure = Self::other(format!("http client error: {err}"));
        match err.status() {
            Some(status) => failure.with_status(status.as_u16()),
            None => failure,
        }
    }
}

/// A single completed exchange within a session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Text the visitor sent.
    pub input: String,
    /// Text the model replied with.
    pub output: String,
    /// Tier that produced the reply.
    pub tier: ModelTier,
}

impl ConversationTurn {
    /// Build a turn.
    #[must_use]
    pub fn new(input: impl Into<String>, output: impl Into<String>, tier: ModelTier) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            tier,
        }
    }
}

/// Everything a backend needs to open a session.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    /// API credential.
    pub credential: String,
    /// Tier the session runs on.
    pub tier: ModelTier,
    /// Fixed system prompt for the session.
    pub system_prompt: String,
    /// Prior turns to seed the session with (used when switching tiers).
    pub history: Vec<ConversationTurn>,
}

/// Stateful handle on the remote model.
pub trait ChatSession: Send {
    /// Send one message and return the full text reply.
    ///
    /// # Errors
    /// Returns a classified [`RemoteFailure`] if the call fails.
    fn send_message<'a>(&'a mut self, message: &'a str)
    -> ChatFuture<'a, Result<String, RemoteFailure>>;

    /// Tier this session runs on.
    fn tier(&self) -> ModelTier;

    /// Turns completed so far.
    fn history(&self) -> &[ConversationTurn];
}

/// Factory for chat sessions.
pub trait ChatBackend: Send + Sync {
    /// Open a session.
    ///
    /// # Errors
    /// Returns a failure if the session cannot be configured (e.g. bad credential format).
    fn open_session(&self, request: SessionRequest) -> Result<Box<dyn ChatSession>, RemoteFailure>;
}
