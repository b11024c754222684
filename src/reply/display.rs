//! Renderable chat bubbles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reply::extractor::Segment;

/// Who a bubble comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Originator {
    /// The visitor.
    User,
    /// The consultant model.
    Assistant,
    /// A failure surfaced to the visitor.
    SystemError,
}

/// One chat bubble.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayUnit {
    /// Unique identifier.
    pub id: Uuid,
    /// Text content.
    pub text: String,
    /// Originator.
    pub originator: Originator,
    /// Creation timestamp; restamped when a presenter inserts the unit.
    pub created_at: DateTime<Utc>,
    /// Whether the bubble is a structured appointment summary.
    #[serde(default)]
    pub is_summary: bool,
}

impl DisplayUnit {
    fn new(text: impl Into<String>, originator: Originator, is_summary: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            originator,
            created_at: Utc::now(),
            is_summary,
        }
    }

    /// Bubble for something the visitor typed.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, Originator::User, false)
    }

    /// Plain assistant bubble.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(text, Originator::Assistant, false)
    }

    /// Bubble describing a failure.
    #[must_use]
    pub fn system_error(text: impl Into<String>) -> Self {
        Self::new(text, Originator::SystemError, false)
    }

    /// Assistant bubble built from an extracted segment.
    #[must_use]
    pub fn from_segment(segment: Segment) -> Self {
        Self::new(segment.text, Originator::Assistant, segment.is_summary)
    }
}
