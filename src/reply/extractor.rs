//! Splits a model reply around an embedded summary block.
//!
//! Only the first begin marker is a split point and the end marker is the
//! first occurrence after it. Any further markers stay verbatim inside the
//! postamble. Malformed input degrades to a plain reply; parsing never fails.

use crate::reply::markers::SentinelMarkers;

/// Channel note replacing the summary block when a reply is flattened.
pub const CONFIRMATION_NOTE: &str = "[Appointment Confirmed]";

/// Result of scanning a reply for a summary block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParsedReply {
    /// No well-formed block; the whole reply, trimmed.
    Plain(String),
    /// Reply split around the block. Every piece is trimmed.
    Split {
        /// Text before the begin marker.
        pre: String,
        /// Text strictly between the markers.
        body: String,
        /// Text after the end marker.
        post: String,
    },
}

/// One ordered piece of a parsed reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    /// Trimmed text.
    pub text: String,
    /// Whether this is the structured summary.
    pub is_summary: bool,
}

impl Segment {
    const fn plain(text: String) -> Self {
        Self {
            text,
            is_summary: false,
        }
    }
}

impl ParsedReply {
    /// Parse `raw` against `markers`.
    #[must_use]
    pub fn parse(raw: &str, markers: &SentinelMarkers) -> Self {
        let Some(begin_at) = raw.find(markers.begin) else {
            return Self::Plain(raw.trim().to_string());
        };

        let after_begin = &raw[begin_at + markers.begin.len()..];
        let Some(end_at) = after_begin.find(markers.end) else {
            return Self::Plain(raw.trim().to_string());
        };

        Self::Split {
            pre: raw[..begin_at].trim().to_string(),
            body: after_begin[..end_at].trim().to_string(),
            post: after_begin[end_at + markers.end.len()..].trim().to_string(),
        }
    }

    /// The summary body, when the reply carried one.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Split { body, .. } => Some(body),
        }
    }

    /// Ordered display segments.
    ///
    /// Empty preamble and postamble are dropped; the summary is always kept.
    /// A plain reply yields exactly one segment, even when empty.
    #[must_use]
    pub fn into_segments(self) -> Vec<Segment> {
        match self {
            Self::Plain(text) => vec![Segment::plain(text)],
            Self::Split { pre, body, post } => {
                let mut segments = Vec::with_capacity(3);
                if !pre.is_empty() {
                    segments.push(Segment::plain(pre));
                }
                segments.push(Segment {
                    text: body,
                    is_summary: true,
                });
                if !post.is_empty() {
                    segments.push(Segment::plain(post));
                }
                segments
            }
        }
    }

    /// Render for a plain-text channel, replacing the block with a short note.
    #[must_use]
    pub fn flatten_for_channel(&self) -> String {
        match self {
            Self::Plain(text) => text.clone(),
            Self::Split { pre, post, .. } => format!("{pre}\n{CONFIRMATION_NOTE}\n{post}")
                .trim()
                .to_string(),
        }
    }
}

/// Parse and segment in one step.
#[must_use]
pub fn extract_segments(raw: &str, markers: &SentinelMarkers) -> Vec<Segment> {
    ParsedReply::parse(raw, markers).into_segments()
}
