//! Handoff links that carry a confirmed summary to email or WhatsApp.

use serde::Serialize;
use thiserror::Error;

/// Subject used when the summary does not name one.
pub const DEFAULT_SUBJECT: &str = "New Appointment Request";

/// Handoff link errors.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum HandoffError {
    /// No digits in the destination number.
    #[error("handoff number is missing or contains no digits")]
    MissingNumber,
    /// Destination is not an email address.
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    /// Nothing to send.
    #[error("summary is empty")]
    EmptySummary,
}

/// Convenience result alias for handoff operations.
pub type HandoffResult<T> = Result<T, HandoffError>;

/// Both handoff targets for one summary.
#[derive(Clone, Debug, Serialize)]
pub struct HandoffLinks {
    /// `mailto:` link.
    pub mailto: String,
    /// `wa.me` link, when a number is configured.
    pub whatsapp: Option<String>,
}

/// Subject taken from a `Subject:` line, or [`DEFAULT_SUBJECT`].
#[must_use]
pub fn subject_of(summary: &str) -> &str {
    summary
        .lines()
        .map(str::trim)
        .find_map(|line| {
            let (label, rest) = line.split_once(':')?;
            label
                .trim_matches(|c: char| c == '*' || c.is_whitespace())
                .eq_ignore_ascii_case("subject")
                .then(|| rest.trim().trim_matches('*').trim())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
}

/// Build a `mailto:` link with the summary as body.
///
/// # Errors
/// Returns an error if `to` is not an address or the summary is blank.
pub fn mailto_link(to: &str, summary: &str) -> HandoffResult<String> {
    let to = to.trim();
    if !to.contains('@') || to.contains(char::is_whitespace) {
        return Err(HandoffError::InvalidEmail(to.to_string()));
    }
    let summary = non_blank(summary)?;
    Ok(format!(
        "mailto:{to}?subject={}&body={}",
        urlencoding::encode(subject_of(summary)),
        urlencoding::encode(summary)
    ))
}

/// Build a `https://wa.me/` link with the summary as prefilled text.
///
/// # Errors
/// Returns an error if `number` has no digits or the summary is blank.
pub fn whatsapp_link(number: &str, summary: &str) -> HandoffResult<String> {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(HandoffError::MissingNumber);
    }
    let summary = non_blank(summary)?;
    Ok(format!(
        "https://wa.me/{digits}?text={}",
        urlencoding::encode(summary)
    ))
}

/// Build both links. The WhatsApp link is omitted when `number` is `None`.
///
/// # Errors
/// Returns the first link error.
pub fn handoff_links(email: &str, number: Option<&str>, summary: &str) -> HandoffResult<HandoffLinks> {
    Ok(HandoffLinks {
        mailto: mailto_link(email, summary)?,
        whatsapp: number.map(|n| whatsapp_link(n, summary)).transpose()?,
    })
}

fn non_blank(summary: &str) -> HandoffResult<&str> {
    let summary = summary.trim();
    if summary.is_empty() {
        Err(HandoffError::EmptySummary)
    } else {
        Ok(summary)
    }
}
