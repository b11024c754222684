//! Retry policy for capacity failures.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::llm::backend::{MAX_SUGGESTED_DELAY, RemoteFailure};

/// Retries allowed on the cheapest tier before giving up.
pub const MAX_RETRIES: u32 = 3;
/// Wait used when the failure carries no hint.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);
/// Added on top of every suggested wait.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(1);
/// Pause after switching to the cheapest tier.
pub const DOWNGRADE_PAUSE: Duration = Duration::from_secs(1);

static RETRY_IN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)retry in (\d+(?:\.\d+)?)\s*s").ok());

/// Capacity retry configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Retry ceiling on the cheapest tier.
    pub max_retries: u32,
    /// Wait when no hint is available.
    pub default_wait: Duration,
    /// Margin added to every wait.
    pub safety_margin: Duration,
    /// Pause after a tier downgrade.
    pub downgrade_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            default_wait: DEFAULT_WAIT,
            safety_margin: SAFETY_MARGIN,
            downgrade_pause: DOWNGRADE_PAUSE,
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt after `failure`, margin included.
    ///
    /// Vendor hints are capped at [`MAX_SUGGESTED_DELAY`].
    #[must_use]
    pub fn wait_for(&self, failure: &RemoteFailure) -> Duration {
        let suggested = failure
            .retry_after
            .or_else(|| parse_retry_delay(&failure.detail))
            .map_or(self.default_wait, |hint| hint.min(MAX_SUGGESTED_DELAY));
        suggested.saturating_add(self.safety_margin)
    }
}

/// Parse a "retry in N.Ns" hint, rounding up to whole seconds.
#[must_use]
pub fn parse_retry_delay(detail: &str) -> Option<Duration> {
    let captures = RETRY_IN.as_ref()?.captures(detail)?;
    let seconds: f64 = captures.get(1)?.as_str().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds.ceil()).ok()
}

/// Progress notification emitted while a call is being retried.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StatusUpdate {
    /// Switching to the cheapest tier.
    Downgrading,
    /// About to wait before retrying.
    Waiting {
        /// Whole seconds to wait.
        seconds: u64,
    },
    /// Wait finished; retrying now.
    Retrying,
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downgrading => write!(f, "⚠️ High traffic. Switching to Lite model..."),
            Self::Waiting { seconds } => write!(f, "⏳ High traffic. Waiting {seconds}s..."),
            Self::Retrying => write!(f, "Retrying..."),
        }
    }
}
