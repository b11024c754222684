//! Model tiers exposed by the remote chat API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Model identifier used for the standard tier.
pub const STANDARD_MODEL: &str = "gemini-2.5-flash";
/// Model identifier used for the lite tier.
pub const LITE_MODEL: &str = "gemini-flash-lite-latest";

/// A named remote-model variant trading cost and speed against capability.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Full capability model.
    Standard,
    /// Cheapest model, used by default and as the overload fallback.
    #[default]
    Lite,
}

impl ModelTier {
    /// The cheapest tier available.
    pub const CHEAPEST: Self = Self::Lite;

    /// Map a stored `use_lite` preference onto a tier.
    #[must_use]
    pub const fn from_use_lite(use_lite: bool) -> Self {
        if use_lite { Self::Lite } else { Self::Standard }
    }

    /// Remote model identifier for this tier.
    #[must_use]
    pub const fn model_id(self) -> &'static str {
        match self {
            Self::Standard => STANDARD_MODEL,
            Self::Lite => LITE_MODEL,
        }
    }

    /// Whether this is already the cheapest tier.
    #[must_use]
    pub const fn is_cheapest(self) -> bool {
        matches!(self, Self::Lite)
    }

    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Lite => "lite",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "lite" => Ok(Self::Lite),
            other => Err(other.to_string()),
        }
    }
}
