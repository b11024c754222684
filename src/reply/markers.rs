//! Sentinel markers delimiting machine-generated summary blocks.

/// A begin/end pair of sentinel tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SentinelMarkers {
    /// Token opening the summary block.
    pub begin: &'static str,
    /// Token closing the summary block.
    pub end: &'static str,
}

impl SentinelMarkers {
    /// WhatsApp appointment block produced by the widget persona.
    pub const APPOINTMENT: Self = Self {
        begin: "APPOINTMENT_SUMMARY_START",
        end: "APPOINTMENT_SUMMARY_END",
    };

    /// Email-style block produced by the webhook persona.
    pub const EMAIL: Self = Self {
        begin: "EMAIL_SUMMARY_START",
        end: "EMAIL_SUMMARY_END",
    };
}
