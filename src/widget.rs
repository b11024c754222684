//! Chat widget: ties a conversation client to a staggered conversation view.

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::conversation::client::{ConversationClient, StatusSink};
use crate::llm::prompt::WELCOME_TRIGGER;
use crate::llm::tier::ModelTier;
use crate::reply::display::DisplayUnit;
use crate::reply::extractor::extract_segments;
use crate::reply::markers::SentinelMarkers;
use crate::reply::presenter::{ConversationView, DisplaySink, ScheduledUnit, StaggeredPresenter};

/// Shown when the generated welcome cannot be fetched.
pub const FALLBACK_WELCOME: &str =
    "Hi there! Welcome to our Digital Hub. I'm here to help you get started. What is your name?";

type Observer = Box<dyn Fn(&DisplayUnit) + Send + Sync>;

struct ObservedView {
    view: ConversationView,
    observer: Option<Observer>,
}

impl DisplaySink for ObservedView {
    fn insert(&self, unit: DisplayUnit) {
        if let Some(observer) = &self.observer {
            observer(&unit);
        }
        self.view.insert(unit);
    }
}

/// One visitor's chat.
///
/// Turns are serialised: a second `send` waits until the first one has
/// scheduled its reply. Every turn ends with at least one visible bubble.
pub struct ChatWidget {
    client: Mutex<ConversationClient>,
    view: ConversationView,
    presenter: StaggeredPresenter,
    markers: SentinelMarkers,
}

impl ChatWidget {
    /// Create a widget. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(client: ConversationClient, markers: SentinelMarkers) -> Self {
        Self::build(client, markers, None)
    }

    /// Create a widget that also reports every inserted bubble to `observer`.
    #[must_use]
    pub fn with_observer(
        client: ConversationClient,
        markers: SentinelMarkers,
        observer: impl Fn(&DisplayUnit) + Send + Sync + 'static,
    ) -> Self {
        Self::build(client, markers, Some(Box::new(observer)))
    }

    fn build(client: ConversationClient, markers: SentinelMarkers, observer: Option<Observer>) -> Self {
        let view = ConversationView::new();
        let presenter = StaggeredPresenter::spawn(ObservedView {
            view: view.clone(),
            observer,
        });
        Self {
            client: Mutex::new(client),
            view,
            presenter,
            markers,
        }
    }

    /// Open the conversation on the visitor's behalf.
    ///
    /// Falls back to a fixed greeting when the model cannot be reached.
    pub async fn welcome(&self) -> Vec<ScheduledUnit> {
        let outcome = self.client.lock().await.send(WELCOME_TRIGGER, None).await;
        let units = outcome.map_or_else(
            |err| {
                warn!(error = %err, "Welcome failed, using fallback greeting");
                vec![DisplayUnit::assistant(FALLBACK_WELCOME)]
            },
            |raw| self.reply_units(&raw),
        );
        self.presenter.present(units)
    }

    /// Send a visitor message. Blank input is ignored.
    pub async fn send(&self, text: &str) -> Vec<ScheduledUnit> {
        self.send_with_status(text, None).await
    }

    /// Like [`Self::send`], reporting retry progress to `status`.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn send_with_status(&self, text: &str, status: StatusSink<'_>) -> Vec<ScheduledUnit> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Held until the reply is queued so a concurrent turn cannot interleave.
        let mut client = self.client.lock().await;
        self.presenter.present_now(DisplayUnit::user(text));

        let units = client.send(text, status).await.map_or_else(
            |err| {
                warn!(error = %err, "Turn failed");
                vec![DisplayUnit::system_error(err.user_message())]
            },
            |raw| self.reply_units(&raw),
        );
        self.presenter.present(units)
    }

    /// Visible conversation so far.
    #[must_use]
    pub fn messages(&self) -> Vec<DisplayUnit> {
        self.view.snapshot()
    }

    /// Most recent summary bubble, if one has been shown.
    #[must_use]
    pub fn latest_summary(&self) -> Option<String> {
        self.view
            .snapshot()
            .into_iter()
            .rev()
            .find(|unit| unit.is_summary)
            .map(|unit| unit.text)
    }

    /// Apply new settings. The next turn opens a fresh session.
    pub async fn reconfigure(&self, credential: Option<String>, tier: ModelTier) {
        {
            let mut client = self.client.lock().await;
            client.set_credential(credential);
            client.set_tier(tier);
        }
        info!(%tier, "Widget reconfigured");
    }

    fn reply_units(&self, raw: &str) -> Vec<DisplayUnit> {
        extract_segments(raw, &self.markers)
            .into_iter()
            .map(DisplayUnit::from_segment)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, PoisonError};
    use std::time::Duration;

    use super::*;
    use crate::config::preferences::MemoryPreferenceStore;
    use crate::conversation::client::ClientConfig;
    use crate::conversation::errors::{CONNECTION_TROUBLE, SETUP_PROMPT, TRY_LATER};
    use crate::llm::backend::RemoteFailure;
    use crate::llm::backend::testing::ScriptedBackend;
    use crate::reply::display::Originator;

    fn widget(backend: &ScriptedBackend, credential: Option<&str>) -> ChatWidget {
        let client = ConversationClient::new(
            Arc::new(backend.clone()),
            Arc::new(MemoryPreferenceStore::default()),
            ClientConfig::new("prompt").with_credential(credential.map(str::to_string)),
        );
        ChatWidget::new(client, SentinelMarkers::APPOINTMENT)
    }

    fn settle() -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_secs(5))
    }

    fn shown(widget: &ChatWidget) -> Vec<(Originator, String, bool)> {
        widget
            .messages()
            .into_iter()
            .map(|u| (u.originator, u.text, u.is_summary))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_welcome_presents_generated_greeting() {
        let backend = ScriptedBackend::new().then_ok("👋 Welcome! What's your name?");
        let widget = widget(&backend, Some("key"));

        widget.welcome().await;
        settle().await;

        assert_eq!(
            shown(&widget),
            vec![(Originator::Assistant, "👋 Welcome! What's your name?".to_string(), false)]
        );
        assert_eq!(backend.calls()[0].1, WELCOME_TRIGGER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_welcome_falls_back_on_failure() {
        let backend = ScriptedBackend::new();
        let widget = widget(&backend, None);

        widget.welcome().await;
        settle().await;

        assert_eq!(
            shown(&widget),
            vec![(Originator::Assistant, FALLBACK_WELCOME.to_string(), false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_input_is_ignored() {
        let backend = ScriptedBackend::new();
        let widget = widget(&backend, Some("key"));

        assert!(widget.send("   \n").await.is_empty());
        settle().await;

        assert!(widget.messages().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_reply_is_split_and_staggered() {
        let reply = "Perfect, generating it now! APPOINTMENT_SUMMARY_START 📅 *New Appointment Request* APPOINTMENT_SUMMARY_END Tap the button below.";
        let backend = ScriptedBackend::new().then_ok(reply);
        let widget = widget(&backend, Some("key"));

        let scheduled = widget.send("Yes, that's correct").await;
        let delays: Vec<u64> = scheduled.iter().map(|s| s.delay_ms).collect();
        assert_eq!(delays, vec![0, 500, 1000]);

        settle().await;
        assert_eq!(
            shown(&widget),
            vec![
                (Originator::User, "Yes, that's correct".to_string(), false),
                (Originator::Assistant, "Perfect, generating it now!".to_string(), false),
                (Originator::Assistant, "📅 *New Appointment Request*".to_string(), true),
                (Originator::Assistant, "Tap the button below.".to_string(), false),
            ]
        );
        assert_eq!(
            widget.latest_summary().as_deref(),
            Some("📅 *New Appointment Request*")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_show_one_error_bubble() {
        let cases = [
            (ScriptedBackend::new(), None, SETUP_PROMPT),
            (
                ScriptedBackend::new().then_fail(RemoteFailure::other("400")),
                Some("key"),
                CONNECTION_TROUBLE,
            ),
            (
                ScriptedBackend::new().otherwise_fail(RemoteFailure::capacity("429")),
                Some("key"),
                TRY_LATER,
            ),
        ];

        for (backend, credential, expected) in cases {
            let widget = widget(&backend, credential);
            widget.send("hello").await;
            tokio::time::sleep(Duration::from_secs(60)).await;

            assert_eq!(
                shown(&widget),
                vec![
                    (Originator::User, "hello".to_string(), false),
                    (Originator::SystemError, expected.to_string(), false),
                ]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_turns_stay_in_order() {
        let backend = ScriptedBackend::new().then_ok("first reply").then_ok("second reply");
        let widget = widget(&backend, Some("key"));

        tokio::join!(widget.send("one"), widget.send("two"));
        settle().await;

        let texts: Vec<String> = widget.messages().into_iter().map(|u| u.text).collect();
        assert_eq!(texts, vec!["one", "first reply", "two", "second reply"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_applies_new_credential() {
        let backend = ScriptedBackend::new().then_ok("connected");
        let widget = widget(&backend, None);

        widget.reconfigure(Some("fresh".to_string()), ModelTier::Standard).await;
        widget.send("hi").await;
        settle().await;

        let opened = backend.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].credential, "fresh");
        assert_eq!(opened[0].tier, ModelTier::Standard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_inserted_units() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let backend = ScriptedBackend::new().then_ok("hey");
        let client = ConversationClient::new(
            Arc::new(backend),
            Arc::new(MemoryPreferenceStore::default()),
            ClientConfig::new("prompt").with_credential(Some("key".to_string())),
        );
        let widget = ChatWidget::with_observer(client, SentinelMarkers::APPOINTMENT, move |unit| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(unit.text.clone());
        });

        widget.send("hi").await;
        settle().await;

        let seen = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(seen, vec!["hi".to_string(), "hey".to_string()]);
    }
}
