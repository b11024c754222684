//! Inbound messaging webhook.
//!
//! A provider posts `{sender, text}` as JSON or a form. The text goes to a
//! per-sender conversation using the email-summary prompt, and the reply is
//! flattened for the plain-text channel before being relayed back through
//! AuthKey.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use url::Url;

use crate::config::settings::AuthKeySettings;
use crate::conversation::errors::ConversationError;
use crate::reply::extractor::ParsedReply;
use crate::reply::markers::SentinelMarkers;

use super::state::AppState;

/// Payload keys that may carry the sender, in priority order.
pub const SENDER_FIELDS: &[&str] = &["mobile", "from", "sender", "mobile_number"];
/// Payload keys that may carry the message text, in priority order.
pub const TEXT_FIELDS: &[&str] = &["message", "text", "content"];

/// Webhook body, accepted as JSON or `application/x-www-form-urlencoded`.
#[derive(Debug, Default)]
pub struct WebhookPayload(pub Map<String, Value>);

impl<S: Send + Sync> FromRequest<S> for WebhookPayload {
    type Rejection = (StatusCode, String);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let axum::Form(fields) = axum::Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| (e.status(), e.body_text()))?;
            Ok(Self(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect(),
            ))
        } else {
            let Json(fields) = Json::<Map<String, Value>>::from_request(req, state)
                .await
                .map_err(|e| (e.status(), e.body_text()))?;
            Ok(Self(fields))
        }
    }
}

impl WebhookPayload {
    /// Sender identifier.
    #[must_use]
    pub fn sender(&self) -> Option<String> {
        self.first(SENDER_FIELDS)
    }

    /// Message text.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.first(TEXT_FIELDS)
    }

    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|key| self.0.get(*key))
            .find_map(|value| match value {
                Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookReply {
    /// Text relayed to the sender.
    pub reply: String,
    /// Email summary extracted from the reply, if any.
    pub summary: Option<String>,
    /// Whether outbound delivery was dispatched.
    pub delivered: bool,
}

/// Handle one inbound message.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    payload: WebhookPayload,
) -> Result<Json<WebhookReply>, (StatusCode, String)> {
    let (Some(sender), Some(text)) = (payload.sender(), payload.text()) else {
        warn!(fields = ?payload.0.keys().collect::<Vec<_>>(), "Webhook payload missing sender or text");
        return Err((
            StatusCode::BAD_REQUEST,
            "Missing sender or message".to_string(),
        ));
    };
    info!(%sender, "Webhook message received");

    if state.credential().is_none() {
        error!("No API credential configured for webhook replies");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server Misconfiguration".to_string(),
        ));
    }

    let client = state.webhook_client(&sender);
    let raw = client
        .lock()
        .await
        .send(&text, None)
        .await
        .map_err(|err| rejection(&err))?;

    let parsed = ParsedReply::parse(&raw, &SentinelMarkers::EMAIL);
    if let Some(summary) = parsed.summary() {
        info!(to = %state.settings.company_email, %summary, "Emailing appointment");
    }
    let reply = parsed.flatten_for_channel();
    let delivered = relay(&state, &sender, &reply);

    Ok(Json(WebhookReply {
        reply,
        summary: parsed.summary().map(str::to_string),
        delivered,
    }))
}

fn rejection(err: &ConversationError) -> (StatusCode, String) {
    error!(error = %err, "Webhook conversation failed");
    match err {
        ConversationError::Configuration(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server Misconfiguration".to_string(),
        ),
        ConversationError::CapacityExceeded { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, err.user_message().to_string())
        }
        ConversationError::Remote(_) => (StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

/// AuthKey request URL delivering `message` to `mobile`.
///
/// # Errors
/// Returns an error if the configured endpoint is not a valid URL.
pub fn authkey_request_url(
    authkey: &AuthKeySettings,
    mobile: &str,
    message: &str,
) -> Result<Url, url::ParseError> {
    Url::parse_with_params(
        &authkey.endpoint,
        &[
            ("auth", authkey.token.as_str()),
            ("mobile", mobile),
            ("country_code", authkey.country_code.as_str()),
            ("sid", authkey.sender_id.as_str()),
            ("msg", message),
        ],
    )
}

/// Fire-and-forget outbound delivery. Returns whether a request was dispatched.
fn relay(state: &Arc<AppState>, mobile: &str, message: &str) -> bool {
    let Some(authkey) = &state.settings.authkey else {
        info!(%mobile, %message, "Test mode: reply not delivered");
        return false;
    };

    let url = match authkey_request_url(authkey, mobile, message) {
        Ok(url) => url,
        Err(err) => {
            error!(error = %err, "Invalid AuthKey endpoint");
            return false;
        }
    };

    let http = state.http().clone();
    let mobile = mobile.to_string();
    tokio::spawn(async move {
        match http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(%mobile, "Reply delivered via AuthKey");
            }
            Ok(response) => warn!(%mobile, status = %response.status(), "AuthKey rejected reply"),
            Err(err) => warn!(%mobile, error = %err, "AuthKey delivery failed"),
        }
    });
    true
}
