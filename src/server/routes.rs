//! HTTP route handlers for the concierge API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::preferences::Preferences;
use crate::handoff::{HandoffLinks, handoff_links};
use crate::llm::tier::ModelTier;
use crate::reply::display::DisplayUnit;
use crate::reply::presenter::ScheduledUnit;

use super::state::AppState;
use super::webhook;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.settings.static_dir);
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/sessions", post(create_session))
        .route(
            "/api/chat/sessions/{id}/messages",
            post(send_message).get(list_messages),
        )
        .route("/api/settings", get(read_settings).put(update_settings))
        .route("/api/handoff", post(build_handoff))
        .route("/webhook", post(webhook::receive))
        .fallback_service(static_files)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "hub-concierge",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// New widget session.
#[derive(Debug, Serialize)]
pub struct SessionCreated {
    /// Session identifier.
    pub id: Uuid,
    /// Welcome bubbles with their display offsets.
    pub welcome: Vec<ScheduledUnit>,
}

/// Create a widget session and run its welcome turn.
async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionCreated>) {
    let (id, widget) = state.create_widget();
    info!(session = %id, "Widget session created");
    let welcome = widget.welcome().await;
    (StatusCode::CREATED, Json(SessionCreated { id, welcome }))
}

/// Visitor message.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Text typed by the visitor.
    pub message: String,
}

/// Bubbles scheduled by one turn.
#[derive(Debug, Serialize)]
pub struct SendResponse {
    /// Reply bubbles with their display offsets.
    pub units: Vec<ScheduledUnit>,
}

/// Send one visitor message to a widget session.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, (StatusCode, String)> {
    let widget = state.widget(&id).ok_or_else(|| session_not_found(id))?;
    let units = widget.send(&request.message).await;
    Ok(Json(SendResponse { units }))
}

/// Visible conversation.
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    /// Bubbles inserted so far, in order.
    pub messages: Vec<DisplayUnit>,
}

/// List the bubbles inserted so far.
async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, (StatusCode, String)> {
    let widget = state.widget(&id).ok_or_else(|| session_not_found(id))?;
    Ok(Json(MessagesResponse {
        messages: widget.messages(),
    }))
}

fn session_not_found(id: Uuid) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("Unknown session {id}"))
}

/// Settings as exposed to clients. The credential itself is never returned.
#[derive(Debug, Serialize)]
pub struct SettingsView {
    /// Whether any credential is in effect.
    pub has_credential: bool,
    /// Where the credential comes from: `stored` or `environment`.
    pub credential_source: Option<&'static str>,
    /// Stored lite preference.
    pub use_lite: bool,
    /// Tier new sessions start on.
    pub tier: ModelTier,
    /// WhatsApp handoff number in effect.
    pub handoff_number: Option<String>,
}

fn settings_view(state: &AppState) -> SettingsView {
    let preferences = state.preferences();
    let credential_source = if preferences.credential().is_some() {
        Some("stored")
    } else if state.credential().is_some() {
        Some("environment")
    } else {
        None
    };
    SettingsView {
        has_credential: credential_source.is_some(),
        credential_source,
        use_lite: preferences.use_lite,
        tier: preferences.tier(),
        handoff_number: state.handoff_number(),
    }
}

/// Read settings.
async fn read_settings(State(state): State<Arc<AppState>>) -> Json<SettingsView> {
    Json(settings_view(&state))
}

/// Partial settings update. Blank strings clear a stored value.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    /// New credential.
    pub credential: Option<String>,
    /// New lite preference.
    pub use_lite: Option<bool>,
    /// New handoff number.
    pub handoff_number: Option<String>,
}

/// Write settings and reset live sessions.
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsView>, (StatusCode, String)> {
    let apply = |preferences: &mut Preferences| {
        if let Some(credential) = &update.credential {
            preferences.credential = non_blank(credential);
        }
        if let Some(use_lite) = update.use_lite {
            preferences.use_lite = use_lite;
        }
        if let Some(number) = &update.handoff_number {
            preferences.handoff_number = non_blank(number);
        }
    };

    let preferences = state.update_preferences(&apply).map_err(|err| {
        error!(error = %err, "Failed to save preferences");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to save settings: {err}"),
        )
    })?;

    let credential = state.credential();
    let widgets = state.widgets();
    for widget in &widgets {
        widget
            .reconfigure(credential.clone(), preferences.tier())
            .await;
    }
    state.reset_webhook_sessions();
    info!(
        widgets = widgets.len(),
        tier = %preferences.tier(),
        "Settings updated, sessions reset"
    );

    Ok(Json(settings_view(&state)))
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Handoff request. Either `summary` or `session_id` must be given.
#[derive(Debug, Default, Deserialize)]
pub struct HandoffRequest {
    /// Summary text to hand off.
    pub summary: Option<String>,
    /// Widget session whose latest summary should be used.
    pub session_id: Option<Uuid>,
    /// Email recipient override.
    pub email: Option<String>,
    /// WhatsApp number override.
    pub number: Option<String>,
}

/// Build email and WhatsApp links for a summary.
async fn build_handoff(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HandoffRequest>,
) -> Result<Json<HandoffLinks>, (StatusCode, String)> {
    let summary = match (request.summary, request.session_id) {
        (Some(summary), _) => summary,
        (None, Some(id)) => state
            .widget(&id)
            .ok_or_else(|| session_not_found(id))?
            .latest_summary()
            .ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    "Session has no summary yet".to_string(),
                )
            })?,
        (None, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Provide a summary or a session_id".to_string(),
            ));
        }
    };

    let email = request
        .email
        .unwrap_or_else(|| state.settings.company_email.clone());
    let number = request.number.or_else(|| state.handoff_number());

    handoff_links(&email, number.as_deref(), &summary)
        .map(Json)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::Query;
    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;
    use crate::config::preferences::MemoryPreferenceStore;
    use crate::config::settings::{AuthKeySettings, ServerSettings};
    use crate::llm::backend::RemoteFailure;
    use crate::llm::backend::testing::ScriptedBackend;

    fn app_with(backend: &ScriptedBackend, credential: Option<&str>) -> (Router, Arc<AppState>) {
        app_with_settings(backend, credential, ServerSettings::default())
    }

    #[allow(clippy::expect_used)]
    fn app_with_settings(
        backend: &ScriptedBackend,
        credential: Option<&str>,
        settings: ServerSettings,
    ) -> (Router, Arc<AppState>) {
        let preferences = Arc::new(MemoryPreferenceStore::new(Preferences {
            credential: credential.map(str::to_string),
            ..Preferences::default()
        }));
        let state = AppState::new(settings, Arc::new(backend.clone()), preferences)
            .expect("default settings are valid");
        (create_router(Arc::clone(&state)), state)
    }

    fn json_request(method: &str, uri: &str, body: Option<&Value>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap_or_default()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {});
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send(app, json_request(method, uri, body.as_ref())).await
    }

    async fn webhook_status(backend: &ScriptedBackend, credential: Option<&str>, body: Value) -> StatusCode {
        let (app, _) = app_with(backend, credential);
        call(&app, "POST", "/webhook", Some(body)).await.0
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app_with(&ScriptedBackend::new(), None);
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_lifecycle() {
        let backend = ScriptedBackend::new()
            .then_ok("👋 Hi! What's your name?")
            .then_ok("Nice to meet you, Esi! APPOINTMENT_SUMMARY_START 📅 Esi APPOINTMENT_SUMMARY_END Tap below.");
        let (app, _) = app_with(&backend, Some("key"));

        let (create_status, created) = call(&app, "POST", "/api/chat/sessions", None).await;
        assert_eq!(create_status, StatusCode::CREATED);
        assert_eq!(created["welcome"][0]["text"], "👋 Hi! What's your name?");
        let id = created["id"].as_str().unwrap_or_default().to_string();

        let uri = format!("/api/chat/sessions/{id}/messages");
        let (send_status, sent) = call(&app, "POST", &uri, Some(json!({"message": "I'm Esi"}))).await;
        assert_eq!(send_status, StatusCode::OK);
        assert_eq!(sent["units"][1]["is_summary"], true);
        assert_eq!(sent["units"][2]["delay_ms"], 1000);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let (list_status, listed) = call(&app, "GET", &uri, None).await;
        assert_eq!(list_status, StatusCode::OK);
        let originators: Vec<&str> = listed["messages"]
            .as_array()
            .map(|m| m.iter().filter_map(|u| u["originator"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(
            originators,
            vec!["assistant", "user", "assistant", "assistant", "assistant"]
        );

        let handoff = json!({"session_id": id, "number": "+233 20 000 0000"});
        let (handoff_status, links) = call(&app, "POST", "/api/handoff", Some(handoff)).await;
        assert_eq!(handoff_status, StatusCode::OK);
        assert_eq!(
            links["whatsapp"],
            "https://wa.me/233200000000?text=%F0%9F%93%85%20Esi"
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let (app, _) = app_with(&ScriptedBackend::new(), Some("key"));
        let uri = format!("/api/chat/sessions/{}/messages", Uuid::new_v4());
        let (status, _) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_update_reconfigures_sessions() {
        let backend = ScriptedBackend::new().then_ok("Connected now");
        let (app, state) = app_with(&backend, None);

        let (_, created) = call(&app, "POST", "/api/chat/sessions", None).await;
        assert_eq!(created["welcome"][0]["text"], crate::widget::FALLBACK_WELCOME);
        let id = created["id"].as_str().unwrap_or_default().to_string();

        let update = json!({"credential": "secret-key", "use_lite": false});
        let (status, view) = call(&app, "PUT", "/api/settings", Some(update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["has_credential"], true);
        assert_eq!(view["credential_source"], "stored");
        assert_eq!(view["tier"], "standard");
        assert!(!view.to_string().contains("secret-key"));
        assert_eq!(state.preferences().credential(), Some("secret-key"));

        let uri = format!("/api/chat/sessions/{id}/messages");
        let (_, sent) = call(&app, "POST", &uri, Some(json!({"message": "hello"}))).await;
        assert_eq!(sent["units"][0]["text"], "Connected now");

        let opened = backend.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].credential, "secret-key");
        assert_eq!(opened[0].tier, ModelTier::Standard);
    }

    #[tokio::test]
    async fn test_settings_read_hides_credential() {
        let (app, state) = app_with(&ScriptedBackend::new(), Some("hidden"));
        let (status, view) = call(&app, "GET", "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["has_credential"], true);
        assert_eq!(view["tier"], "lite");
        assert!(!view.to_string().contains("hidden"));
        assert!(state.update_preferences(&|p| p.credential = None).is_ok());
        assert!(state.credential().is_none());
    }

    #[tokio::test]
    async fn test_settings_update_keeps_unrelated_fields() {
        let (app, state) = app_with(&ScriptedBackend::new(), Some("key"));
        assert!(
            state
                .update_preferences(&|p| {
                    p.use_lite = true;
                    p.handoff_number = Some("233200000000".to_string());
                })
                .is_ok()
        );

        let update = json!({"handoff_number": "  233 24 111 2222 "});
        let (status, view) = call(&app, "PUT", "/api/settings", Some(update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["tier"], "lite");

        let stored = state.preferences();
        assert!(stored.use_lite);
        assert_eq!(stored.credential(), Some("key"));
        assert_eq!(stored.handoff_number.as_deref(), Some("233 24 111 2222"));
    }

    #[tokio::test]
    async fn test_handoff_requires_summary() {
        let (app, _) = app_with(&ScriptedBackend::new(), None);
        let (missing, _) = call(&app, "POST", "/api/handoff", Some(json!({}))).await;
        assert_eq!(missing, StatusCode::BAD_REQUEST);

        let request = json!({"summary": "Subject: Call\nName: Yaw"});
        let (status, links) = call(&app, "POST", "/api/handoff", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(links["mailto"].as_str().is_some_and(|l| l.contains("subject=Call")));
        assert!(links["whatsapp"].is_null());
    }

    #[tokio::test]
    async fn test_webhook_json_reply_is_flattened() {
        let backend = ScriptedBackend::new().then_ok(
            "Booked! EMAIL_SUMMARY_START To: x@y.z\nSubject: New Appointment EMAIL_SUMMARY_END I'll be in touch.",
        );
        let (app, _) = app_with(&backend, Some("key"));

        let payload = json!({"from": 233_201_234_567_u64, "message": "Yes, confirm"});
        let (status, body) = call(&app, "POST", "/webhook", Some(payload)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "Booked!\n[Appointment Confirmed]\nI'll be in touch.");
        assert_eq!(body["summary"], "To: x@y.z\nSubject: New Appointment");
        assert_eq!(body["delivered"], false);
        assert_eq!(backend.calls()[0].1, "Yes, confirm");
    }

    #[tokio::test]
    async fn test_webhook_form_payload_keeps_conversation_per_sender() {
        let backend = ScriptedBackend::new().then_ok("first").then_ok("second");
        let (app, _) = app_with(&backend, Some("key"));

        for text in ["hello", "again"] {
            let request = Request::builder()
                .method("POST")
                .uri("/webhook")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!("mobile=201234567&text={text}")))
                .unwrap_or_default();
            let (status, _) = send(&app, request).await;
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(backend.opened().len(), 1);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_webhook_error_statuses() {
        let message = json!({"from": "1", "message": "hi"});
        let cases = [
            (ScriptedBackend::new(), Some("key"), json!({"message": "hi"}), StatusCode::BAD_REQUEST),
            (ScriptedBackend::new(), None, message.clone(), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ScriptedBackend::new().otherwise_fail(RemoteFailure::capacity("429")),
                Some("key"),
                message.clone(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ScriptedBackend::new().then_fail(RemoteFailure::other("403 forbidden")),
                Some("key"),
                message,
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (backend, credential, body, expected) in cases {
            assert_eq!(webhook_status(&backend, credential, body).await, expected);
        }
    }

    #[allow(clippy::expect_used)]
    #[tokio::test]
    async fn test_webhook_delivers_reply_through_authkey() {
        let (tx, mut rx) = mpsc::unbounded_channel::<HashMap<String, String>>();
        let gateway = Router::new().route(
            "/request",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let _ = tx.send(params);
                async { "ok" }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local gateway");
        let addr = listener.local_addr().expect("local address");
        tokio::spawn(async move { axum::serve(listener, gateway).await });

        let settings = ServerSettings {
            authkey: Some(AuthKeySettings {
                token: "tok".to_string(),
                sender_id: "HUB".to_string(),
                country_code: "233".to_string(),
                endpoint: format!("http://{addr}/request"),
            }),
            ..ServerSettings::default()
        };
        let backend = ScriptedBackend::new().then_ok("See you Friday & bring ID!");
        let (app, _) = app_with_settings(&backend, Some("key"), settings);

        let payload = json!({"mobile": "201234567", "message": "book me"});
        let (status, body) = call(&app, "POST", "/webhook", Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], true);

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("gateway was called")
            .expect("query captured");
        assert_eq!(received.get("msg").map(String::as_str), Some("See you Friday & bring ID!"));
        assert_eq!(received.get("mobile").map(String::as_str), Some("201234567"));
        assert_eq!(received.get("auth").map(String::as_str), Some("tok"));
        assert_eq!(received.get("sid").map(String::as_str), Some("HUB"));
    }

    #[tokio::test]
    async fn test_missing_credential_reports_misconfiguration() {
        let (app, _) = app_with(&ScriptedBackend::new(), None);
        let (_, body) = call(&app, "POST", "/webhook", Some(json!({"sender": "5", "text": "hi"}))).await;
        assert_eq!(body, "Server Misconfiguration");
    }
}
