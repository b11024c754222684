//! Startup helpers for the concierge server and the terminal simulator.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::preferences::{FilePreferenceStore, PreferenceStore};
use crate::config::settings::ServerSettings;
use crate::conversation::client::{ClientConfig, ConversationClient};
use crate::conversation::retry::StatusUpdate;
use crate::handoff::handoff_links;
use crate::llm::gemini::GeminiBackend;
use crate::llm::prompt::widget_system_prompt;
use crate::reply::display::{DisplayUnit, Originator};
use crate::reply::markers::SentinelMarkers;
use crate::reply::presenter::STAGGER_INTERVAL;
use crate::server::{self, AppState};
use crate::widget::ChatWidget;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Install the global tracing subscriber. Later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run the HTTP server until Ctrl+C (used by `hub-concierge-server`).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();
    tracing::info!("Starting hub concierge v{}", env!("CARGO_PKG_VERSION"));

    let state = match initialize() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(state, shutdown_signal())) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    tracing::info!("Server stopped");
    ExitCode::SUCCESS
}

/// Read settings from the environment and build application state.
///
/// # Errors
/// Returns an error if settings are invalid or state creation fails.
pub fn initialize() -> Result<Arc<AppState>, BoxError> {
    let settings = ServerSettings::from_env()?;
    tracing::info!(
        port = settings.port,
        static_dir = %settings.static_dir.display(),
        preferences = %settings.preferences_path.display(),
        "Settings loaded"
    );
    AppState::from_settings(settings).map_err(|e| format!("Failed to create state: {e}").into())
}

/// Resolves when Ctrl+C is received.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Run the widget in the terminal (used by `hub-concierge`).
///
/// Lines typed on stdin are sent as visitor messages. `/handoff` prints the
/// links for the latest summary and `/quit` exits.
#[must_use]
pub fn run_simulator() -> ExitCode {
    init_tracing();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(simulate()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Simulator error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn simulate() -> Result<(), BoxError> {
    let settings = ServerSettings::from_env()?;
    let preferences: Arc<dyn PreferenceStore> =
        Arc::new(FilePreferenceStore::new(&settings.preferences_path));
    let stored = preferences.load()?;
    let backend = Arc::new(GeminiBackend::new(settings.gemini_base_url.as_deref())?);

    let markers = SentinelMarkers::APPOINTMENT;
    let config = ClientConfig::new(widget_system_prompt(&markers))
        .with_credential(settings.resolve_credential(stored.credential()))
        .with_tier(stored.tier());
    let client = ConversationClient::new(backend, Arc::clone(&preferences), config);
    let widget = ChatWidget::with_observer(client, markers, |unit| write_line(&render_unit(unit)));

    write_line("Type a message, /handoff for links, /quit to exit.");
    widget.welcome().await;

    let status = |update: StatusUpdate| write_line(&format!("  ({update})"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/handoff" => {
                let Some(summary) = widget.latest_summary() else {
                    write_line("No appointment summary yet.");
                    continue;
                };
                let number = stored
                    .handoff_number
                    .clone()
                    .or_else(|| settings.handoff_number.clone());
                match handoff_links(&settings.company_email, number.as_deref(), &summary) {
                    Ok(links) => {
                        write_line(&format!("Email: {}", links.mailto));
                        if let Some(whatsapp) = links.whatsapp {
                            write_line(&format!("WhatsApp: {whatsapp}"));
                        }
                    }
                    Err(e) => write_line(&format!("Handoff unavailable: {e}")),
                }
            }
            text => {
                widget.send_with_status(text, Some(&status)).await;
            }
        }
    }

    tokio::time::sleep(STAGGER_INTERVAL * 3).await;
    Ok(())
}

/// Terminal rendering of one bubble.
#[must_use]
pub fn render_unit(unit: &DisplayUnit) -> String {
    let time = unit.created_at.format("%H:%M");
    match (unit.originator, unit.is_summary) {
        (_, true) => format!("[{time}] ┌─ Appointment summary\n{}\n└─", indent(&unit.text)),
        (Originator::User, false) => format!("[{time}] You: {}", unit.text),
        (Originator::Assistant, false) => format!("[{time}] Concierge: {}", unit.text),
        (Originator::SystemError, false) => format!("[{time}] ! {}", unit.text),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("│ {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn write_line(text: &str) {
    if let Err(err) = write_line_to(&mut std::io::stdout().lock(), text) {
        tracing::debug!(error = %err, "Failed to write to stdout");
    }
}

fn write_line_to(out: &mut impl Write, text: &str) -> std::io::Result<()> {
    writeln!(out, "{text}")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::extractor::Segment;

    #[test]
    fn test_render_plain_bubbles() {
        let user = render_unit(&DisplayUnit::user("hi"));
        let error = render_unit(&DisplayUnit::system_error("offline"));
        assert!(user.ends_with("You: hi"));
        assert!(error.ends_with("! offline"));
    }

    #[test]
    fn test_render_summary_is_boxed() {
        let summary = DisplayUnit::from_segment(Segment {
            text: "📅 Request\n👤 Ama".to_string(),
            is_summary: true,
        });
        let rendered = render_unit(&summary);
        assert!(rendered.contains("Appointment summary"));
        assert!(rendered.contains("│ 📅 Request\n│ 👤 Ama"));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_line_reports_errors() {
        let mut buffer = Vec::new();
        assert!(write_line_to(&mut buffer, "hello").is_ok());
        assert_eq!(buffer, b"hello\n");

        let failed = write_line_to(&mut ClosedPipe, "hello");
        assert!(failed.is_err_and(|e| e.kind() == std::io::ErrorKind::BrokenPipe));
    }
}
