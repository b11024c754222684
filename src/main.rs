//! Terminal simulator of the chat widget.

use std::process::ExitCode;

use hub_concierge::start_hub_concierge;

/// Chat with the concierge from the terminal.
fn main() -> ExitCode {
    start_hub_concierge::run_simulator()
}
