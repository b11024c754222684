//! Concierge HTTP server.
//! Run with: cargo run --bin hub-concierge-server

use std::process::ExitCode;

use hub_concierge::start_hub_concierge;

fn main() -> ExitCode {
    start_hub_concierge::run()
}
