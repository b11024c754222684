//! Conversation client: one message in, one reply out, with capacity handling.

pub mod client;
pub mod errors;
pub mod retry;

pub use client::{ClientConfig, ConversationClient, StatusSink};
pub use errors::{ConversationError, ConversationResult};
pub use retry::{RetryPolicy, StatusUpdate, parse_retry_delay};
