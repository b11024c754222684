//! Remote LLM boundary: session traits, the Gemini backend, tiers and prompts.

pub mod backend;
pub mod gemini;
pub mod prompt;
pub mod tier;

pub use backend::{
    ChatBackend, ChatFuture, ChatSession, ConversationTurn, FailureClass, RemoteFailure,
    SessionRequest,
};
pub use gemini::GeminiBackend;
pub use tier::ModelTier;
