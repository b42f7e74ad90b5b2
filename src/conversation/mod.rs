//! Conversation state and turn orchestration

pub mod orchestrator;
pub mod store;

pub use orchestrator::{ServiceSet, TurnOrchestrator};
pub use store::{ConversationStore, FALLBACK_REPLY};
