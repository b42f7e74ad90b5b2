//! Conversation state
//!
//! [`ConversationStore`] owns the ordered message log and the turn state for
//! one character conversation. Only the orchestrator mutates it, which keeps
//! the single-active-turn invariant enforceable in one place.

use uuid::Uuid;

use crate::message::{Message, MessageStatus, Role, TurnState};
use crate::services::HistoryEntry;

/// Fallback text appended locally when a send fails
pub const FALLBACK_REPLY: &str = "Sorry, I can't reply to your message right now.";

/// Ordered message log plus turn state for one character
#[derive(Debug)]
pub struct ConversationStore {
    character_id: i64,
    messages: Vec<Message>,
    state: TurnState,
}

impl ConversationStore {
    /// Create an empty store for a character
    #[must_use]
    pub const fn new(character_id: i64) -> Self {
        Self {
            character_id,
            messages: Vec::new(),
            state: TurnState::Idle,
        }
    }

    /// Character this store belongs to
    #[must_use]
    pub const fn character_id(&self) -> i64 {
        self.character_id
    }

    /// Current turn state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Move the turn state machine
    pub fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "turn state change");
            self.state = state;
        }
    }

    /// Snapshot of the message log
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replace the log with persisted history
    ///
    /// Entries keep their server ids and arrive committed.
    pub fn seed_history(&mut self, entries: Vec<HistoryEntry>) {
        self.messages = entries
            .into_iter()
            .map(|entry| Message {
                id: entry.id,
                local_id: Uuid::new_v4(),
                character_id: self.character_id,
                role: entry.role,
                text: entry.text,
                emotion: entry.emotion,
                created_at: chrono::Utc::now(),
                status: MessageStatus::Committed,
            })
            .collect();
        tracing::debug!(messages = self.messages.len(), "history seeded");
    }

    /// Append a message, returning its local id
    pub fn append(&mut self, message: Message) -> Uuid {
        let local_id = message.local_id;
        self.messages.push(message);
        local_id
    }

    /// Update the text of a streaming message
    ///
    /// Returns false if the message is missing or no longer streaming; a
    /// committed message is never rewritten by a late reveal tick.
    pub fn set_streaming_text(&mut self, local_id: Uuid, text: &str) -> bool {
        match self.find_mut(local_id) {
            Some(message) if message.status == MessageStatus::Streaming => {
                message.text = text.to_string();
                true
            }
            _ => false,
        }
    }

    /// Commit a streaming message with its final text
    ///
    /// Returns false if the message is missing or not streaming.
    pub fn commit(&mut self, local_id: Uuid, final_text: &str) -> bool {
        match self.find_mut(local_id) {
            Some(message) if message.status == MessageStatus::Streaming => {
                message.text = final_text.to_string();
                message.status = MessageStatus::Committed;
                true
            }
            _ => false,
        }
    }

    /// Commit a streaming message keeping whatever text was revealed
    ///
    /// Used on cancellation: the revealed prefix stands.
    pub fn commit_as_revealed(&mut self, local_id: Uuid) -> bool {
        match self.find_mut(local_id) {
            Some(message) if message.status == MessageStatus::Streaming => {
                message.status = MessageStatus::Committed;
                true
            }
            _ => false,
        }
    }

    /// Adopt a server-assigned id for a local message
    ///
    /// Order and text are untouched. Returns false if the message is missing.
    pub fn adopt_server_id(&mut self, local_id: Uuid, server_id: &str) -> bool {
        self.find_mut(local_id).is_some_and(|message| {
            message.id = Some(server_id.to_string());
            true
        })
    }

    fn find_mut(&mut self, local_id: Uuid) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.local_id == local_id)
    }
}
