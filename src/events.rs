//! Turn event broadcast for presentation layers
//!
//! The orchestrator publishes every observable change here. Subscribers
//! (a TUI, a test harness) receive events over a `tokio::sync::broadcast`
//! channel and render them however they like.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::message::{Message, TurnState};

/// Broadcast channel capacity; slow subscribers lag rather than block
const CHANNEL_CAPACITY: usize = 256;

/// An observable change in the conversation
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// The turn pipeline moved to a new state
    StateChanged(TurnState),

    /// A message was appended to the log
    MessageAppended(Message),

    /// The streaming message identified by `local_id` revealed more text
    RevealProgress {
        local_id: Uuid,
        text: String,
    },

    /// The streaming message reached its final text
    MessageCommitted {
        local_id: Uuid,
    },

    /// The backend assigned a persistent id to a local message
    ServerIdAdopted {
        local_id: Uuid,
        server_id: String,
    },

    /// Playback moved on; `None` means the queue went quiet
    NowPlaying(Option<String>),

    /// The backend suggested a topic to steer the conversation toward
    SuggestionOffered(String),

    /// The backend reported an updated companionship score
    CompanionshipUpdated(i64),

    /// A turn failed; the pipeline returns to idle afterwards
    TurnFailed {
        message: String,
    },
}

/// Fan-out bus for [`TurnEvent`]s
///
/// Cheap to clone; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TurnEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to turn events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Send errors (no subscribers) are ignored.
    pub fn emit(&self, event: TurnEvent) {
        let _ = self.tx.send(event);
    }
}
