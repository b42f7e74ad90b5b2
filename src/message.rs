//! Conversation data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of a message within the local log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Text is still being revealed
    Streaming,
    /// Final text is in place
    Committed,
    /// Locally appended failure notice, never persisted server-side
    Error,
}

/// Emotion label attached to character replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Tired,
    Anxious,
    Angry,
}

/// A single entry in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id, absent until the backend persists the message
    pub id: Option<String>,

    /// Locally generated id, stable across the message's lifetime
    pub local_id: Uuid,

    /// Character this conversation belongs to
    pub character_id: i64,

    /// Author of the message
    pub role: Role,

    /// Message text (possibly a partial prefix while streaming)
    pub text: String,

    /// Emotion label, set on character replies when the backend provides one
    pub emotion: Option<Emotion>,

    /// Creation time (local clock)
    pub created_at: DateTime<Utc>,

    /// Current lifecycle status
    pub status: MessageStatus,
}

impl Message {
    /// Create a user message, committed immediately
    #[must_use]
    pub fn user(character_id: i64, text: impl Into<String>) -> Self {
        Self {
            id: None,
            local_id: Uuid::new_v4(),
            character_id,
            role: Role::User,
            text: text.into(),
            emotion: None,
            created_at: Utc::now(),
            status: MessageStatus::Committed,
        }
    }

    /// Create an assistant message in streaming state with empty text
    #[must_use]
    pub fn assistant_streaming(character_id: i64, emotion: Option<Emotion>) -> Self {
        Self {
            id: None,
            local_id: Uuid::new_v4(),
            character_id,
            role: Role::Assistant,
            text: String::new(),
            emotion,
            created_at: Utc::now(),
            status: MessageStatus::Streaming,
        }
    }

    /// Create a committed assistant message with final text
    #[must_use]
    pub fn assistant(character_id: i64, text: impl Into<String>, emotion: Option<Emotion>) -> Self {
        Self {
            id: None,
            local_id: Uuid::new_v4(),
            character_id,
            role: Role::Assistant,
            text: text.into(),
            emotion,
            created_at: Utc::now(),
            status: MessageStatus::Committed,
        }
    }
}

/// State of the conversational turn pipeline
///
/// `Failed` is transient: a failed turn surfaces `Failed` to subscribers and
/// settles back to `Idle` before the turn call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    Idle,
    AwaitingCapture,
    Transcribing,
    Sending,
    StreamingResponse,
    PlayingAudio,
    Failed,
}

/// A finalized recording ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// WAV-encoded audio (16-bit mono)
    pub wav: Vec<u8>,

    /// Sample rate the clip was recorded at
    pub sample_rate: u32,

    /// Number of samples in the clip
    pub samples: usize,
}

/// One speakable unit of a character reply
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    /// Text of the segment
    pub text: String,

    /// Voice profile to synthesize with, when the character specifies one
    pub voice_profile: Option<String>,

    /// Synthesized audio (MP3 bytes); `None` until synthesis runs
    pub audio: Option<Vec<u8>>,
}

impl SpeechSegment {
    /// Create a text-only segment awaiting synthesis
    #[must_use]
    pub fn text_only(text: impl Into<String>, voice_profile: Option<String>) -> Self {
        Self {
            text: text.into(),
            voice_profile,
            audio: None,
        }
    }
}
