//! Backend collaborator seams
//!
//! The orchestrator talks to the chat backend through these traits so tests
//! can swap in scripted implementations. [`http::HttpBackend`] is the real
//! one.

use async_trait::async_trait;

use crate::Result;
use crate::message::{AudioClip, Emotion, Role};

pub mod http;

pub use http::HttpBackend;

/// One assistant reply unit as the backend returned it
#[derive(Debug, Clone, PartialEq)]
pub struct ReplySegment {
    /// Server id of the persisted assistant message, when provided
    pub id: Option<String>,

    /// Segment text
    pub text: String,

    /// Voice profile the backend wants this segment spoken with
    pub voice_profile: Option<String>,

    /// Pre-synthesized audio (MP3 bytes), when the backend sent any
    pub audio: Option<Vec<u8>>,
}

/// A character reply to a submitted message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatReply {
    /// Server id assigned to the user message that triggered this reply
    pub user_message_id: Option<String>,

    /// Reply segments in speaking order; a plain reply is a single segment
    pub segments: Vec<ReplySegment>,

    /// Emotion label for the reply
    pub emotion: Option<Emotion>,

    /// Suggested topic to steer the conversation toward
    pub suggestion: Option<String>,

    /// Updated companionship score
    pub companionship_score: Option<i64>,
}

/// Result of a voice upload
///
/// The transcription endpoint may fold the whole round trip into one call
/// and return the character reply alongside the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceReply {
    /// What the backend heard
    pub transcript: String,

    /// Character reply, when the backend answered in the same call
    pub reply: Option<ChatReply>,
}

/// One persisted message from the conversation history
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Server id of the persisted message
    pub id: Option<String>,

    /// Author of the message
    pub role: Role,

    /// Message text
    pub text: String,

    /// Emotion label, when one was stored
    pub emotion: Option<Emotion>,
}

/// Sends user messages and receives character replies
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Submit a user message and return the character's reply
    async fn send_message(
        &self,
        character_id: i64,
        user_id: &str,
        text: &str,
    ) -> Result<ChatReply>;
}

/// Uploads recorded audio for transcription
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Upload a clip and return the transcript, possibly with a folded reply
    async fn transcribe(
        &self,
        clip: &AudioClip,
        character_id: i64,
        user_id: &str,
    ) -> Result<VoiceReply>;
}

/// Synthesizes speech for reply segments
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Synthesize text to audio bytes (MP3)
    async fn synthesize(&self, text: &str, voice_profile: Option<&str>) -> Result<Vec<u8>>;
}

/// Reads conversation history and session identity from the backend
#[async_trait]
pub trait HistoryService: Send + Sync {
    /// Fetch the persisted message log for a character
    async fn fetch_history(&self, character_id: i64) -> Result<Vec<HistoryEntry>>;

    /// Fetch the backend-assigned user id for this session
    async fn fetch_user_id(&self) -> Result<String>;
}
