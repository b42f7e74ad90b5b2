//! Parley - conversational turn client for AI characters
//!
//! This library drives one conversational turn at a time against a remote
//! chat backend: capture or typed input, submission, segmented reveal, and
//! exclusive sequential speech playback.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Presentation layer                   │
//! │        terminal chat loop  │  test harnesses        │
//! └────────────────────┬────────────────────────────────┘
//!                      │ TurnEvent broadcast
//! ┌────────────────────▼────────────────────────────────┐
//! │               TurnOrchestrator                       │
//! │  ConversationStore │ StreamingRenderer │ Playback   │
//! │        AudioCaptureController (microphone)           │
//! └────────────────────┬────────────────────────────────┘
//!                      │ HTTP collaborators
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Chat backend                         │
//! │   send  │  voice-chat  │  tts  │  history           │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod identity;
pub mod message;
pub mod reveal;
pub mod services;
pub mod setup;
pub mod voice;

pub use config::Config;
pub use conversation::{ConversationStore, FALLBACK_REPLY, ServiceSet, TurnOrchestrator};
pub use error::{Error, Result};
pub use events::{EventBus, TurnEvent};
pub use identity::SessionIdentity;
pub use message::{
    AudioClip, Emotion, Message, MessageStatus, Role, SpeechSegment, TurnState,
};
pub use reveal::{RevealGranularity, RevealHandle, StreamingRenderer};
pub use services::{
    ChatReply, ConversationService, HistoryEntry, HistoryService, HttpBackend, ReplySegment,
    SynthesisService, TranscriptionService, VoiceReply,
};
pub use voice::{AudioCaptureController, CpalCapture, CpalSink, PlaybackQueue};
