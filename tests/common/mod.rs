//! Shared test utilities
//!
//! Scripted collaborators and a fake audio sink so turn and playback tests
//! run without audio hardware or a live backend.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use parley_client::config::{RevealConfig, VoiceConfig};
use parley_client::services::{
    ChatReply, ConversationService, HistoryEntry, HistoryService, ReplySegment, SynthesisService,
    TranscriptionService, VoiceReply,
};
use parley_client::voice::{AudioSink, CaptureBackend, SAMPLE_RATE};
use parley_client::{
    AudioCaptureController, Config, Error, EventBus, PlaybackQueue, Result, ServiceSet,
    TurnOrchestrator,
};

/// Build a single-segment reply with the given text
#[must_use]
pub fn simple_reply(text: &str) -> ChatReply {
    ChatReply {
        segments: vec![ReplySegment {
            id: None,
            text: text.to_string(),
            voice_profile: None,
            audio: None,
        }],
        ..ChatReply::default()
    }
}

/// Build a segmented reply from (text, audio) pairs
#[must_use]
pub fn segmented_reply(parts: &[(&str, Option<Vec<u8>>)]) -> ChatReply {
    ChatReply {
        segments: parts
            .iter()
            .map(|(text, audio)| ReplySegment {
                id: None,
                text: (*text).to_string(),
                voice_profile: None,
                audio: audio.clone(),
            })
            .collect(),
        ..ChatReply::default()
    }
}

/// Backend whose responses are scripted per call
#[derive(Default)]
pub struct ScriptedBackend {
    send_results: Mutex<VecDeque<Result<ChatReply>>>,
    pub sent: Mutex<Vec<String>>,
    pub send_gate: Mutex<Option<Arc<Notify>>>,
    transcribe_results: Mutex<VecDeque<Result<VoiceReply>>>,
    pub transcribe_calls: AtomicUsize,
    synth_results: Mutex<VecDeque<Result<Vec<u8>>>>,
    pub synth_calls: AtomicUsize,
    pub history: Mutex<Vec<HistoryEntry>>,
    pub user_id: Mutex<Option<String>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: ChatReply) {
        self.send_results.lock().unwrap().push_back(Ok(reply));
    }

    pub fn push_send_error(&self, error: Error) {
        self.send_results.lock().unwrap().push_back(Err(error));
    }

    pub fn push_transcription(&self, reply: VoiceReply) {
        self.transcribe_results.lock().unwrap().push_back(Ok(reply));
    }

    pub fn push_transcription_error(&self, error: Error) {
        self.transcribe_results.lock().unwrap().push_back(Err(error));
    }

    pub fn push_synthesis(&self, audio: Vec<u8>) {
        self.synth_results.lock().unwrap().push_back(Ok(audio));
    }

    pub fn push_synthesis_error(&self, error: Error) {
        self.synth_results.lock().unwrap().push_back(Err(error));
    }

    /// Block the next `send_message` call until the returned notify fires
    #[must_use]
    pub fn gate_send(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.send_gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }
}

#[async_trait]
impl ConversationService for ScriptedBackend {
    async fn send_message(
        &self,
        _character_id: i64,
        _user_id: &str,
        text: &str,
    ) -> Result<ChatReply> {
        self.sent.lock().unwrap().push(text.to_string());

        let gate = self.send_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.send_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Service("no scripted reply".to_string())))
    }
}

#[async_trait]
impl TranscriptionService for ScriptedBackend {
    async fn transcribe(
        &self,
        _clip: &parley_client::AudioClip,
        _character_id: i64,
        _user_id: &str,
    ) -> Result<VoiceReply> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        self.transcribe_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Service("no scripted transcription".to_string())))
    }
}

#[async_trait]
impl SynthesisService for ScriptedBackend {
    async fn synthesize(&self, _text: &str, _voice_profile: Option<&str>) -> Result<Vec<u8>> {
        self.synth_calls.fetch_add(1, Ordering::SeqCst);
        self.synth_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Service("no scripted synthesis".to_string())))
    }
}

#[async_trait]
impl HistoryService for ScriptedBackend {
    async fn fetch_history(&self, _character_id: i64) -> Result<Vec<HistoryEntry>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn fetch_user_id(&self) -> Result<String> {
        self.user_id
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Service("no scripted user id".to_string()))
    }
}

/// Audio sink that records playback order and detects overlap
pub struct FakeSink {
    delay: Duration,
    playing: AtomicUsize,
    pub overlap_detected: AtomicBool,
    played: Mutex<Vec<Vec<u8>>>,
    failing: Mutex<Vec<Vec<u8>>>,
    pub stop_calls: AtomicUsize,
}

impl FakeSink {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            playing: AtomicUsize::new(0),
            overlap_detected: AtomicBool::new(false),
            played: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Make playback of the given payload fail
    pub fn fail_on(&self, audio: Vec<u8>) {
        self.failing.lock().unwrap().push(audio);
    }

    #[must_use]
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        if self.playing.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap_detected.store(true, Ordering::SeqCst);
        }
        self.played.lock().unwrap().push(audio.to_vec());

        tokio::time::sleep(self.delay).await;
        self.playing.fetch_sub(1, Ordering::SeqCst);

        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|payload| payload == audio) {
            return Err(Error::Audio("scripted playback failure".to_string()));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Capture backend that returns preset samples
pub struct FakeCaptureBackend {
    samples: Vec<f32>,
}

impl FakeCaptureBackend {
    #[must_use]
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }
}

impl CaptureBackend for FakeCaptureBackend {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Orchestrator wired to scripted collaborators
pub struct Harness {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub backend: Arc<ScriptedBackend>,
    pub sink: Arc<FakeSink>,
    pub events: EventBus,
}

/// Build a harness for character 42 with fast reveal pacing
#[must_use]
pub fn harness(voice_enabled: bool, capture_samples: Vec<f32>) -> Harness {
    harness_with_pacing(voice_enabled, capture_samples, Duration::from_millis(2))
}

/// Build a harness with an explicit per-character reveal delay
#[must_use]
pub fn harness_with_pacing(
    voice_enabled: bool,
    capture_samples: Vec<f32>,
    char_delay: Duration,
) -> Harness {
    let backend = Arc::new(ScriptedBackend::new());
    *backend.user_id.lock().unwrap() = Some("user-1".to_string());

    let sink = Arc::new(FakeSink::new(Duration::from_millis(10)));
    let events = EventBus::new();
    let playback = PlaybackQueue::new(Arc::clone(&sink) as Arc<dyn AudioSink>, events.clone());
    let capture = AudioCaptureController::new(Box::new(FakeCaptureBackend::new(capture_samples)));

    let config = Config {
        backend_url: "http://localhost:0".to_string(),
        request_timeout: Duration::from_secs(5),
        voice: VoiceConfig {
            enabled: voice_enabled,
            voice_profile: None,
        },
        reveal: RevealConfig {
            char_delay,
            segment_delay: Duration::from_millis(2),
        },
    };

    let orchestrator = Arc::new(TurnOrchestrator::new(
        42,
        capture,
        playback,
        ServiceSet::from_backend(Arc::clone(&backend)),
        events.clone(),
        &config,
    ));

    Harness {
        orchestrator,
        backend,
        sink,
        events,
    }
}
