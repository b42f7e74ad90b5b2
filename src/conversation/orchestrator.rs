//! Conversational turn orchestration
//!
//! [`TurnOrchestrator`] drives one turn at a time through the pipeline:
//! capture or typed input, submission, segmented ingestion with interleaved
//! reveal and playback, and cancellation. It is the only writer of the
//! [`ConversationStore`], which is what makes the single-active-turn rule
//! enforceable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::config::{Config, RevealConfig};
use crate::conversation::store::{ConversationStore, FALLBACK_REPLY};
use crate::events::{EventBus, TurnEvent};
use crate::identity::SessionIdentity;
use crate::message::{Message, MessageStatus, SpeechSegment, TurnState};
use crate::reveal::{RevealGranularity, RevealHandle, StreamingRenderer};
use crate::services::{
    ChatReply, ConversationService, HistoryService, ReplySegment, SynthesisService,
    TranscriptionService,
};
use crate::voice::capture::AudioCaptureController;
use crate::voice::playback::PlaybackQueue;
use crate::{Error, Result};

/// Backend collaborators the orchestrator talks to
///
/// Cheap to clone; tests swap in scripted implementations per seam.
#[derive(Clone)]
pub struct ServiceSet {
    pub conversation: Arc<dyn ConversationService>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub synthesis: Arc<dyn SynthesisService>,
    pub history: Arc<dyn HistoryService>,
}

impl ServiceSet {
    /// Build a set where one backend serves every seam
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ConversationService
            + TranscriptionService
            + SynthesisService
            + HistoryService
            + 'static,
    {
        Self {
            conversation: Arc::clone(&backend) as Arc<dyn ConversationService>,
            transcription: Arc::clone(&backend) as Arc<dyn TranscriptionService>,
            synthesis: Arc::clone(&backend) as Arc<dyn SynthesisService>,
            history: backend,
        }
    }
}

/// Coordinates capture, submission, reveal, and playback for one character
///
/// Exactly one turn is active at a time; a submission while the pipeline is
/// not idle is rejected with [`Error::AlreadyActiveTurn`]. Every failure path
/// settles the pipeline back to [`TurnState::Idle`].
pub struct TurnOrchestrator {
    character_id: i64,
    store: Mutex<ConversationStore>,
    capture: Mutex<AudioCaptureController>,
    playback: PlaybackQueue,
    identity: SessionIdentity,
    services: ServiceSet,
    events: EventBus,
    reveal: RevealConfig,
    voice_enabled: bool,
    voice_profile: Option<String>,
    active_reveal: std::sync::Mutex<Option<RevealHandle>>,
    cancelled: AtomicBool,
}

impl TurnOrchestrator {
    /// Create an orchestrator for a character conversation
    #[must_use]
    pub fn new(
        character_id: i64,
        capture: AudioCaptureController,
        playback: PlaybackQueue,
        services: ServiceSet,
        events: EventBus,
        config: &Config,
    ) -> Self {
        Self {
            character_id,
            store: Mutex::new(ConversationStore::new(character_id)),
            capture: Mutex::new(capture),
            playback,
            identity: SessionIdentity::new(Arc::clone(&services.history)),
            services,
            events,
            reveal: config.reveal.clone(),
            voice_enabled: config.voice.enabled,
            voice_profile: config.voice.voice_profile.clone(),
            active_reveal: std::sync::Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Subscribe to turn events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    /// Current turn state
    pub async fn state(&self) -> TurnState {
        self.store.lock().await.state()
    }

    /// Snapshot of the message log
    pub async fn messages(&self) -> Vec<Message> {
        self.store.lock().await.messages().to_vec()
    }

    /// Seed the store with the persisted history for this character
    ///
    /// Returns the number of seeded messages.
    ///
    /// # Errors
    ///
    /// Returns error if the history fetch fails; the log is left untouched
    pub async fn open_conversation(&self) -> Result<usize> {
        let entries = self.services.history.fetch_history(self.character_id).await?;
        let count = entries.len();
        self.store.lock().await.seed_history(entries);
        Ok(count)
    }

    /// Submit a typed user turn
    ///
    /// The user message is appended optimistically before the network call
    /// and never retracted. A send failure appends a fixed fallback reply to
    /// the log and settles back to idle; the call still returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyActiveTurn` if the pipeline is not idle; the log is
    /// left untouched in that case
    pub async fn submit_text(&self, text: &str) -> Result<()> {
        let user_local_id = {
            let mut store = self.store.lock().await;
            if store.state() != TurnState::Idle {
                return Err(Error::AlreadyActiveTurn);
            }
            self.cancelled.store(false, Ordering::SeqCst);

            let message = Message::user(self.character_id, text);
            let local_id = message.local_id;
            store.append(message.clone());
            self.events.emit(TurnEvent::MessageAppended(message));
            self.transition(&mut store, TurnState::Sending);
            local_id
        };

        self.send_and_ingest(text, user_local_id).await;
        Ok(())
    }

    /// Begin a voice turn by opening the microphone
    ///
    /// # Errors
    ///
    /// Returns `Config` if voice is disabled, `AlreadyActiveTurn` if the
    /// pipeline is not idle, or the capture error if the device cannot be
    /// opened (the pipeline settles back to idle)
    pub async fn begin_voice_capture(&self) -> Result<()> {
        if !self.voice_enabled {
            return Err(Error::Config("voice is disabled".to_string()));
        }

        {
            let mut store = self.store.lock().await;
            if store.state() != TurnState::Idle {
                return Err(Error::AlreadyActiveTurn);
            }
            self.cancelled.store(false, Ordering::SeqCst);
            self.transition(&mut store, TurnState::AwaitingCapture);
        }

        let started = self.capture.lock().await.start_capture();
        if let Err(e) = started {
            self.fail_notify(e.to_string()).await;
            return Err(e);
        }
        Ok(())
    }

    /// Finish a voice turn: stop recording, transcribe, and run the reply
    ///
    /// A no-op when no capture is awaited. An empty clip is rejected before
    /// any network call. When the backend folds the character reply into the
    /// transcription response, the send step is skipped.
    ///
    /// # Errors
    ///
    /// Returns `EmptyClip` for a zero-sample recording, or the encode or
    /// transcription error; the pipeline settles back to idle either way
    pub async fn finish_voice_capture(&self) -> Result<()> {
        {
            let store = self.store.lock().await;
            if store.state() != TurnState::AwaitingCapture {
                return Ok(());
            }
        }

        let clip = match self.capture.lock().await.stop_capture() {
            Ok(Some(clip)) => clip,
            Ok(None) => {
                let mut store = self.store.lock().await;
                self.transition(&mut store, TurnState::Idle);
                return Ok(());
            }
            Err(e) => {
                self.fail_notify(e.to_string()).await;
                return Err(e);
            }
        };

        if clip.samples == 0 {
            self.capture.lock().await.finish_upload();
            let e = Error::EmptyClip("recording produced no samples".to_string());
            self.fail_notify(e.to_string()).await;
            return Err(e);
        }

        {
            let mut store = self.store.lock().await;
            self.transition(&mut store, TurnState::Transcribing);
        }

        let user_id = self.identity.user_id().await;
        let transcribed = self
            .services
            .transcription
            .transcribe(&clip, self.character_id, &user_id)
            .await;
        self.capture.lock().await.finish_upload();

        let voice_reply = match transcribed {
            Ok(reply) => reply,
            Err(e) => {
                self.fail_with_message(e.to_string()).await;
                return Err(e);
            }
        };
        if self.is_cancelled() {
            return Ok(());
        }

        let message = Message::user(self.character_id, voice_reply.transcript.clone());
        let user_local_id = message.local_id;
        {
            let mut store = self.store.lock().await;
            store.append(message.clone());
        }
        self.events.emit(TurnEvent::MessageAppended(message));

        if let Some(reply) = voice_reply.reply {
            // Folded round trip: the backend already answered
            if let Some(server_id) = reply.user_message_id.clone() {
                self.adopt_id(user_local_id, &server_id).await;
            }
            self.ingest_reply(reply).await;
        } else {
            {
                let mut store = self.store.lock().await;
                self.transition(&mut store, TurnState::Sending);
            }
            self.send_and_ingest(&voice_reply.transcript, user_local_id).await;
        }
        Ok(())
    }

    /// Cancel the active turn from any state
    ///
    /// Releases the microphone, stops the active reveal (the revealed prefix
    /// stands), clears the playback queue, and settles the pipeline to idle.
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);

        if let Ok(mut guard) = self.active_reveal.lock() {
            if let Some(handle) = guard.take() {
                handle.cancel();
            }
        }
        self.playback.clear();
        self.capture.lock().await.cancel();

        let mut store = self.store.lock().await;
        self.transition(&mut store, TurnState::Idle);
        tracing::debug!("turn cancelled");
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Set the turn state and broadcast the change
    fn transition(&self, store: &mut ConversationStore, state: TurnState) {
        if store.state() != state {
            store.set_state(state);
            self.events.emit(TurnEvent::StateChanged(state));
        }
    }

    async fn adopt_id(&self, local_id: Uuid, server_id: &str) {
        let adopted = self.store.lock().await.adopt_server_id(local_id, server_id);
        if adopted {
            self.events.emit(TurnEvent::ServerIdAdopted {
                local_id,
                server_id: server_id.to_string(),
            });
        }
    }

    async fn send_and_ingest(&self, text: &str, user_local_id: Uuid) {
        let user_id = self.identity.user_id().await;
        match self
            .services
            .conversation
            .send_message(self.character_id, &user_id, text)
            .await
        {
            Ok(reply) => {
                if self.is_cancelled() {
                    return;
                }
                if let Some(server_id) = reply.user_message_id.clone() {
                    self.adopt_id(user_local_id, &server_id).await;
                }
                self.ingest_reply(reply).await;
            }
            Err(e) => self.fail_with_message(e.to_string()).await,
        }
    }

    /// Run the reply through the log: per segment, append, enqueue audio,
    /// reveal, commit, then adopt the server id, strictly in arrival order
    async fn ingest_reply(&self, reply: ChatReply) {
        let ChatReply {
            segments,
            emotion,
            suggestion,
            companionship_score,
            ..
        } = reply;

        if let Some(suggestion) = suggestion {
            self.events.emit(TurnEvent::SuggestionOffered(suggestion));
        }
        if let Some(score) = companionship_score {
            self.events.emit(TurnEvent::CompanionshipUpdated(score));
        }

        {
            let mut store = self.store.lock().await;
            self.transition(&mut store, TurnState::StreamingResponse);
        }

        // A plain reply types out character by character; a segmented reply
        // lands one whole segment per tick so text keeps pace with playback.
        let renderer = if segments.len() > 1 {
            StreamingRenderer::new(RevealGranularity::Segment, self.reveal.segment_delay)
        } else {
            StreamingRenderer::new(RevealGranularity::Character, self.reveal.char_delay)
        };

        let mut audio_enqueued = false;
        for segment in segments {
            if self.is_cancelled() {
                return;
            }

            let message = Message::assistant_streaming(self.character_id, emotion);
            let local_id = message.local_id;
            {
                let mut store = self.store.lock().await;
                store.append(message.clone());
            }
            self.events.emit(TurnEvent::MessageAppended(message));

            if self.voice_enabled {
                if let Some(audio) = self.resolve_audio(&segment).await {
                    self.playback.enqueue(SpeechSegment {
                        text: segment.text.clone(),
                        voice_profile: segment.voice_profile.clone(),
                        audio: Some(audio),
                    });
                    audio_enqueued = true;
                }
            }

            if !self.reveal_into(local_id, &segment.text, renderer).await {
                return;
            }

            if let Some(server_id) = &segment.id {
                self.adopt_id(local_id, server_id).await;
            }
        }

        if audio_enqueued {
            {
                let mut store = self.store.lock().await;
                self.transition(&mut store, TurnState::PlayingAudio);
            }
            self.playback.wait_idle().await;
            if self.is_cancelled() {
                return;
            }
        }

        let mut store = self.store.lock().await;
        self.transition(&mut store, TurnState::Idle);
    }

    /// Audio for a segment: the backend's bytes when present, otherwise a
    /// synthesis call. Synthesis failure degrades the segment to text only.
    async fn resolve_audio(&self, segment: &ReplySegment) -> Option<Vec<u8>> {
        if let Some(audio) = &segment.audio {
            return Some(audio.clone());
        }

        let profile = segment
            .voice_profile
            .as_deref()
            .or(self.voice_profile.as_deref());
        match self.services.synthesis.synthesize(&segment.text, profile).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed, segment plays as text only");
                None
            }
        }
    }

    /// Reveal `text` into the streaming message slot
    ///
    /// Returns true when the full text was committed, false when the reveal
    /// was cancelled (the revealed prefix is committed as it stands).
    async fn reveal_into(&self, local_id: Uuid, text: &str, renderer: StreamingRenderer) -> bool {
        use futures::StreamExt;

        let (handle, stream) = renderer.stream(text);
        if let Ok(mut guard) = self.active_reveal.lock() {
            if let Some(previous) = guard.replace(handle.clone()) {
                previous.cancel();
            }
        }

        tokio::pin!(stream);
        while let Some(prefix) = stream.next().await {
            let updated = self.store.lock().await.set_streaming_text(local_id, &prefix);
            if !updated {
                break;
            }
            self.events.emit(TurnEvent::RevealProgress {
                local_id,
                text: prefix,
            });
        }

        if let Ok(mut guard) = self.active_reveal.lock() {
            guard.take();
        }

        let completed = !handle.is_cancelled() && !self.is_cancelled();
        let committed = {
            let mut store = self.store.lock().await;
            if completed {
                store.commit(local_id, text)
            } else {
                store.commit_as_revealed(local_id)
            }
        };
        if committed {
            self.events.emit(TurnEvent::MessageCommitted { local_id });
        }
        completed
    }

    /// Surface a mid-turn failure in the log with the fixed fallback reply
    async fn fail_with_message(&self, detail: String) {
        tracing::warn!(error = %detail, "turn failed");
        let mut store = self.store.lock().await;
        self.transition(&mut store, TurnState::Failed);
        self.events.emit(TurnEvent::TurnFailed { message: detail });

        let mut message = Message::assistant(self.character_id, FALLBACK_REPLY, None);
        message.status = MessageStatus::Error;
        store.append(message.clone());
        self.events.emit(TurnEvent::MessageAppended(message));

        self.transition(&mut store, TurnState::Idle);
    }

    /// Surface a pre-submission failure as a transient notification only
    async fn fail_notify(&self, detail: String) {
        tracing::warn!(error = %detail, "turn aborted");
        let mut store = self.store.lock().await;
        self.transition(&mut store, TurnState::Failed);
        self.events.emit(TurnEvent::TurnFailed { message: detail });
        self.transition(&mut store, TurnState::Idle);
    }
}
