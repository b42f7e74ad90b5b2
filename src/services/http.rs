//! HTTP implementation of the backend collaborator traits

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use url::Url;

use crate::message::{AudioClip, Emotion, Role};
use crate::{Error, Result};

use super::{
    ChatReply, ConversationService, HistoryEntry, HistoryService, ReplySegment, SynthesisService,
    TranscriptionService, VoiceReply,
};

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSendRequest<'a> {
    character_id: i64,
    user_id: &'a str,
    message: &'a str,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_type: Option<&'a str>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUserMessage {
    #[serde(default)]
    id: Option<i64>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAiMessage {
    #[serde(default)]
    id: Option<i64>,
    message: String,
    #[serde(default)]
    voice_type: Option<String>,
    #[serde(default)]
    audio_data: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSendResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_message: Option<WireUserMessage>,
    #[serde(default)]
    ai_messages: Vec<WireAiMessage>,
    #[serde(default)]
    audio_data: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    companionship_score: Option<i64>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSendResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    user_message: Option<WireUserMessage>,
    #[serde(default)]
    ai_messages: Vec<WireAiMessage>,
    #[serde(default)]
    audio_data: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    companionship_score: Option<i64>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHistoryMessage {
    #[serde(default)]
    id: Option<i64>,
    role: String,
    message: String,
    #[serde(default)]
    emotion: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdResponse {
    user_id: String,
}

/// Talks to the chat backend over HTTP
///
/// Implements all four collaborator traits against a single base URL.
#[derive(Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    /// Create a new backend client
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or the client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid backend url {base_url}: {e}")))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint path {path}: {e}")))
    }
}

/// Map a transport failure, distinguishing timeouts
fn send_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Service(format!("request timed out: {e}"))
    } else {
        Error::Http(e)
    }
}

/// Parse an emotion label, warning on values we don't know
fn parse_emotion(label: &str) -> Option<Emotion> {
    match label.to_lowercase().as_str() {
        "neutral" => Some(Emotion::Neutral),
        "happy" => Some(Emotion::Happy),
        "sad" => Some(Emotion::Sad),
        "tired" => Some(Emotion::Tired),
        "anxious" => Some(Emotion::Anxious),
        "angry" => Some(Emotion::Angry),
        other => {
            tracing::warn!(emotion = %other, "unknown emotion label");
            None
        }
    }
}

/// Check whether bytes look like audio we can play (MP3 or WAV)
fn looks_like_audio(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    // MP3: ID3 tag or frame sync; WAV: RIFF header
    bytes.starts_with(b"ID3")
        || (bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
        || bytes.starts_with(b"RIFF")
}

fn decode_audio_field(encoded: Option<String>) -> Result<Option<Vec<u8>>> {
    match encoded {
        None => Ok(None),
        Some(b64) => {
            let bytes = BASE64
                .decode(b64)
                .map_err(|e| Error::InvalidResponse(format!("audio payload not base64: {e}")))?;
            Ok(Some(bytes))
        }
    }
}

/// Build reply segments from the wire messages plus an optional
/// response-level audio payload (applies when there is a single segment)
fn build_segments(
    ai_messages: Vec<WireAiMessage>,
    response_audio: Option<String>,
) -> Result<Vec<ReplySegment>> {
    let mut segments = Vec::with_capacity(ai_messages.len());
    for wire in ai_messages {
        segments.push(ReplySegment {
            id: wire.id.map(|id| id.to_string()),
            text: wire.message,
            voice_profile: wire.voice_type,
            audio: decode_audio_field(wire.audio_data)?,
        });
    }

    if let Some(encoded) = response_audio {
        if let [segment] = segments.as_mut_slice() {
            if segment.audio.is_none() {
                segment.audio = decode_audio_field(Some(encoded))?;
            }
        } else {
            tracing::warn!(
                segments = segments.len(),
                "response-level audio ignored for multi-segment reply"
            );
        }
    }

    Ok(segments)
}

#[async_trait]
impl ConversationService for HttpBackend {
    async fn send_message(
        &self,
        character_id: i64,
        user_id: &str,
        text: &str,
    ) -> Result<ChatReply> {
        let url = self.endpoint("/api/chat/send")?;
        tracing::debug!(character_id, chars = text.len(), "sending chat message");

        let request = ChatSendRequest {
            character_id,
            user_id,
            message: text,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(send_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat send failed");
            return Err(Error::Service(format!("chat send error {status}: {body}")));
        }

        let parsed: ChatSendResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("malformed chat response: {e}")))?;

        if !parsed.success {
            return Err(Error::Service(
                parsed
                    .error
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            ));
        }

        let segments = build_segments(parsed.ai_messages, parsed.audio_data)?;
        if segments.is_empty() {
            return Err(Error::InvalidResponse(
                "reply contained no messages".to_string(),
            ));
        }

        tracing::info!(segments = segments.len(), "chat reply received");

        Ok(ChatReply {
            user_message_id: parsed
                .user_message
                .and_then(|m| m.id)
                .map(|id| id.to_string()),
            segments,
            emotion: parsed.emotion.as_deref().and_then(parse_emotion),
            suggestion: parsed.suggestion,
            companionship_score: parsed.companionship_score,
        })
    }
}

#[async_trait]
impl TranscriptionService for HttpBackend {
    async fn transcribe(
        &self,
        clip: &AudioClip,
        character_id: i64,
        user_id: &str,
    ) -> Result<VoiceReply> {
        let url = self.endpoint("/api/voice-chat/send-voice")?;
        tracing::debug!(
            audio_bytes = clip.wav.len(),
            sample_rate = clip.sample_rate,
            "uploading voice clip"
        );

        let form = reqwest::multipart::Form::new()
            .part(
                "audio",
                reqwest::multipart::Part::bytes(clip.wav.clone())
                    .file_name("recording.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Upload(e.to_string()))?,
            )
            .text("characterId", character_id.to_string())
            .text("userId", user_id.to_string());

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Service(format!("voice upload timed out: {e}"))
                } else {
                    Error::Upload(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "voice upload failed");
            return Err(Error::Service(format!(
                "voice upload error {status}: {body}"
            )));
        }

        let parsed: VoiceSendResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("malformed voice response: {e}")))?;

        if !parsed.success {
            return Err(Error::Service(
                parsed
                    .error
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            ));
        }

        let transcript = parsed
            .transcript
            .ok_or_else(|| Error::InvalidResponse("transcript missing".to_string()))?;

        let reply = if parsed.ai_messages.is_empty() {
            None
        } else {
            Some(ChatReply {
                user_message_id: parsed
                    .user_message
                    .and_then(|m| m.id)
                    .map(|id| id.to_string()),
                segments: build_segments(parsed.ai_messages, parsed.audio_data)?,
                emotion: parsed.emotion.as_deref().and_then(parse_emotion),
                suggestion: parsed.suggestion,
                companionship_score: parsed.companionship_score,
            })
        };

        tracing::info!(
            transcript = %transcript,
            folded_reply = reply.is_some(),
            "transcription complete"
        );

        Ok(VoiceReply { transcript, reply })
    }
}

#[async_trait]
impl SynthesisService for HttpBackend {
    async fn synthesize(&self, text: &str, voice_profile: Option<&str>) -> Result<Vec<u8>> {
        let url = self.endpoint("/api/tts/synthesize")?;
        tracing::debug!(chars = text.len(), voice = ?voice_profile, "synthesizing speech");

        let request = SynthesizeRequest {
            text,
            voice_type: voice_profile,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(send_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "synthesis failed");
            return Err(Error::Service(format!("synthesis error {status}: {body}")));
        }

        let audio = response.bytes().await.map_err(send_err)?.to_vec();

        if !looks_like_audio(&audio) {
            return Err(Error::InvalidResponse(
                "synthesis response is not recognizable audio".to_string(),
            ));
        }

        tracing::debug!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio)
    }
}

#[async_trait]
impl HistoryService for HttpBackend {
    async fn fetch_history(&self, character_id: i64) -> Result<Vec<HistoryEntry>> {
        let url = self.endpoint(&format!("/api/chat/history/{character_id}"))?;
        tracing::debug!(character_id, "fetching history");

        let response = self.client.get(url).send().await.map_err(send_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Service(format!(
                "history fetch error {status}: {body}"
            )));
        }

        let wire: Vec<WireHistoryMessage> = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("malformed history response: {e}")))?;

        let mut entries = Vec::with_capacity(wire.len());
        for message in wire {
            let role = match message.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    tracing::warn!(role = %other, "skipping history entry with unknown role");
                    continue;
                }
            };
            entries.push(HistoryEntry {
                id: message.id.map(|id| id.to_string()),
                role,
                text: message.message,
                emotion: message.emotion.as_deref().and_then(parse_emotion),
            });
        }

        tracing::debug!(entries = entries.len(), "history fetched");
        Ok(entries)
    }

    async fn fetch_user_id(&self) -> Result<String> {
        let url = self.endpoint("/api/chat/user-id")?;

        let response = self.client.get(url).send().await.map_err(send_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Service(format!(
                "user id fetch error {status}: {body}"
            )));
        }

        let parsed: UserIdResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("malformed user id response: {e}")))?;

        Ok(parsed.user_id)
    }
}
