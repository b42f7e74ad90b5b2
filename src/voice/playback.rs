//! Audio playback to speakers
//!
//! [`PlaybackQueue`] owns the audio output channel: segments play strictly in
//! FIFO order, at most one at a time, and a failed segment is skipped rather
//! than aborting the rest of the queue.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::watch;

use crate::events::{EventBus, TurnEvent};
use crate::message::SpeechSegment;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Output seam for playback backends
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play the segment audio to completion
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    async fn play(&self, audio: &[u8]) -> Result<()>;

    /// Stop any in-progress playback; pending `play` calls return promptly
    fn stop(&self);
}

struct QueueState {
    pending: VecDeque<SpeechSegment>,
    driver_running: bool,
}

struct QueueInner {
    sink: Arc<dyn AudioSink>,
    state: Mutex<QueueState>,
    now_playing: Mutex<Option<String>>,
    idle_tx: watch::Sender<bool>,
    events: EventBus,
}

/// Strictly sequential speech playback
///
/// Cheap to clone; all clones share the same queue and sink.
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<QueueInner>,
}

impl PlaybackQueue {
    /// Create a queue over the given sink
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>, events: EventBus) -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(QueueInner {
                sink,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    driver_running: false,
                }),
                now_playing: Mutex::new(None),
                idle_tx,
                events,
            }),
        }
    }

    /// Append a segment; playback begins immediately if the queue is idle
    pub fn enqueue(&self, segment: SpeechSegment) {
        let spawn_driver = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.pending.push_back(segment);
            if state.driver_running {
                false
            } else {
                state.driver_running = true;
                true
            }
        };

        if spawn_driver {
            let _ = self.inner.idle_tx.send(false);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(drive(inner));
        }
    }

    /// Drop all pending segments and stop the current one immediately
    pub fn clear(&self) {
        let dropped = {
            self.inner.state.lock().map_or(0, |mut state| {
                let dropped = state.pending.len();
                state.pending.clear();
                dropped
            })
        };
        self.inner.sink.stop();
        if dropped > 0 {
            tracing::debug!(dropped, "playback queue cleared");
        }
    }

    /// Text of the currently playing segment, if any
    #[must_use]
    pub fn now_playing(&self) -> Option<String> {
        self.inner
            .now_playing
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Whether nothing is playing and nothing is pending
    #[must_use]
    pub fn is_idle(&self) -> bool {
        *self.inner.idle_tx.borrow()
    }

    /// Wait until the queue drains
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Queue driver: pops and plays segments until the queue is empty
///
/// Exactly one driver runs at a time; the `driver_running` flag and the pop
/// happen under the same lock so an enqueue racing a drained queue always
/// finds or spawns a driver.
async fn drive(inner: Arc<QueueInner>) {
    loop {
        let segment = {
            let Ok(mut state) = inner.state.lock() else {
                break;
            };
            match state.pending.pop_front() {
                Some(segment) => segment,
                None => {
                    state.driver_running = false;
                    break;
                }
            }
        };

        let Some(audio) = segment.audio.as_deref() else {
            tracing::debug!("segment has no audio, skipping playback");
            continue;
        };

        if let Ok(mut guard) = inner.now_playing.lock() {
            *guard = Some(segment.text.clone());
        }
        inner
            .events
            .emit(TurnEvent::NowPlaying(Some(segment.text.clone())));

        if let Err(e) = inner.sink.play(audio).await {
            tracing::warn!(error = %e, "segment playback failed, skipping");
        }

        if let Ok(mut guard) = inner.now_playing.lock() {
            *guard = None;
        }
        inner.events.emit(TurnEvent::NowPlaying(None));
    }

    let _ = inner.idle_tx.send(true);
}

/// Plays MP3 segments on the default output device
///
/// The device is reopened per segment inside a blocking task; an abort flag
/// shared with [`AudioSink::stop`] is polled alongside the completion poll.
pub struct CpalSink {
    config: StreamConfig,
    abort: Arc<AtomicBool>,
}

impl CpalSink {
    /// Create a new playback sink
    ///
    /// # Errors
    ///
    /// Returns error if no output device or suitable config exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Play raw f32 samples to completion
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_samples(&self, samples: Vec<f32>) -> Result<()> {
        self.abort.store(false, Ordering::SeqCst);
        let config = self.config.clone();
        let abort = Arc::clone(&self.abort);

        tokio::task::spawn_blocking(move || play_samples_blocking(&config, &samples, &abort))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        self.abort.store(false, Ordering::SeqCst);
        let audio = audio.to_vec();
        let config = self.config.clone();
        let abort = Arc::clone(&self.abort);

        tokio::task::spawn_blocking(move || {
            let samples = decode_mp3(&audio)?;
            play_samples_blocking(&config, &samples, &abort)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    fn stop(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }
}

/// Play samples in a blocking manner, polling for completion or abort
#[allow(clippy::significant_drop_tightening)]
fn play_samples_blocking(
    config: &StreamConfig,
    samples: &[f32],
    abort: &Arc<AtomicBool>,
) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = config.channels as usize;

    let samples = Arc::new(Mutex::new(samples.to_vec()));
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(Mutex::new(false));
    let finished_clone = Arc::clone(&finished);

    let samples_clone = Arc::clone(&samples);
    let position_clone = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let samples = samples_clone.lock().unwrap();
                let mut pos = position_clone.lock().unwrap();

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples.len() {
                        samples[*pos]
                    } else {
                        *finished_clone.lock().unwrap() = true;
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }

                    if *pos < samples.len() {
                        *pos += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Wait for playback to finish or abort
    let sample_count = samples.lock().unwrap().len();
    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);

    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(duration_ms + 500);

    while !*finished.lock().unwrap() {
        if abort.load(Ordering::SeqCst) {
            tracing::debug!("playback aborted");
            break;
        }
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(std::time::Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Decode MP3 bytes to f32 samples
///
/// # Errors
///
/// Returns error if the bytes are not decodable MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                // Convert i16 samples to f32 and handle stereo to mono
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    // Stereo: average channels
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    // Mono
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}
