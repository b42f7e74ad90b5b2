//! Microphone capture
//!
//! [`AudioCaptureController`] owns the capture session lifecycle. The
//! microphone is an exclusive resource: at most one recording session exists,
//! and the device is released on every exit path.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use crate::message::AudioClip;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Capture session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No session active
    Idle,
    /// Waiting for the device to open
    RequestingDevice,
    /// Buffering samples
    Recording,
    /// Finalizing the clip, device being released
    Stopping,
    /// Clip handed off, upload in flight
    Uploading,
}

/// Device seam for capture backends
///
/// The concrete backend owns the input device; the controller only sees
/// sample buffers.
pub trait CaptureBackend: Send {
    /// Open the input device and begin buffering samples
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no device exists or it refuses to open
    fn open(&mut self) -> Result<()>;

    /// Stop buffering, release the device, and return the captured samples
    fn close(&mut self) -> Vec<f32>;

    /// Sample rate of the captured audio
    fn sample_rate(&self) -> u32;
}

/// Drives one capture session at a time over a [`CaptureBackend`]
pub struct AudioCaptureController {
    backend: Box<dyn CaptureBackend>,
    state: CaptureState,
}

impl AudioCaptureController {
    /// Create a controller over the given backend
    #[must_use]
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            state: CaptureState::Idle,
        }
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether a recording session is active
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::Recording)
    }

    /// Begin a recording session
    ///
    /// # Errors
    ///
    /// Returns `AlreadyCapturing` if a session is active, or
    /// `DeviceUnavailable` if the device cannot be opened
    pub fn start_capture(&mut self) -> Result<()> {
        if self.state != CaptureState::Idle {
            return Err(Error::AlreadyCapturing);
        }

        self.state = CaptureState::RequestingDevice;
        match self.backend.open() {
            Ok(()) => {
                self.state = CaptureState::Recording;
                tracing::debug!("capture session started");
                Ok(())
            }
            Err(e) => {
                self.state = CaptureState::Idle;
                Err(e)
            }
        }
    }

    /// Stop recording and finalize the clip
    ///
    /// Returns `None` as a no-op when not recording. On success the session
    /// sits in `Uploading` until [`Self::finish_upload`] or [`Self::cancel`].
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be encoded; the device is released
    /// either way
    pub fn stop_capture(&mut self) -> Result<Option<AudioClip>> {
        if self.state != CaptureState::Recording {
            return Ok(None);
        }

        self.state = CaptureState::Stopping;
        let samples = self.backend.close();
        let sample_rate = self.backend.sample_rate();

        match samples_to_wav(&samples, sample_rate) {
            Ok(wav) => {
                self.state = CaptureState::Uploading;
                tracing::debug!(samples = samples.len(), "capture session finalized");
                Ok(Some(AudioClip {
                    wav,
                    sample_rate,
                    samples: samples.len(),
                }))
            }
            Err(e) => {
                self.state = CaptureState::Idle;
                Err(e)
            }
        }
    }

    /// Mark the upload phase finished, returning the session to idle
    pub fn finish_upload(&mut self) {
        self.state = CaptureState::Idle;
    }

    /// Tear down the session from any state, releasing the device
    pub fn cancel(&mut self) {
        if matches!(
            self.state,
            CaptureState::Recording | CaptureState::Stopping
        ) {
            let _ = self.backend.close();
            tracing::debug!("capture session cancelled");
        }
        self.state = CaptureState::Idle;
    }
}

enum WorkerMessage {
    Stop,
}

struct CaptureWorker {
    cmd_tx: mpsc::Sender<WorkerMessage>,
    handle: thread::JoinHandle<()>,
}

/// Captures audio from the default input device
///
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
/// and the backend talks to it over channels. Samples are shared through a
/// locked buffer filled by the stream callback.
pub struct CpalCapture {
    buffer: Arc<Mutex<Vec<f32>>>,
    worker: Option<CaptureWorker>,
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalCapture {
    /// Create a new capture backend; the device is opened lazily on `open`
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            worker: None,
        }
    }

    /// Get captured audio buffer without clearing
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.cmd_tx.send(WorkerMessage::Stop);
            let _ = worker.handle.join();
        }
    }
}

impl CaptureBackend for CpalCapture {
    fn open(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::AlreadyCapturing);
        }

        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }

        let buffer = Arc::clone(&self.buffer);
        let (ready_tx, ready_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();

        let handle = thread::spawn(move || capture_thread(&buffer, &ready_tx, &cmd_rx));

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { cmd_tx, handle });
                tracing::debug!(sample_rate = SAMPLE_RATE, "audio capture started");
                Ok(())
            }
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(Error::DeviceUnavailable(message))
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::DeviceUnavailable(
                    "capture thread exited before opening the device".to_string(),
                ))
            }
        }
    }

    fn close(&mut self) -> Vec<f32> {
        self.stop_worker();
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Body of the dedicated capture thread
///
/// Opens the stream, reports readiness, then parks until told to stop. The
/// stream must be dropped on this thread.
fn capture_thread(
    buffer: &Arc<Mutex<Vec<f32>>>,
    ready_tx: &mpsc::Sender<std::result::Result<(), String>>,
    cmd_rx: &mpsc::Receiver<WorkerMessage>,
) {
    let stream = match open_input_stream(Arc::clone(buffer)) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    let _ = cmd_rx.recv();
    drop(stream);
    tracing::debug!("audio capture stopped");
}

fn open_input_stream(buffer: Arc<Mutex<Vec<f32>>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::DeviceUnavailable("no suitable input config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}

/// Convert f32 samples to WAV bytes for upload
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
