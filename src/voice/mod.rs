//! Voice input and output
//!
//! Microphone capture on the input side, strictly sequential speech playback
//! on the output side. Transcription and synthesis stay remote (see
//! `services::http`); this module only moves audio on and off the devices.

pub mod capture;
pub mod playback;

pub use capture::{AudioCaptureController, CaptureBackend, CaptureState, CpalCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioSink, CpalSink, PlaybackQueue, decode_mp3};
