//! Voice transcription pipeline
//!
//! Flow: normalize the upload to mono PCM at the configured sample
//! rate (ffmpeg subprocess),
//! pre-check the user's voice-seconds balance, ship float samples to
//! the STT worker through the correlation broker, debit on success.

mod normalize;
mod transcribe;

pub use normalize::{
    parse_processed_seconds, pcm16_to_f32_bytes, waveform_summary, FfmpegNormalizer,
    NormalizedAudio, Normalizer,
};
pub use transcribe::{AudioFormat, TranscriptResult, TranscriptionPipeline};
