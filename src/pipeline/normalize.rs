use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Output of the normalization collaborator: 16kHz mono s16le PCM plus
/// the processed duration when the converter reported one.
pub struct NormalizedAudio {
    pub pcm: Vec<u8>,
    pub processed_seconds: Option<i64>,
}

/// Seam for the external format converter so the pipeline can be tested
/// without spawning a process.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, raw: &[u8]) -> Result<NormalizedAudio, PipelineError>;
}

/// ffmpeg subprocess normalizer: any input container to mono s16le PCM
/// at the configured sample rate on stdout, duration parsed from the
/// progress log.
pub struct FfmpegNormalizer {
    timeout: Duration,
    sample_rate: u32,
}

impl FfmpegNormalizer {
    pub fn new(timeout: Duration, sample_rate: u32) -> Self {
        Self {
            timeout,
            sample_rate,
        }
    }
}

#[async_trait]
impl Normalizer for FfmpegNormalizer {
    async fn normalize(&self, raw: &[u8]) -> Result<NormalizedAudio, PipelineError> {
        let rate = self.sample_rate.to_string();
        let mut child = Command::new("ffmpeg")
            .args([
                "-i", "pipe:0", "-acodec", "pcm_s16le", "-ar", rate.as_str(), "-ac", "1",
                "-vn", "-y", "-f", "s16le", "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::ConversionFailed(format!("failed to spawn ffmpeg: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::ConversionFailed("ffmpeg stdin unavailable".into()))?;

        // Feed input from a separate task so a full stdout pipe cannot
        // deadlock against a full stdin pipe.
        let input = raw.to_vec();
        let writer = tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!("ffmpeg stdin write ended early: {}", e);
            }
        });

        // kill_on_drop reaps the child if the timeout wins.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| PipelineError::ConversionFailed(format!("ffmpeg failed: {e}")))?,
            Err(_) => {
                warn!("ffmpeg did not finish within {:?}, killing", self.timeout);
                return Err(PipelineError::ConversionFailed(format!(
                    "normalizer timed out after {:?}",
                    self.timeout
                )));
            }
        };
        writer.abort();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.chars().rev().take(200).collect::<Vec<_>>()
                .into_iter().rev().collect();
            return Err(PipelineError::ConversionFailed(format!(
                "ffmpeg exited with {}: {}",
                output.status, tail
            )));
        }

        let processed_seconds = parse_processed_seconds(&output.stderr);

        Ok(NormalizedAudio {
            pcm: output.stdout,
            processed_seconds,
        })
    }
}

/// Extract the processed duration from ffmpeg's stderr progress log.
/// The last `time=HH:MM:SS.cc` field is the total, floored to whole
/// seconds.
pub fn parse_processed_seconds(stderr: &[u8]) -> Option<i64> {
    let text = String::from_utf8_lossy(stderr);
    let idx = text.rfind("time=")?;
    let field: String = text[idx + 5..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ':' || *c == '.')
        .collect();

    let mut parts = field.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;

    Some((hours * 3600.0 + minutes * 60.0 + seconds).floor() as i64)
}

/// Convert s16le PCM bytes to normalized f32le bytes for the STT
/// worker (sample / 32768).
pub fn pcm16_to_f32_bytes(pcm: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm.len() * 2);
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        let normalized = sample as f32 / 32768.0;
        out.extend_from_slice(&normalized.to_le_bytes());
    }
    out
}

/// Coarse per-bucket peak summary of a PCM clip, one digit (0-9) per
/// bucket, for waveform rendering in chat clients.
pub fn waveform_summary(pcm: &[u8], buckets: usize) -> String {
    if pcm.len() < 2 || buckets == 0 {
        return String::new();
    }

    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    let bucket_len = (samples.len() / buckets).max(1);
    samples
        .chunks(bucket_len)
        .take(buckets)
        .map(|bucket| {
            let peak = bucket.iter().map(|s| s.unsigned_abs() as u32).max().unwrap_or(0);
            let digit = (peak * 9) / i16::MAX as u32;
            char::from_digit(digit.min(9), 10).unwrap_or('0')
        })
        .collect()
}
