use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use super::normalize::{pcm16_to_f32_bytes, waveform_summary, Normalizer};
use crate::broker::CorrelationBroker;
use crate::error::{LedgerError, PipelineError};
use crate::ledger::{BillingLedger, TransactionKind};

const WAVEFORM_BUCKETS: usize = 50;

/// What the caller declared about the uploaded audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Already mono s16le PCM at the configured sample rate;
    /// conversion is skipped.
    RawPcm,
    /// Anything the normalizer can decode (ogg/opus, mp3, wav, ...).
    Encoded,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptResult {
    pub text: String,
    pub duration_seconds: f64,
    pub billed_seconds: i64,
    /// Amplitude summary of the normalized samples, for waveform
    /// rendering in clients.
    pub sound_wave: String,
}

/// Orchestrates one voice message end to end: normalize, check the
/// balance, publish to the STT worker, await the correlated reply,
/// debit on success.
pub struct TranscriptionPipeline {
    broker: Arc<CorrelationBroker>,
    normalizer: Arc<dyn Normalizer>,
    ledger: Arc<BillingLedger>,
    /// Serializes check-then-debit per user so concurrent requests
    /// cannot both pass the balance pre-check. Entries are pruned once
    /// the lock is uncontended.
    user_locks: DashMap<String, Arc<Mutex<()>>>,
    broker_timeout: Duration,
    sample_rate: u32,
}

impl TranscriptionPipeline {
    pub fn new(
        broker: Arc<CorrelationBroker>,
        normalizer: Arc<dyn Normalizer>,
        ledger: Arc<BillingLedger>,
        broker_timeout: Duration,
        sample_rate: u32,
    ) -> Self {
        Self {
            broker,
            normalizer,
            ledger,
            user_locks: DashMap::new(),
            broker_timeout,
            sample_rate,
        }
    }

    pub async fn transcribe(
        &self,
        user_id: &str,
        audio: &[u8],
        format: AudioFormat,
    ) -> Result<TranscriptResult, PipelineError> {
        let (pcm, reported_seconds) = match format {
            AudioFormat::RawPcm => (audio.to_vec(), None),
            AudioFormat::Encoded => {
                let normalized = self.normalizer.normalize(audio).await?;
                (normalized.pcm, normalized.processed_seconds)
            }
        };

        let sample_count = pcm.len() / 2;
        let sampled_duration = sample_count as f64 / self.sample_rate as f64;
        let duration_seconds = reported_seconds
            .map(|s| s as f64)
            .unwrap_or(sampled_duration);
        let estimated_seconds =
            reported_seconds.unwrap_or_else(|| sampled_duration.ceil() as i64);
        // Summarized from the normalized samples, never from the
        // uploaded container bytes.
        let sound_wave = waveform_summary(&pcm, WAVEFORM_BUCKETS);

        // Held across the broker round trip: for one user, the second
        // request must see the first one's debit before its own check.
        let lock = self.user_lock(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.check_publish_debit(user_id, &pcm, estimated_seconds)
                .await
        };
        drop(lock);
        // The entry goes only when nobody holds or awaits the lock.
        self.user_locks
            .remove_if(user_id, |_, l| Arc::strong_count(l) == 1);

        let text = result?;
        Ok(TranscriptResult {
            text,
            duration_seconds,
            billed_seconds: estimated_seconds,
            sound_wave,
        })
    }

    async fn check_publish_debit(
        &self,
        user_id: &str,
        pcm: &[u8],
        estimated_seconds: i64,
    ) -> Result<String, PipelineError> {
        let available = self.ledger.balance(user_id).await?;
        if available < estimated_seconds {
            return Err(PipelineError::InsufficientBalance {
                needed: estimated_seconds,
                available,
            });
        }

        let samples = pcm16_to_f32_bytes(pcm);
        let reply = self
            .broker
            .publish_and_await(&samples, self.broker_timeout)
            .await?;

        if let Some(reason) = reply.error {
            return Err(PipelineError::TranscriptionFailed(reason));
        }
        let text = reply
            .result
            .ok_or_else(|| PipelineError::TranscriptionFailed("empty worker reply".to_string()))?;

        // Transcript delivery wins over strict atomicity: a failed debit
        // is logged for manual reconciliation, the text still goes back.
        match self
            .ledger
            .post(
                user_id,
                estimated_seconds,
                "voice transcription",
                TransactionKind::Credit,
            )
            .await
        {
            Ok(_) => {
                info!(
                    "billed {}s of transcription to user {}",
                    estimated_seconds, user_id
                );
            }
            Err(LedgerError::InsufficientFunds) => {
                // Unreachable while the per-user lock is held; recorded anyway.
                error!(
                    "balance dropped below {}s mid-pipeline for user {}; transcription not billed",
                    estimated_seconds, user_id
                );
            }
            Err(e) => {
                error!(
                    "ledger write failed after successful transcription for user {} ({}s): {}; \
                     flagged for manual reconciliation",
                    user_id, estimated_seconds, e
                );
            }
        }

        Ok(text)
    }

    /// Number of user ids currently holding a serialization lock entry.
    pub fn user_lock_entries(&self) -> usize {
        self.user_locks.len()
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
