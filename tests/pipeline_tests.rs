use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lingua_chat::broker::{CorrelationBroker, JobTransport, TranscribeJob, TranscribeReply};
use lingua_chat::pipeline::{waveform_summary, NormalizedAudio, Normalizer};
use lingua_chat::{
    AudioFormat, BillingLedger, ChatStore, PipelineError, TransactionKind, TranscriptionPipeline,
    TransportError,
};

#[derive(Clone)]
enum ReplyMode {
    Text(&'static str),
    WorkerError(&'static str),
    Silent,
}

/// Transport that plays the external STT worker: parses the job and
/// replies through the broker after a delay.
struct EchoTransport {
    broker: Mutex<Option<Arc<CorrelationBroker>>>,
    mode: ReplyMode,
    delay: Duration,
    published: AtomicUsize,
}

impl EchoTransport {
    fn new(mode: ReplyMode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            broker: Mutex::new(None),
            mode,
            delay,
            published: AtomicUsize::new(0),
        })
    }

    fn wire(&self, broker: Arc<CorrelationBroker>) {
        *self.broker.lock().unwrap() = Some(broker);
    }

    fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobTransport for EchoTransport {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.published.fetch_add(1, Ordering::SeqCst);

        let job: TranscribeJob = serde_json::from_slice(&payload).expect("job payload is JSON");
        let reply = match &self.mode {
            ReplyMode::Text(text) => TranscribeReply {
                correlation_id: job.correlation_id,
                result: Some(text.to_string()),
                error: None,
            },
            ReplyMode::WorkerError(reason) => TranscribeReply {
                correlation_id: job.correlation_id,
                result: None,
                error: Some(reason.to_string()),
            },
            ReplyMode::Silent => return Ok(()),
        };

        let broker = self
            .broker
            .lock()
            .unwrap()
            .clone()
            .expect("broker wired before first publish");
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broker.on_response(job.correlation_id, reply);
        });
        Ok(())
    }
}

struct StubNormalizer {
    pcm: Vec<u8>,
    processed_seconds: Option<i64>,
    fail: bool,
}

impl StubNormalizer {
    fn passthrough() -> Self {
        Self {
            pcm: Vec::new(),
            processed_seconds: None,
            fail: false,
        }
    }
}

#[async_trait]
impl Normalizer for StubNormalizer {
    async fn normalize(&self, _raw: &[u8]) -> Result<NormalizedAudio, PipelineError> {
        if self.fail {
            return Err(PipelineError::ConversionFailed("malformed input".to_string()));
        }
        Ok(NormalizedAudio {
            pcm: self.pcm.clone(),
            processed_seconds: self.processed_seconds,
        })
    }
}

async fn setup(
    mode: ReplyMode,
    normalizer: StubNormalizer,
    delay: Duration,
) -> (Arc<TranscriptionPipeline>, Arc<BillingLedger>, Arc<EchoTransport>) {
    let store = ChatStore::connect("sqlite::memory:")
        .await
        .expect("in-memory store");
    let ledger = Arc::new(BillingLedger::new(store.pool()));

    let transport = EchoTransport::new(mode, delay);
    let broker = CorrelationBroker::new(
        Arc::clone(&transport) as Arc<dyn JobTransport>,
        "replies.test".to_string(),
        16000,
    );
    transport.wire(Arc::clone(&broker));

    let pipeline = Arc::new(TranscriptionPipeline::new(
        broker,
        Arc::new(normalizer),
        Arc::clone(&ledger),
        Duration::from_millis(500),
        16000,
    ));
    (pipeline, ledger, transport)
}

/// Raw s16le PCM worth `seconds` of audio at 16kHz mono.
fn raw_pcm(seconds: usize) -> Vec<u8> {
    vec![0u8; seconds * 16000 * 2]
}

#[tokio::test]
async fn successful_transcription_returns_text_and_debits() {
    let (pipeline, ledger, _transport) = setup(
        ReplyMode::Text("hello world"),
        StubNormalizer::passthrough(),
        Duration::from_millis(5),
    )
    .await;
    ledger
        .post("alice", 100, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    let result = pipeline
        .transcribe("alice", &raw_pcm(2), AudioFormat::RawPcm)
        .await
        .expect("pipeline succeeds");

    assert_eq!(result.text, "hello world");
    assert_eq!(result.billed_seconds, 2);
    assert_eq!(result.duration_seconds, 2.0);
    assert_eq!(ledger.balance("alice").await.unwrap(), 98);

    let history = ledger.get("alice").await.unwrap();
    assert_eq!(history[0].transaction_type, TransactionKind::Credit);
    assert_eq!(history[0].amount, 2);
}

#[tokio::test]
async fn partial_second_is_billed_as_a_whole_one() {
    let (pipeline, ledger, _transport) = setup(
        ReplyMode::Text("hi"),
        StubNormalizer::passthrough(),
        Duration::from_millis(5),
    )
    .await;
    ledger
        .post("alice", 10, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    // Half a second of samples.
    let audio = vec![0u8; 8000 * 2];
    let result = pipeline
        .transcribe("alice", &audio, AudioFormat::RawPcm)
        .await
        .unwrap();

    assert_eq!(result.duration_seconds, 0.5);
    assert_eq!(result.billed_seconds, 1);
    assert_eq!(ledger.balance("alice").await.unwrap(), 9);
}

#[tokio::test]
async fn worker_error_surfaces_without_billing() {
    let (pipeline, ledger, _transport) = setup(
        ReplyMode::WorkerError("unintelligible audio"),
        StubNormalizer::passthrough(),
        Duration::from_millis(5),
    )
    .await;
    ledger
        .post("alice", 100, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    let err = pipeline
        .transcribe("alice", &raw_pcm(1), AudioFormat::RawPcm)
        .await
        .expect_err("worker reported failure");

    assert!(matches!(err, PipelineError::TranscriptionFailed(ref r) if r == "unintelligible audio"));
    assert_eq!(ledger.balance("alice").await.unwrap(), 100);
    assert_eq!(ledger.get("alice").await.unwrap().len(), 1, "seed only");
}

#[tokio::test]
async fn insufficient_balance_halts_before_any_publish() {
    let (pipeline, ledger, transport) = setup(
        ReplyMode::Text("never sent"),
        StubNormalizer::passthrough(),
        Duration::from_millis(5),
    )
    .await;
    ledger
        .post("alice", 3, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    let err = pipeline
        .transcribe("alice", &raw_pcm(6), AudioFormat::RawPcm)
        .await
        .expect_err("3 < 6");

    assert!(matches!(
        err,
        PipelineError::InsufficientBalance { needed: 6, available: 3 }
    ));
    assert_eq!(transport.published(), 0, "no network call before the check");
}

#[tokio::test]
async fn broker_timeout_maps_to_upstream_unavailable() {
    let (pipeline, ledger, _transport) = setup(
        ReplyMode::Silent,
        StubNormalizer::passthrough(),
        Duration::ZERO,
    )
    .await;
    ledger
        .post("alice", 100, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    let err = pipeline
        .transcribe("alice", &raw_pcm(1), AudioFormat::RawPcm)
        .await
        .expect_err("worker never replies");

    assert!(matches!(err, PipelineError::UpstreamUnavailable(_)));
    assert_eq!(ledger.balance("alice").await.unwrap(), 100, "timeout is not billed");
}

#[tokio::test]
async fn encoded_audio_uses_normalizer_reported_duration() {
    let normalizer = StubNormalizer {
        // Ten seconds of samples, but the converter reports seven
        // processed seconds; the report wins.
        pcm: raw_pcm(10),
        processed_seconds: Some(7),
        fail: false,
    };
    let (pipeline, ledger, _transport) =
        setup(ReplyMode::Text("bonjour"), normalizer, Duration::from_millis(5)).await;
    ledger
        .post("alice", 10, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    let result = pipeline
        .transcribe("alice", b"opus-container-bytes", AudioFormat::Encoded)
        .await
        .unwrap();

    assert_eq!(result.billed_seconds, 7);
    assert_eq!(result.duration_seconds, 7.0);
    assert_eq!(ledger.balance("alice").await.unwrap(), 3);
}

#[tokio::test]
async fn conversion_failure_stops_the_pipeline() {
    let normalizer = StubNormalizer {
        pcm: Vec::new(),
        processed_seconds: None,
        fail: true,
    };
    let (pipeline, ledger, transport) =
        setup(ReplyMode::Text("unused"), normalizer, Duration::from_millis(5)).await;
    ledger
        .post("alice", 100, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    let err = pipeline
        .transcribe("alice", b"garbage", AudioFormat::Encoded)
        .await
        .expect_err("normalizer fails");

    assert!(matches!(err, PipelineError::ConversionFailed(_)));
    assert_eq!(transport.published(), 0);
    assert_eq!(ledger.balance("alice").await.unwrap(), 100);
}

#[tokio::test]
async fn voice_waveform_comes_from_normalized_samples() {
    // One loud second of normalized audio behind an encoded upload.
    let loud: Vec<u8> = [i16::MAX; 16000].iter().flat_map(|s| s.to_le_bytes()).collect();
    let normalizer = StubNormalizer {
        pcm: loud.clone(),
        processed_seconds: Some(1),
        fail: false,
    };
    let (pipeline, ledger, _transport) =
        setup(ReplyMode::Text("salut"), normalizer, Duration::from_millis(5)).await;
    ledger
        .post("alice", 10, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    let container = b"OggS-container-header-bytes";
    let result = pipeline
        .transcribe("alice", container, AudioFormat::Encoded)
        .await
        .unwrap();

    assert_eq!(result.sound_wave, waveform_summary(&loud, 50));
    assert_ne!(result.sound_wave, waveform_summary(container, 50));
}

#[tokio::test]
async fn duration_follows_the_configured_sample_rate() {
    let store = ChatStore::connect("sqlite::memory:")
        .await
        .expect("in-memory store");
    let ledger = Arc::new(BillingLedger::new(store.pool()));
    let transport = EchoTransport::new(ReplyMode::Text("ok"), Duration::from_millis(5));
    let broker = CorrelationBroker::new(
        Arc::clone(&transport) as Arc<dyn JobTransport>,
        "replies.test".to_string(),
        8000,
    );
    transport.wire(Arc::clone(&broker));
    let pipeline = TranscriptionPipeline::new(
        broker,
        Arc::new(StubNormalizer::passthrough()),
        Arc::clone(&ledger),
        Duration::from_millis(500),
        8000,
    );
    ledger
        .post("alice", 10, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    // 32000 samples are two seconds at 16kHz but four at 8kHz.
    let audio = vec![0u8; 32000 * 2];
    let result = pipeline
        .transcribe("alice", &audio, AudioFormat::RawPcm)
        .await
        .unwrap();

    assert_eq!(result.duration_seconds, 4.0);
    assert_eq!(result.billed_seconds, 4);
    assert_eq!(ledger.balance("alice").await.unwrap(), 6);
}

#[tokio::test]
async fn user_lock_entries_are_pruned_after_the_request() {
    let (pipeline, ledger, _transport) = setup(
        ReplyMode::Text("ok"),
        StubNormalizer::passthrough(),
        Duration::from_millis(5),
    )
    .await;
    ledger
        .post("alice", 10, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    pipeline
        .transcribe("alice", &raw_pcm(2), AudioFormat::RawPcm)
        .await
        .unwrap();
    assert_eq!(pipeline.user_lock_entries(), 0);

    // Failed requests do not retain an entry either.
    let err = pipeline
        .transcribe("alice", &raw_pcm(20), AudioFormat::RawPcm)
        .await
        .expect_err("8 < 20");
    assert!(matches!(err, PipelineError::InsufficientBalance { .. }));
    assert_eq!(pipeline.user_lock_entries(), 0);
}

#[tokio::test]
async fn concurrent_requests_for_one_user_serialize_check_and_debit() {
    let (pipeline, ledger, _transport) = setup(
        ReplyMode::Text("ok"),
        StubNormalizer::passthrough(),
        Duration::from_millis(30),
    )
    .await;
    ledger
        .post("alice", 10, "seed", TransactionKind::Debit)
        .await
        .unwrap();

    let first = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.transcribe("alice", &raw_pcm(6), AudioFormat::RawPcm).await })
    };
    let second = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.transcribe("alice", &raw_pcm(6), AudioFormat::RawPcm).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1, "10s of balance funds exactly one 6s request");

    let failure = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one request must fail");
    assert!(matches!(
        failure,
        PipelineError::InsufficientBalance { needed: 6, available: 4 }
    ));

    assert_eq!(ledger.balance("alice").await.unwrap(), 4);
}

#[tokio::test]
async fn users_do_not_serialize_against_each_other() {
    let (pipeline, ledger, _transport) = setup(
        ReplyMode::Text("ok"),
        StubNormalizer::passthrough(),
        Duration::from_millis(5),
    )
    .await;
    for user in ["alice", "bob"] {
        ledger
            .post(user, 10, "seed", TransactionKind::Debit)
            .await
            .unwrap();
    }

    let a = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.transcribe("alice", &raw_pcm(6), AudioFormat::RawPcm).await })
    };
    let b = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.transcribe("bob", &raw_pcm(6), AudioFormat::RawPcm).await })
    };

    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());
    assert_eq!(ledger.balance("alice").await.unwrap(), 4);
    assert_eq!(ledger.balance("bob").await.unwrap(), 4);
}
