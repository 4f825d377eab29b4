use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lingua_chat::{
    create_router, AppState, BillingLedger, ChatStore, Config, CorrelationBroker,
    FfmpegNormalizer, NatsClient, SessionRegistry, TranscriptionPipeline,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "lingua-chat", about = "Language-tutoring chat backend")]
struct Args {
    /// Path to the config file (without extension)
    #[arg(short, long, default_value = "config/lingua-chat")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;
    info!("{} starting", cfg.service.name);

    let store = Arc::new(
        ChatStore::connect(&cfg.database.url)
            .await
            .context("Failed to open chat store")?,
    );
    let ledger = Arc::new(BillingLedger::new(store.pool()));

    let nats = NatsClient::connect(&cfg.broker.url, &cfg.broker.job_subject)
        .await
        .context("Failed to connect to NATS")?;
    let broker = CorrelationBroker::new(
        Arc::new(nats.clone()),
        nats.reply_subject().to_string(),
        cfg.audio.sample_rate,
    );
    let _reply_listener = nats
        .spawn_reply_listener(Arc::clone(&broker))
        .await
        .context("Failed to start reply listener")?;

    let normalizer = Arc::new(FfmpegNormalizer::new(
        Duration::from_secs(cfg.audio.convert_timeout_secs),
        cfg.audio.sample_rate,
    ));
    let pipeline = Arc::new(TranscriptionPipeline::new(
        broker,
        normalizer,
        Arc::clone(&ledger),
        Duration::from_secs(cfg.broker.timeout_secs),
        cfg.audio.sample_rate,
    ));

    let state = AppState {
        registry: Arc::new(SessionRegistry::new()),
        pipeline,
        ledger,
        store,
    };

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(state))
        .await
        .context("HTTP server failed")?;

    Ok(())
}
