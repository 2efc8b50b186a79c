use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sentiscope::config::Config;
use sentiscope::counters::TokenFrequencyAggregator;
use sentiscope::db::Database;
use sentiscope::embedding::{Embedder, OpenAiEmbedder};
use sentiscope::gate::ConcurrencyGate;
use sentiscope::keys::KeySchema;
use sentiscope::models::InboundMessage;
use sentiscope::preprocessing::TextPreprocessor;
use sentiscope::processing::{IngestOutcome, MessageProcessor};
use sentiscope::retention::{RetentionPolicy, RetentionSweeper};
use sentiscope::scope::ScopeFilter;
use sentiscope::sentiment::{HttpSentimentScorer, SentimentScorer};
use sentiscope::store::{RecordStore, StoreOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const BATCH_SIZE: usize = 32;

// Blocking HTTP clients must be built and dropped outside the runtime, so
// main stays synchronous and drives the runtime itself.
fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration: {:?}", config);

    let scorer: Arc<dyn SentimentScorer> = Arc::new(HttpSentimentScorer::new(
        &config.sentiment_url,
        config.sentiment_timeout(),
    )?);
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
        &config.embedding_url,
        &config.embedding_model,
        config.embedding_api_key.clone(),
        config.embedding_timeout(),
    )?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config, scorer.clone(), embedder.clone()));
    drop(runtime);
    result
}

async fn run(
    config: Config,
    scorer: Arc<dyn SentimentScorer>,
    embedder: Arc<dyn Embedder>,
) -> anyhow::Result<()> {
    let db = Database::open(&config.database_url)?;
    let keys = KeySchema::new(config.key_prefix.clone());
    let store = RecordStore::new(
        db.clone(),
        keys.clone(),
        StoreOptions {
            brute_force_threshold: config.ann_brute_force_threshold,
            ..StoreOptions::default()
        },
    )?;

    let processor = MessageProcessor::new(
        store.clone(),
        scorer,
        embedder,
        ConcurrencyGate::new(config.embedding_concurrency),
    )
    .with_preprocessor(TextPreprocessor::new(
        config.preprocessing_max_word_length,
        config.preprocessing_max_length,
    ))
    .with_token_counters(TokenFrequencyAggregator::new(db.clone(), keys))
    .with_skip_existing(config.skip_existing_messages);

    let sweeper = RetentionSweeper::new(
        store.clone(),
        RetentionPolicy::from_days(config.retention_days),
        Duration::from_secs(config.retention_sweep_interval_secs),
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    info!("Reading messages from stdin...");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    let mut guilds = BTreeSet::new();
    let mut stats = IngestStats::default();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(&line) {
            Ok(message) => batch.push(message),
            Err(e) => {
                warn!("Skipping unparsable message: {}", e);
                stats.dropped += 1;
                continue;
            }
        }
        if batch.len() >= BATCH_SIZE {
            ingest(&processor, &mut batch, &mut guilds, &mut stats).await;
        }
    }
    ingest(&processor, &mut batch, &mut guilds, &mut stats).await;

    info!(
        "Ingestion finished: {} saved, {} skipped, {} dropped",
        stats.saved, stats.skipped, stats.dropped
    );

    for guild_id in &guilds {
        match store
            .top_tokens(&ScopeFilter::guild(guild_id), 1000, 5, config.aggregation_timeout())
            .await
        {
            Ok(top) => info!("Guild {} top tokens: {:?}", guild_id, top),
            Err(e) => warn!("Guild {} token aggregation failed: {}", guild_id, e),
        }
    }

    sweeper_handle.abort();
    db.close()?;
    Ok(())
}

#[derive(Default)]
struct IngestStats {
    saved: usize,
    skipped: usize,
    dropped: usize,
}

async fn ingest(
    processor: &MessageProcessor,
    batch: &mut Vec<InboundMessage>,
    guilds: &mut BTreeSet<String>,
    stats: &mut IngestStats,
) {
    if batch.is_empty() {
        return;
    }
    let results = processor.process_batch(batch).await;
    for (message, result) in batch.iter().zip(results) {
        match result {
            Ok(IngestOutcome::Saved { .. }) => {
                stats.saved += 1;
                if let Some(guild_id) = &message.guild_id {
                    guilds.insert(guild_id.clone());
                }
            }
            Ok(IngestOutcome::Skipped(_)) => stats.skipped += 1,
            Err(_) => stats.dropped += 1,
        }
    }
    batch.clear();
}
