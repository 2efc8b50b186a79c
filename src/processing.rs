//! Per-message ingestion: preprocess, enrich concurrently, save.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::counters::TokenFrequencyAggregator;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::gate::ConcurrencyGate;
use crate::keys::validate_id;
use crate::models::{EnrichedMessageRecord, InboundMessage};
use crate::preprocessing::TextPreprocessor;
use crate::sentiment::{calculate_sentiment, SentimentScorer};
use crate::store::RecordStore;
use crate::words::{word_frequency, Tokenizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing left after cleaning; the model services were not called.
    EmptyAfterPreprocessing,
    AlreadyStored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Saved { key: String },
    Skipped(SkipReason),
}

#[derive(Clone)]
pub struct MessageProcessor {
    preprocessor: Arc<TextPreprocessor>,
    tokenizer: Arc<Tokenizer>,
    scorer: Arc<dyn SentimentScorer>,
    embedder: Arc<dyn Embedder>,
    embed_gate: ConcurrencyGate,
    store: RecordStore,
    counters: Option<TokenFrequencyAggregator>,
    skip_existing: bool,
}

impl MessageProcessor {
    pub fn new(
        store: RecordStore,
        scorer: Arc<dyn SentimentScorer>,
        embedder: Arc<dyn Embedder>,
        embed_gate: ConcurrencyGate,
    ) -> Self {
        Self {
            preprocessor: Arc::new(TextPreprocessor::default()),
            tokenizer: Arc::new(Tokenizer::new()),
            scorer,
            embedder,
            embed_gate,
            store,
            counters: None,
            skip_existing: false,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: TextPreprocessor) -> Self {
        self.preprocessor = Arc::new(preprocessor);
        self
    }

    /// Also add each saved record's tokens to its guild counter.
    pub fn with_token_counters(mut self, counters: TokenFrequencyAggregator) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Skip messages whose record already exists instead of overwriting them.
    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    pub async fn process_message(&self, message: &InboundMessage) -> Result<IngestOutcome> {
        let guild_id = validate(message)?;

        if self.skip_existing && self.store.exists(guild_id, &message.message_id).await? {
            debug!("Message {} already stored, skipping", message.message_id);
            return Ok(IngestOutcome::Skipped(SkipReason::AlreadyStored));
        }

        let text = self.preprocessor.process(&message.text);
        if text.is_empty() {
            debug!(
                "Ignoring message {} because it's empty after processing",
                message.message_id
            );
            return Ok(IngestOutcome::Skipped(SkipReason::EmptyAfterPreprocessing));
        }

        let tokenizer = self.tokenizer.clone();
        let token_text = text.clone();
        let tokens = tokio::task::spawn_blocking(move || word_frequency(&tokenizer.tokenize(&token_text)));

        let scorer = self.scorer.clone();
        let sentiment_text = text.clone();
        let sentiment =
            tokio::task::spawn_blocking(move || calculate_sentiment(scorer.as_ref(), &sentiment_text));

        let embedder = self.embedder.clone();
        let embedding = self.embed_gate.run_blocking(move || embedder.embed(&text));

        let (tokens, sentiment, embedding) = tokio::join!(tokens, sentiment, embedding);
        let tokens = tokens?;
        let sentiment = sentiment??;
        let embedding = embedding?;

        let record = EnrichedMessageRecord {
            message_id: message.message_id.clone(),
            channel_id: message.channel_id.clone(),
            guild_id: guild_id.to_string(),
            user_id: message.user_id.clone(),
            timestamp: timestamp_secs(message),
            sentiment,
            embedding,
            tokens,
        };

        let key = self.store.save(record.clone()).await?;
        // The record is already stored; counter failures only warn.
        if let Some(counters) = &self.counters {
            if let Err(e) = counters.increment_frequency(guild_id, &record.tokens).await {
                warn!("Saved {} but failed to update token counters: {}", key, e);
            }
        }

        info!("Saved message {} as {}", message.message_id, key);
        Ok(IngestOutcome::Saved { key })
    }

    /// Process messages concurrently. A failure only affects its own message.
    pub async fn process_batch(&self, messages: &[InboundMessage]) -> Vec<Result<IngestOutcome>> {
        let results = join_all(messages.iter().map(|m| self.process_message(m))).await;
        for (message, result) in messages.iter().zip(&results) {
            if let Err(e) = result {
                error!("Dropped message {}: {}", message.message_id, e);
            }
        }
        results
    }
}

fn validate(message: &InboundMessage) -> Result<&str> {
    let guild_id = match message.guild_id.as_deref() {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return Err(Error::Validation(format!(
                "message {} is not in a guild",
                message.message_id
            )))
        }
    };
    validate_id("guild_id", guild_id)?;
    validate_id("message_id", &message.message_id)?;
    validate_id("channel_id", &message.channel_id)?;
    validate_id("user_id", &message.user_id)?;
    Ok(guild_id)
}

fn timestamp_secs(message: &InboundMessage) -> f64 {
    message.timestamp.timestamp() as f64
        + f64::from(message.timestamp.timestamp_subsec_micros()) / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::keys::KeySchema;
    use crate::scope::ScopeFilter;
    use crate::store::StoreOptions;
    use crate::test_support::{HashEmbedder, LexiconScorer};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        processor: MessageProcessor,
        store: RecordStore,
        counters: TokenFrequencyAggregator,
        scorer: Arc<LexiconScorer>,
        embedder: Arc<HashEmbedder>,
    }

    fn fixture_with(embedder: HashEmbedder) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let keys = KeySchema::new("test");
        let store = RecordStore::new(db.clone(), keys.clone(), StoreOptions::default()).unwrap();
        let counters = TokenFrequencyAggregator::new(db, keys);
        let scorer = Arc::new(LexiconScorer::default());
        let embedder = Arc::new(embedder);
        let processor = MessageProcessor::new(
            store.clone(),
            scorer.clone(),
            embedder.clone(),
            ConcurrencyGate::new(2),
        )
        .with_token_counters(counters.clone());
        Fixture {
            processor,
            store,
            counters,
            scorer,
            embedder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(HashEmbedder::default())
    }

    fn message(id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.to_string(),
            channel_id: "c1".to_string(),
            guild_id: Some("g1".to_string()),
            user_id: "u1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 7, 20, 12, 0, 0).unwrap(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_process_saves_enriched_record() {
        let f = fixture();
        let outcome = f
            .processor
            .process_message(&message("m1", "I love great dogs!"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Saved {
                key: "test:messages:g1:m1".to_string()
            }
        );

        let record = f.store.get("g1", "m1").await.unwrap().unwrap();
        assert_eq!(record.channel_id, "c1");
        assert_eq!(record.timestamp, 1721476800.0);
        assert!((record.sentiment.compound - 1.0).abs() < 1e-9);
        assert_eq!(record.tokens.get("dog"), Some(&1));

        let counts = f.counters.get("g1", vec!["dog".to_string()]).await.unwrap();
        assert_eq!(counts, vec![("dog".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_empty_after_preprocessing_skips_enrichment() {
        let f = fixture();
        let outcome = f
            .processor
            .process_message(&message("m1", "```let x = 1;``` https://example.com"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Skipped(SkipReason::EmptyAfterPreprocessing)
        );
        assert_eq!(f.scorer.calls(), 0);
        assert_eq!(f.embedder.calls(), 0);
        assert!(!f.store.exists("g1", "m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_guild_is_validation_error() {
        let f = fixture();
        let mut m = message("m1", "hello there");
        m.guild_id = None;
        let err = f.processor.process_message(&m).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(f.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_colon_in_ids_is_validation_error() {
        let f = fixture();
        let mut m = message("b:c", "hello there");
        let err = f.processor.process_message(&m).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        m.message_id = "m1".to_string();
        m.guild_id = Some("g1:x".to_string());
        let err = f.processor.process_message(&m).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(f.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_counter_failure_still_reports_saved() {
        let f = fixture();
        let closed = Database::open_in_memory().unwrap();
        closed.close().unwrap();
        let processor = f
            .processor
            .clone()
            .with_token_counters(TokenFrequencyAggregator::new(closed, KeySchema::new("test")));

        let outcome = processor
            .process_message(&message("m1", "counted words"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Saved {
                key: "test:messages:g1:m1".to_string()
            }
        );
        assert!(f.store.exists("g1", "m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_skip_existing() {
        let f = fixture();
        let processor = f.processor.clone().with_skip_existing(true);
        processor.process_message(&message("m1", "first words")).await.unwrap();
        let outcome = processor
            .process_message(&message("m1", "second words"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped(SkipReason::AlreadyStored));
        assert_eq!(f.embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_enrichment_failure_is_isolated() {
        let f = fixture_with(HashEmbedder::failing_on("poison"));
        let batch = vec![
            message("m1", "a perfectly normal message"),
            message("m2", "this one carries poison"),
            message("m3", "another normal message"),
        ];
        let results = f.processor.process_batch(&batch).await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Enrichment(_))));
        assert!(results[2].is_ok());

        let stored = f.store.query_scoped(&ScopeFilter::guild("g1"), 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(!f.store.exists("g1", "m2").await.unwrap());
    }
}
