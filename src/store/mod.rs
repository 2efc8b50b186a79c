//! Enriched message index: scoped, vector, sentiment-range and aggregation
//! queries over the records persisted in [`Database`].
//!
//! SQLite work runs on tokio's blocking pool. No call retries internally;
//! storage failures surface as [`Error::Storage`] / [`Error::StorageUnavailable`].

pub mod aggregate;
pub mod ann;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::keys::{validate_id, KeySchema};
use crate::models::{
    EnrichedMessageRecord, Embedding, MessageFrequency, SentimentAverage, SimilarMessage,
};
use crate::scope::{ScopeFilter, TimeBucket};

use self::aggregate::{TokenCounts, MAX_FREQUENCY_BUCKETS};
use self::ann::{IndexParams, VectorIndex};

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Scoped candidate sets up to this size are ranked exactly.
    pub brute_force_threshold: usize,
    pub index: IndexParams,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            brute_force_threshold: 2048,
            index: IndexParams::default(),
        }
    }
}

#[derive(Clone)]
pub struct RecordStore {
    db: Database,
    keys: KeySchema,
    index: Arc<RwLock<VectorIndex>>,
    options: StoreOptions,
}

impl RecordStore {
    /// Attach to an open database and rebuild the vector index from it.
    pub fn new(db: Database, keys: KeySchema, options: StoreOptions) -> Result<Self> {
        let mut index = VectorIndex::new(options.index);
        for (key, embedding) in db.all_embeddings(keys.prefix())? {
            index.upsert(&key, embedding.as_slice());
        }
        info!(
            "RecordStore: loaded {} vectors for namespace '{}'",
            index.len(),
            keys.prefix()
        );

        Ok(Self {
            db,
            keys,
            index: Arc::new(RwLock::new(index)),
            options,
        })
    }

    pub fn keys(&self) -> &KeySchema {
        &self.keys
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn close(&self) -> Result<()> {
        self.db.close()
    }

    /// Upsert `record` at its deterministic key, fully replacing any previous
    /// version. Returns the key.
    pub async fn save(&self, record: EnrichedMessageRecord) -> Result<String> {
        for (name, value) in [
            ("guild_id", &record.guild_id),
            ("message_id", &record.message_id),
            ("channel_id", &record.channel_id),
            ("user_id", &record.user_id),
        ] {
            validate_id(name, value)?;
        }

        let key = self.keys.message_key(&record.guild_id, &record.message_id);
        let namespace = self.keys.prefix().to_string();
        let index = self.index.clone();
        let record_key = key.clone();

        self.db
            .run_blocking(move |db| {
                // Held across both writes so the index matches the last row written.
                let mut index = index.write().map_err(|e| {
                    Error::StorageUnavailable(format!("vector index lock poisoned: {}", e))
                })?;
                db.upsert_record(&record_key, &namespace, &record)?;
                index.upsert(&record_key, record.embedding.as_slice());
                Ok(())
            })
            .await?;

        debug!("RecordStore: saved {}", key);
        Ok(key)
    }

    pub async fn exists(&self, guild_id: &str, message_id: &str) -> Result<bool> {
        let key = self.keys.message_key(guild_id, message_id);
        self.db.run_blocking(move |db| db.record_exists(&key)).await
    }

    pub async fn get(&self, guild_id: &str, message_id: &str) -> Result<Option<EnrichedMessageRecord>> {
        let key = self.keys.message_key(guild_id, message_id);
        self.db.run_blocking(move |db| db.get_record(&key)).await
    }

    /// Most recent records in scope, newest first.
    pub async fn query_scoped(
        &self,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<EnrichedMessageRecord>> {
        let namespace = self.keys.prefix().to_string();
        let filter = filter.clone();
        let stored = self
            .db
            .run_blocking(move |db| db.recent_records(&namespace, &filter, limit))
            .await?;
        Ok(stored.into_iter().map(|s| s.record).collect())
    }

    /// Records in scope sent at or before `before`, newest first.
    pub async fn query_before(
        &self,
        filter: &ScopeFilter,
        before: f64,
        limit: usize,
    ) -> Result<Vec<EnrichedMessageRecord>> {
        let namespace = self.keys.prefix().to_string();
        let filter = filter.clone();
        let stored = self
            .db
            .run_blocking(move |db| db.recent_records_before(&namespace, &filter, before, limit))
            .await?;
        Ok(stored.into_iter().map(|s| s.record).collect())
    }

    /// Records in scope ranked by ascending cosine distance to `query`.
    pub async fn query_by_vector(
        &self,
        filter: &ScopeFilter,
        query: &Embedding,
        limit: usize,
    ) -> Result<Vec<SimilarMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let namespace = self.keys.prefix().to_string();
        let filter = filter.clone();
        let query = query.clone();
        let index = self.index.clone();
        let threshold = self.options.brute_force_threshold;
        // Ids never contain the key separator, so this prefix selects exactly one guild.
        let guild_prefix = self.keys.message_key(&filter.guild_id, "");

        self.db
            .run_blocking(move |db| {
                let candidates = db.count_scoped(&namespace, &filter)?;
                if candidates == 0 {
                    return Ok(Vec::new());
                }

                let ranked = if candidates <= threshold {
                    rank_exact(db.scoped_embeddings(&namespace, &filter)?, &query, limit)
                } else {
                    let wanted = limit.min(candidates);
                    // Only channel/user scopes need the key set; their id lists bound it.
                    let allowed: Option<HashSet<String>> = if filter.is_narrowed() {
                        Some(db.scoped_keys(&namespace, &filter)?.into_iter().collect())
                    } else {
                        None
                    };
                    let hits = {
                        let index = index.read().map_err(|e| {
                            Error::StorageUnavailable(format!("vector index lock poisoned: {}", e))
                        })?;
                        index.search_filtered(query.as_slice(), limit, |key| match &allowed {
                            Some(allowed) => allowed.contains(key),
                            None => key.starts_with(&guild_prefix),
                        })
                    };
                    if hits.len() < wanted {
                        debug!(
                            "RecordStore: ANN returned {} of {} hits, ranking exactly",
                            hits.len(),
                            wanted
                        );
                        rank_exact(db.scoped_embeddings(&namespace, &filter)?, &query, limit)
                    } else {
                        hits
                    }
                };

                let ranked_keys: Vec<String> = ranked.iter().map(|(k, _)| k.clone()).collect();
                let mut by_key: HashMap<String, EnrichedMessageRecord> = db
                    .records_by_keys(&ranked_keys)?
                    .into_iter()
                    .map(|s| (s.key, s.record))
                    .collect();

                Ok(ranked
                    .into_iter()
                    .filter_map(|(key, distance)| {
                        by_key
                            .remove(&key)
                            .map(|record| SimilarMessage { record, distance })
                    })
                    .collect())
            })
            .await
    }

    /// Records in scope with `compound` in `[center - radius, center + radius]`,
    /// newest first.
    pub async fn query_by_sentiment_range(
        &self,
        filter: &ScopeFilter,
        center: f64,
        radius: f64,
        limit: usize,
    ) -> Result<Vec<EnrichedMessageRecord>> {
        if !center.is_finite() || !radius.is_finite() || radius < 0.0 {
            return Err(Error::Validation(format!(
                "invalid sentiment range {} +/- {}",
                center, radius
            )));
        }
        let namespace = self.keys.prefix().to_string();
        let filter = filter.clone();
        let stored = self
            .db
            .run_blocking(move |db| {
                db.recent_records_in_compound_range(
                    &namespace,
                    &filter,
                    center - radius,
                    center + radius,
                    limit,
                )
            })
            .await?;
        Ok(stored.into_iter().map(|s| s.record).collect())
    }

    /// Merge the token maps of the `limit` most recent records in scope.
    pub async fn aggregate_token_counts(
        &self,
        filter: &ScopeFilter,
        limit: usize,
        timeout: Duration,
    ) -> Result<TokenCounts> {
        let namespace = self.keys.prefix().to_string();
        let filter = filter.clone();
        let maps = with_deadline(
            timeout,
            self.db
                .run_blocking(move |db| db.recent_token_maps(&namespace, &filter, limit)),
        )
        .await?;
        Ok(aggregate::merge_token_maps(&maps))
    }

    /// The `n` most used tokens among the `limit` most recent records in scope.
    pub async fn top_tokens(
        &self,
        filter: &ScopeFilter,
        limit: usize,
        n: usize,
        timeout: Duration,
    ) -> Result<Vec<(String, u64)>> {
        let counts = self.aggregate_token_counts(filter, limit, timeout).await?;
        Ok(aggregate::top_tokens(&counts, n))
    }

    /// Distinct messages per time bucket over the `limit` most recent records
    /// in scope, ascending, at most [`MAX_FREQUENCY_BUCKETS`] buckets.
    pub async fn aggregate_message_frequency(
        &self,
        filter: &ScopeFilter,
        bucket: TimeBucket,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<MessageFrequency>> {
        let namespace = self.keys.prefix().to_string();
        let filter = filter.clone();
        let rows = with_deadline(
            timeout,
            self.db
                .run_blocking(move |db| db.recent_timestamps(&namespace, &filter, limit)),
        )
        .await?;
        Ok(aggregate::bucket_frequencies(&rows, bucket, MAX_FREQUENCY_BUCKETS))
    }

    /// Mean sentiment per group over the `limit` most recent records in scope.
    ///
    /// Groups by the scope's field; a guild scope, or a channel/user scope
    /// with no ids, yields one guild-wide group.
    pub async fn aggregate_average_sentiment(
        &self,
        filter: &ScopeFilter,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<SentimentAverage>> {
        let namespace = self.keys.prefix().to_string();
        let filter = filter.clone();
        with_deadline(
            timeout,
            self.db
                .run_blocking(move |db| db.average_sentiment(&namespace, &filter, limit)),
        )
        .await
    }

    /// Delete every record older than `cutoff` (seconds since epoch).
    /// Token counters are left untouched.
    pub async fn purge_older_than(&self, cutoff: f64) -> Result<usize> {
        let namespace = self.keys.prefix().to_string();
        let index = self.index.clone();
        self.db
            .run_blocking(move |db| {
                let mut index = index.write().map_err(|e| {
                    Error::StorageUnavailable(format!("vector index lock poisoned: {}", e))
                })?;
                let deleted = db.delete_records_before(&namespace, cutoff)?;
                for key in &deleted {
                    index.remove(key);
                }
                Ok(deleted.len())
            })
            .await
    }
}

fn rank_exact(
    candidates: Vec<(String, Embedding)>,
    query: &Embedding,
    limit: usize,
) -> Vec<(String, f32)> {
    let mut ranked: Vec<(String, f32)> = candidates
        .into_iter()
        .map(|(key, embedding)| {
            let distance = embedding.cosine_distance(query);
            (key, distance)
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

/// Fail with [`Error::AggregationTimeout`] if `fut` does not finish in time.
pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::AggregationTimeout(timeout))?
}
