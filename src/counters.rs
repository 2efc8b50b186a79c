use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::keys::KeySchema;
use crate::models::TokenFrequency;

/// Persistent per-guild word counters. Counts only ever grow.
#[derive(Clone)]
pub struct TokenFrequencyAggregator {
    db: Database,
    keys: KeySchema,
}

impl TokenFrequencyAggregator {
    pub fn new(db: Database, keys: KeySchema) -> Self {
        Self { db, keys }
    }

    /// Add each delta to the guild's counter for that word; returns the new
    /// counts in input order.
    pub async fn increment(
        &self,
        guild_id: &str,
        deltas: Vec<(String, i64)>,
    ) -> Result<Vec<(String, i64)>> {
        if let Some((word, delta)) = deltas.iter().find(|(_, d)| *d < 0) {
            return Err(Error::Validation(format!(
                "negative delta {} for '{}'",
                delta, word
            )));
        }
        if deltas.is_empty() {
            return Ok(Vec::new());
        }

        let key = self.keys.token_counter_key(guild_id);
        debug!("Incrementing {} counters under {}", deltas.len(), key);
        self.db
            .run_blocking(move |db| db.increment_tokens(&key, &deltas))
            .await
    }

    /// Convenience for feeding a record's token map straight in.
    pub async fn increment_frequency(
        &self,
        guild_id: &str,
        tokens: &TokenFrequency,
    ) -> Result<Vec<(String, i64)>> {
        let deltas = tokens
            .iter()
            .map(|(word, count)| (word.clone(), i64::from(*count)))
            .collect();
        self.increment(guild_id, deltas).await
    }

    /// Current counts for `words`; unseen words read as 0.
    pub async fn get(&self, guild_id: &str, words: Vec<String>) -> Result<Vec<(String, i64)>> {
        let key = self.keys.token_counter_key(guild_id);
        self.db
            .run_blocking(move |db| db.token_counts(&key, &words))
            .await
    }
}
