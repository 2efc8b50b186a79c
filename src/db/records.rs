use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::warn;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{EnrichedMessageRecord, Embedding, SentimentAverage, SentimentScore, TokenFrequency};
use crate::scope::ScopeFilter;

const RECORD_COLUMNS: &str = "key, message_id, channel_id, guild_id, user_id, timestamp, \
     sentiment_neg, sentiment_neu, sentiment_pos, sentiment_compound, embedding, tokens";

/// A decoded row together with its key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub record: EnrichedMessageRecord,
}

/// Row as read from SQLite, before the embedding and token map are decoded.
struct RawRecord {
    key: String,
    message_id: String,
    channel_id: String,
    guild_id: String,
    user_id: String,
    timestamp: f64,
    sentiment: SentimentScore,
    embedding: Vec<u8>,
    tokens: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            message_id: row.get(1)?,
            channel_id: row.get(2)?,
            guild_id: row.get(3)?,
            user_id: row.get(4)?,
            timestamp: row.get(5)?,
            sentiment: SentimentScore {
                neg: row.get(6)?,
                neu: row.get(7)?,
                pos: row.get(8)?,
                compound: row.get(9)?,
            },
            embedding: row.get(10)?,
            tokens: row.get(11)?,
        })
    }

    fn decode(self) -> Result<StoredRecord> {
        let embedding =
            Embedding::from_bytes(&self.embedding).map_err(|e| Error::malformed(&self.key, e))?;
        let tokens: TokenFrequency =
            serde_json::from_str(&self.tokens).map_err(|e| Error::malformed(&self.key, e))?;
        Ok(StoredRecord {
            key: self.key,
            record: EnrichedMessageRecord {
                message_id: self.message_id,
                channel_id: self.channel_id,
                guild_id: self.guild_id,
                user_id: self.user_id,
                timestamp: self.timestamp,
                sentiment: self.sentiment,
                embedding,
                tokens,
            },
        })
    }
}

/// WHERE clause built from the namespace, the scope and optional numeric terms.
struct Predicate {
    sql: String,
    params: Vec<Value>,
}

impl Predicate {
    fn scoped(namespace: &str, filter: &ScopeFilter) -> Self {
        let (scope_sql, scope_params) = filter.to_sql(2);
        let mut params = vec![Value::Text(namespace.to_string())];
        params.extend(scope_params.into_iter().map(Value::Text));
        Self {
            sql: format!("namespace = ?1 AND {}", scope_sql),
            params,
        }
    }

    fn next_param(&self) -> usize {
        self.params.len() + 1
    }

    fn and_between(mut self, column: &str, min: f64, max: f64) -> Self {
        let i = self.next_param();
        self.sql
            .push_str(&format!(" AND {} BETWEEN ?{} AND ?{}", column, i, i + 1));
        self.params.push(Value::Real(min));
        self.params.push(Value::Real(max));
        self
    }

    fn and_at_most(mut self, column: &str, max: f64) -> Self {
        let i = self.next_param();
        self.sql.push_str(&format!(" AND {} <= ?{}", column, i));
        self.params.push(Value::Real(max));
        self
    }

    /// Append a `LIMIT` placeholder and return its SQL fragment.
    fn limit(&mut self, limit: usize) -> String {
        let i = self.next_param();
        self.params
            .push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        format!("LIMIT ?{}", i)
    }
}

/// Decode rows, skipping malformed ones with a warning.
fn decode_rows(rows: Vec<RawRecord>) -> Vec<StoredRecord> {
    rows.into_iter()
        .filter_map(|raw| match raw.decode() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping stored record: {}", e);
                None
            }
        })
        .collect()
}

impl Database {
    /// Insert or fully replace the record stored at `key`.
    pub fn upsert_record(
        &self,
        key: &str,
        namespace: &str,
        record: &EnrichedMessageRecord,
    ) -> Result<()> {
        let tokens = serde_json::to_string(&record.tokens)
            .map_err(|e| Error::malformed(key, e))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO messages (key, namespace, message_id, channel_id, guild_id, user_id,
                     timestamp, sentiment_neg, sentiment_neu, sentiment_pos, sentiment_compound, embedding, tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    key,
                    namespace,
                    record.message_id,
                    record.channel_id,
                    record.guild_id,
                    record.user_id,
                    record.timestamp,
                    record.sentiment.neg,
                    record.sentiment.neu,
                    record.sentiment.pos,
                    record.sentiment.compound,
                    record.embedding.to_bytes(),
                    tokens,
                ],
            )?;
            Ok(())
        })
    }

    pub fn record_exists(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn
                .prepare_cached("SELECT 1 FROM messages WHERE key = ?1")?
                .exists([key])?)
        })
    }

    pub fn get_record(&self, key: &str) -> Result<Option<EnrichedMessageRecord>> {
        let raw = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM messages WHERE key = ?1", RECORD_COLUMNS),
                    [key],
                    RawRecord::from_row,
                )
                .optional()?)
        })?;
        raw.map(|r| r.decode().map(|stored| stored.record)).transpose()
    }

    /// Most recent records matching `filter`.
    pub fn recent_records(
        &self,
        namespace: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        self.select_recent(Predicate::scoped(namespace, filter), limit)
    }

    /// Most recent records at or before `before` (seconds since epoch).
    pub fn recent_records_before(
        &self,
        namespace: &str,
        filter: &ScopeFilter,
        before: f64,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let predicate = Predicate::scoped(namespace, filter).and_at_most("timestamp", before);
        self.select_recent(predicate, limit)
    }

    /// Most recent records whose compound score lies in `[min, max]`.
    pub fn recent_records_in_compound_range(
        &self,
        namespace: &str,
        filter: &ScopeFilter,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let predicate =
            Predicate::scoped(namespace, filter).and_between("sentiment_compound", min, max);
        self.select_recent(predicate, limit)
    }

    fn select_recent(&self, mut predicate: Predicate, limit: usize) -> Result<Vec<StoredRecord>> {
        let limit_sql = predicate.limit(limit);
        let sql = format!(
            "SELECT {} FROM messages WHERE {} ORDER BY timestamp DESC, key ASC {}",
            RECORD_COLUMNS, predicate.sql, limit_sql
        );
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(predicate.params.iter()), RawRecord::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;
        Ok(decode_rows(rows))
    }

    /// Number of records matching `filter`.
    pub fn count_scoped(&self, namespace: &str, filter: &ScopeFilter) -> Result<usize> {
        let predicate = Predicate::scoped(namespace, filter);
        let sql = format!("SELECT COUNT(*) FROM messages WHERE {}", predicate.sql);
        let count: i64 = self.with_conn(|conn| {
            Ok(conn.query_row(&sql, params_from_iter(predicate.params.iter()), |row| row.get(0))?)
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Keys of every record matching `filter`.
    pub fn scoped_keys(&self, namespace: &str, filter: &ScopeFilter) -> Result<Vec<String>> {
        let predicate = Predicate::scoped(namespace, filter);
        let sql = format!("SELECT key FROM messages WHERE {}", predicate.sql);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(predicate.params.iter()), |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
    }

    /// Embeddings of every record matching `filter`.
    pub fn scoped_embeddings(
        &self,
        namespace: &str,
        filter: &ScopeFilter,
    ) -> Result<Vec<(String, Embedding)>> {
        let predicate = Predicate::scoped(namespace, filter);
        let sql = format!("SELECT key, embedding FROM messages WHERE {}", predicate.sql);
        self.select_embeddings(&sql, &predicate.params)
    }

    /// Every embedding in the namespace, used to rebuild the vector index.
    pub fn all_embeddings(&self, namespace: &str) -> Result<Vec<(String, Embedding)>> {
        self.select_embeddings(
            "SELECT key, embedding FROM messages WHERE namespace = ?1 ORDER BY timestamp ASC, key ASC",
            &[Value::Text(namespace.to_string())],
        )
    }

    fn select_embeddings(&self, sql: &str, params: &[Value]) -> Result<Vec<(String, Embedding)>> {
        let rows: Vec<(String, Vec<u8>)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, bytes)| match Embedding::from_bytes(&bytes) {
                Ok(embedding) => Some((key, embedding)),
                Err(e) => {
                    warn!("Skipping embedding of {}: {}", key, e);
                    None
                }
            })
            .collect())
    }

    /// Fetch records by key, in no particular order. Missing keys are ignored.
    pub fn records_by_keys(&self, keys: &[String]) -> Result<Vec<StoredRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=keys.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {} FROM messages WHERE key IN ({})",
            RECORD_COLUMNS,
            placeholders.join(", ")
        );
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(keys.iter()), RawRecord::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;
        Ok(decode_rows(rows))
    }

    /// Token maps of the `limit` most recent matching records.
    pub fn recent_token_maps(
        &self,
        namespace: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<TokenFrequency>> {
        let mut predicate = Predicate::scoped(namespace, filter);
        let limit_sql = predicate.limit(limit);
        let sql = format!(
            "SELECT key, tokens FROM messages WHERE {} ORDER BY timestamp DESC {}",
            predicate.sql, limit_sql
        );
        let rows: Vec<(String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(predicate.params.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, tokens)| match serde_json::from_str(&tokens) {
                Ok(map) => Some(map),
                Err(e) => {
                    warn!("Skipping tokens of {}: {}", key, e);
                    None
                }
            })
            .collect())
    }

    /// `(message_id, timestamp)` of the `limit` most recent matching records.
    pub fn recent_timestamps(
        &self,
        namespace: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let mut predicate = Predicate::scoped(namespace, filter);
        let limit_sql = predicate.limit(limit);
        let sql = format!(
            "SELECT message_id, timestamp FROM messages WHERE {} ORDER BY timestamp DESC {}",
            predicate.sql, limit_sql
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(predicate.params.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Mean sentiment over the `limit` most recent matching records, grouped by
    /// the filter's discriminating column.
    pub fn average_sentiment(
        &self,
        namespace: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<SentimentAverage>> {
        let group = filter.group_field();
        let mut predicate = Predicate::scoped(namespace, filter);
        let limit_sql = predicate.limit(limit);
        let sql = format!(
            "SELECT {group}, AVG(sentiment_neg), AVG(sentiment_neu), AVG(sentiment_pos),
                    AVG(sentiment_compound), COUNT(*)
             FROM (SELECT * FROM messages WHERE {} ORDER BY timestamp DESC {})
             GROUP BY {group}
             ORDER BY {group}",
            predicate.sql,
            limit_sql,
            group = group
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(predicate.params.iter()), |row| {
                let count: i64 = row.get(5)?;
                Ok(SentimentAverage {
                    group_key: row.get(0)?,
                    avg_neg: row.get(1)?,
                    avg_neu: row.get(2)?,
                    avg_pos: row.get(3)?,
                    avg_compound: row.get(4)?,
                    num_messages: usize::try_from(count).unwrap_or(0),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Delete every record in the namespace older than `cutoff`; returns their keys.
    pub fn delete_records_before(&self, namespace: &str, cutoff: f64) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let keys = {
                let mut stmt =
                    tx.prepare("SELECT key FROM messages WHERE namespace = ?1 AND timestamp < ?2")?;
                let rows = stmt.query_map(params![namespace, cutoff], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()?
            };
            tx.execute(
                "DELETE FROM messages WHERE namespace = ?1 AND timestamp < ?2",
                params![namespace, cutoff],
            )?;
            tx.commit()?;
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{build_scope, StatisticScope};
    use crate::test_support::record;

    #[test]
    fn test_upsert_overwrites() {
        let db = Database::open_in_memory().unwrap();
        let mut r = record("g", "c", "u", "m1", 10.0, 0.1, "hello");
        db.upsert_record("ns:messages:g:m1", "ns", &r).unwrap();
        r.sentiment.compound = 0.9;
        db.upsert_record("ns:messages:g:m1", "ns", &r).unwrap();

        let stored = db.get_record("ns:messages:g:m1").unwrap().unwrap();
        assert_eq!(stored, r);
        assert!(db.record_exists("ns:messages:g:m1").unwrap());
        assert!(!db.record_exists("ns:messages:g:m2").unwrap());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        let r = record("g", "c", "u", "m1", 10.0, 0.1, "hello");
        db.upsert_record("a:messages:g:m1", "a", &r).unwrap();
        db.upsert_record("b:messages:g:m1", "b", &r).unwrap();

        let found = db.recent_records("a", &ScopeFilter::guild("g"), 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "a:messages:g:m1");
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        let good = record("g", "c", "u", "m1", 10.0, 0.1, "hello");
        db.upsert_record("ns:messages:g:m1", "ns", &good).unwrap();
        db.upsert_record("ns:messages:g:m2", "ns", &good).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET tokens = 'not json' WHERE key = 'ns:messages:g:m2'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let found = db.recent_records("ns", &ScopeFilter::guild("g"), 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "ns:messages:g:m1");

        let maps = db.recent_token_maps("ns", &ScopeFilter::guild("g"), 10).unwrap();
        assert_eq!(maps.len(), 1);

        let err = db.get_record("ns:messages:g:m2").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { .. }));
    }

    #[test]
    fn test_delete_records_before() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_record("ns:messages:g:old", "ns", &record("g", "c", "u", "old", 10.0, 0.0, "old"))
            .unwrap();
        db.upsert_record("ns:messages:g:new", "ns", &record("g", "c", "u", "new", 500.0, 0.0, "new"))
            .unwrap();

        let deleted = db.delete_records_before("ns", 100.0).unwrap();
        assert_eq!(deleted, vec!["ns:messages:g:old".to_string()]);

        let left = db
            .scoped_keys("ns", &build_scope("g", &[], StatisticScope::Guild))
            .unwrap();
        assert_eq!(left, vec!["ns:messages:g:new".to_string()]);
        assert_eq!(db.count_scoped("ns", &ScopeFilter::guild("g")).unwrap(), 1);
        assert_eq!(db.count_scoped("ns", &ScopeFilter::guild("other")).unwrap(), 0);
    }
}
