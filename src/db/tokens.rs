use rusqlite::params;

use crate::db::Database;
use crate::error::Result;

impl Database {
    /// Atomically add each delta to its counter under `key`, returning the new
    /// values in input order.
    pub fn increment_tokens(&self, key: &str, deltas: &[(String, i64)]) -> Result<Vec<(String, i64)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut updated = Vec::with_capacity(deltas.len());
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO token_counters (key, word, count) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key, word) DO UPDATE SET count = count + excluded.count
                     RETURNING count",
                )?;
                for (word, delta) in deltas {
                    let count: i64 = stmt.query_row(params![key, word, delta], |row| row.get(0))?;
                    updated.push((word.clone(), count));
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Current counters for `words` under `key`; absent words read as 0.
    pub fn token_counts(&self, key: &str, words: &[String]) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT count FROM token_counters WHERE key = ?1 AND word = ?2")?;
            let mut counts = Vec::with_capacity(words.len());
            for word in words {
                let mut rows = stmt.query(params![key, word])?;
                let count = match rows.next()? {
                    Some(row) => row.get(0)?,
                    None => 0,
                };
                counts.push((word.clone(), count));
            }
            Ok(counts)
        })
    }
}
