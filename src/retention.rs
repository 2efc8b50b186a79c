use chrono::{DateTime, Utc};
use tokio::time::Duration;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::store::RecordStore;

/// How long enriched records are kept. `None` keeps them forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Option<chrono::Duration>,
}

impl RetentionPolicy {
    pub fn from_days(days: u64) -> Self {
        let max_age = match days {
            0 => None,
            // Capped well inside chrono's representable range.
            d => Some(chrono::Duration::days(d.min(1_000_000) as i64)),
        };
        Self { max_age }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_age.is_some()
    }

    /// Records strictly older than this (seconds since epoch) are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<f64> {
        let max_age = self.max_age?;
        let cutoff = now.checked_sub_signed(max_age)?;
        Some(cutoff.timestamp() as f64)
    }
}

pub struct RetentionSweeper {
    store: RecordStore,
    policy: RetentionPolicy,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: RecordStore, policy: RetentionPolicy, interval: Duration) -> Self {
        Self {
            store,
            policy,
            interval,
        }
    }

    pub async fn run(self) {
        if !self.policy.is_enabled() {
            info!("Retention sweeper: disabled, records are kept forever");
            return;
        }
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.sweep(Utc::now()).await {
                Ok(0) => debug!("Retention sweeper: nothing expired"),
                Ok(n) => info!("Retention sweeper: purged {} records", n),
                Err(e) => error!("Retention sweeper error: {}", e),
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        match self.policy.cutoff(now) {
            Some(cutoff) => self.store.purge_older_than(cutoff).await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::keys::KeySchema;
    use crate::store::StoreOptions;
    use crate::test_support::record;
    use chrono::TimeZone;

    #[test]
    fn test_policy_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(RetentionPolicy::from_days(0).cutoff(now), None);

        let week = RetentionPolicy::from_days(7);
        let expected = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap().timestamp() as f64;
        assert_eq!(week.cutoff(now), Some(expected));
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_records() {
        let db = Database::open_in_memory().unwrap();
        let store = RecordStore::new(db, KeySchema::new("test"), StoreOptions::default()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let day = 86_400.0;
        let now_secs = now.timestamp() as f64;

        store
            .save(record("g", "c", "u", "old", now_secs - 10.0 * day, 0.0, "old"))
            .await
            .unwrap();
        store
            .save(record("g", "c", "u", "new", now_secs - day, 0.0, "new"))
            .await
            .unwrap();

        let kept = RetentionSweeper::new(store.clone(), RetentionPolicy::default(), Duration::from_secs(60));
        assert_eq!(kept.sweep(now).await.unwrap(), 0);

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::from_days(7), Duration::from_secs(60));
        assert_eq!(sweeper.sweep(now).await.unwrap(), 1);
        assert!(!store.exists("g", "old").await.unwrap());
        assert!(store.exists("g", "new").await.unwrap());
    }
}
