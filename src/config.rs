use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub key_prefix: String,

    // Preprocessing
    pub preprocessing_max_word_length: usize,
    pub preprocessing_max_length: usize,

    // Model services
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub embedding_timeout_secs: u64,
    pub embedding_concurrency: usize,
    pub sentiment_url: String,
    pub sentiment_timeout_secs: u64,

    // Queries
    pub ann_brute_force_threshold: usize,
    pub aggregation_timeout_secs: u64,

    // Retention (0 days keeps records forever)
    pub retention_days: u64,
    pub retention_sweep_interval_secs: u64,

    pub skip_existing_messages: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let key_prefix = env::var("KEY_PREFIX").unwrap_or_else(|_| "sentiscope".to_string());
        if key_prefix.is_empty() || key_prefix.contains(':') {
            anyhow::bail!("KEY_PREFIX must be non-empty and must not contain ':'");
        }

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/sentiscope.db".to_string()),
            key_prefix,
            preprocessing_max_word_length: env::var("PREPROCESSING_MAX_WORD_LENGTH")
                .unwrap_or_else(|_| "35".to_string())
                .parse()
                .unwrap_or(35),
            preprocessing_max_length: env::var("PREPROCESSING_MAX_LENGTH")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .unwrap_or(256),
            embedding_url: env::var("EMBEDDING_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "all-MiniLM-L6-v2".to_string()),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
            embedding_timeout_secs: env::var("EMBEDDING_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            embedding_concurrency: env::var("EMBEDDING_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map(|n: usize| n.max(1))
                .unwrap_or(4),
            sentiment_url: env::var("SENTIMENT_URL")
                .unwrap_or_else(|_| "http://localhost:8081/sentiment".to_string()),
            sentiment_timeout_secs: env::var("SENTIMENT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            ann_brute_force_threshold: env::var("ANN_BRUTE_FORCE_THRESHOLD")
                .unwrap_or_else(|_| "2048".to_string())
                .parse()
                .unwrap_or(2048),
            aggregation_timeout_secs: env::var("AGGREGATION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            retention_days: env::var("RETENTION_DAYS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            retention_sweep_interval_secs: env::var("RETENTION_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            skip_existing_messages: env::var("SKIP_EXISTING_MESSAGES")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        })
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn sentiment_timeout(&self) -> Duration {
        Duration::from_secs(self.sentiment_timeout_secs)
    }

    pub fn aggregation_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregation_timeout_secs)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("key_prefix", &self.key_prefix)
            .field(
                "preprocessing_max_word_length",
                &self.preprocessing_max_word_length,
            )
            .field("preprocessing_max_length", &self.preprocessing_max_length)
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field(
                "embedding_api_key",
                &self.embedding_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_timeout_secs", &self.embedding_timeout_secs)
            .field("embedding_concurrency", &self.embedding_concurrency)
            .field("sentiment_url", &self.sentiment_url)
            .field("sentiment_timeout_secs", &self.sentiment_timeout_secs)
            .field("ann_brute_force_threshold", &self.ann_brute_force_threshold)
            .field("aggregation_timeout_secs", &self.aggregation_timeout_secs)
            .field("retention_days", &self.retention_days)
            .field(
                "retention_sweep_interval_secs",
                &self.retention_sweep_interval_secs,
            )
            .field("skip_existing_messages", &self.skip_existing_messages)
            .finish()
    }
}
