use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::SentimentScore;

/// Messages are scored on at most this many characters.
pub const MAX_MESSAGE_LENGTH: usize = 256;

/// Polarity scoring. Implementations block; callers offload them.
pub trait SentimentScorer: Send + Sync {
    fn score(&self, text: &str) -> Result<SentimentScore>;
}

/// Score `content` after truncating it to [`MAX_MESSAGE_LENGTH`] characters.
pub fn calculate_sentiment(scorer: &dyn SentimentScorer, content: &str) -> Result<SentimentScore> {
    let truncated: String = content.chars().take(MAX_MESSAGE_LENGTH).collect();
    if truncated.len() != content.len() {
        warn!("Truncated message to {} characters", MAX_MESSAGE_LENGTH);
    }
    scorer.score(&truncated)
}

/// Scorer backed by an HTTP service returning `{neg, neu, pos, compound}`.
pub struct HttpSentimentScorer {
    client: reqwest::blocking::Client,
    url: String,
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    text: &'a str,
}

impl HttpSentimentScorer {
    /// Must be called outside of an async context.
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl SentimentScorer for HttpSentimentScorer {
    fn score(&self, text: &str) -> Result<SentimentScore> {
        let response = self
            .client
            .post(&self.url)
            .json(&ScoreRequest { text })
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Enrichment(format!("sentiment request failed: {}", e)))?;

        let score: SentimentScore = response
            .json()
            .map_err(|e| Error::Enrichment(format!("invalid sentiment response: {}", e)))?;

        if !(-1.0..=1.0).contains(&score.compound) {
            return Err(Error::Enrichment(format!(
                "compound score {} out of range",
                score.compound
            )));
        }
        Ok(score)
    }
}
