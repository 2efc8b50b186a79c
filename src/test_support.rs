//! Deterministic stand-ins for the model services, shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{Embedding, EnrichedMessageRecord, SentimentScore, EMBEDDING_DIMS};
use crate::sentiment::SentimentScorer;
use crate::words::{word_frequency, Tokenizer};

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Bag-of-words embedding: each lowercase word bumps two hashed dimensions.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    pub fail_on: Option<String>,
}

impl HashEmbedder {
    pub fn failing_on(word: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(word.to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(word) = &self.fail_on {
            if text.contains(word.as_str()) {
                return Err(Error::Enrichment("embedding service unavailable".to_string()));
            }
        }
        Ok(embed(text))
    }
}

pub fn embed(text: &str) -> Embedding {
    let mut values = vec![0.0f32; EMBEDDING_DIMS];
    for word in text.split_whitespace() {
        let hash = fnv1a(&word.to_lowercase()) as usize;
        values[hash % EMBEDDING_DIMS] += 1.0;
        values[(hash / EMBEDDING_DIMS) % EMBEDDING_DIMS] += 0.5;
    }
    if values.iter().all(|v| *v == 0.0) {
        values[0] = 1.0;
    }
    Embedding::new(values).unwrap()
}

/// Scores +/- 0.5 per positive/negative word, clamped to [-1, 1].
#[derive(Default)]
pub struct LexiconScorer {
    pub calls: AtomicUsize,
}

impl LexiconScorer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> Result<SentimentScore> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(score_text(text))
    }
}

fn score_text(text: &str) -> SentimentScore {
    let mut compound: f64 = 0.0;
    for word in text.split_whitespace() {
        match word.to_lowercase().as_str() {
            "good" | "great" | "love" | "happy" => compound += 0.5,
            "bad" | "awful" | "hate" | "sad" => compound -= 0.5,
            _ => {}
        }
    }
    score(compound.clamp(-1.0, 1.0))
}

pub fn score(compound: f64) -> SentimentScore {
    let pos = compound.max(0.0);
    let neg = (-compound).max(0.0);
    SentimentScore {
        neg,
        neu: 1.0 - pos - neg,
        pos,
        compound,
    }
}

/// A fully enriched record for `text`, with the given compound sentiment.
pub fn record(
    guild_id: &str,
    channel_id: &str,
    user_id: &str,
    message_id: &str,
    timestamp: f64,
    compound: f64,
    text: &str,
) -> EnrichedMessageRecord {
    let tokenizer = Tokenizer::new();
    EnrichedMessageRecord {
        message_id: message_id.to_string(),
        channel_id: channel_id.to_string(),
        guild_id: guild_id.to_string(),
        user_id: user_id.to_string(),
        timestamp,
        sentiment: score(compound),
        embedding: embed(text),
        tokens: word_frequency(&tokenizer.tokenize(text)),
    }
}
