use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Dimensionality of every stored embedding.
pub const EMBEDDING_DIMS: usize = 384;

/// Word -> occurrences within one message.
pub type TokenFrequency = BTreeMap<String, u32>;

/// A chat message as handed over by the platform adapter.
///
/// Identifiers may arrive as numbers or strings; they are always kept as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(deserialize_with = "deserialize_id")]
    pub message_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub channel_id: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub guild_id: Option<String>,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// Polarity scores for one message. `compound` lies in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SentimentScore {
    pub neg: f64,
    pub neu: f64,
    pub pos: f64,
    pub compound: f64,
}

/// Fixed-length, L2-normalized text embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Validate and L2-normalize raw model output.
    pub fn new(mut values: Vec<f32>) -> Result<Self> {
        check_values(&values)?;
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(Error::InvalidEmbedding("vector has zero length".to_string()));
        }
        for v in values.iter_mut() {
            *v /= norm;
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Packed little-endian float32 bytes, the persisted layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decode packed bytes without renormalizing.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != EMBEDDING_DIMS * 4 {
            return Err(Error::InvalidEmbedding(format!(
                "expected {} bytes, got {}",
                EMBEDDING_DIMS * 4,
                bytes.len()
            )));
        }
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        check_values(&values)?;
        Ok(Self(values))
    }

    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        cosine_distance(&self.0, &other.0)
    }
}

fn check_values(values: &[f32]) -> Result<()> {
    if values.len() != EMBEDDING_DIMS {
        return Err(Error::InvalidEmbedding(format!(
            "expected {} dimensions, got {}",
            EMBEDDING_DIMS,
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidEmbedding(
            "vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// `1 - cos(a, b)`; orthogonal or degenerate inputs give 1.0.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        return 1.0;
    }
    1.0 - dot / denom
}

/// A message plus its derived sentiment, embedding and token frequencies.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedMessageRecord {
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: String,
    pub user_id: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub sentiment: SentimentScore,
    pub embedding: Embedding,
    pub tokens: TokenFrequency,
}

impl EnrichedMessageRecord {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos)
    }
}

/// Record returned by a vector search together with its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMessage {
    pub record: EnrichedMessageRecord,
    pub distance: f32,
}

/// Number of distinct messages sent within one time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageFrequency {
    /// Bucket start, seconds since the Unix epoch.
    pub bucket_start: i64,
    pub num_messages: usize,
}

impl MessageFrequency {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.bucket_start, 0)
    }
}

/// Mean sentiment of one group (guild, channel or user).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentAverage {
    pub group_key: String,
    pub avg_neg: f64,
    pub avg_neu: f64,
    pub avg_pos: f64,
    pub avg_compound: f64,
    pub num_messages: usize,
}
