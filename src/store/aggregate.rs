use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{MessageFrequency, TokenFrequency};
use crate::scope::TimeBucket;

/// Most buckets a frequency aggregation returns.
pub const MAX_FREQUENCY_BUCKETS: usize = 60;

/// Word -> summed count across several records.
pub type TokenCounts = BTreeMap<String, u64>;

/// Count distinct message ids per bucket, ascending by bucket start, keeping
/// the newest `max_buckets` buckets.
pub fn bucket_frequencies(
    rows: &[(String, f64)],
    bucket: TimeBucket,
    max_buckets: usize,
) -> Vec<MessageFrequency> {
    let mut buckets: HashMap<i64, HashSet<&str>> = HashMap::new();
    for (message_id, timestamp) in rows {
        buckets
            .entry(bucket.bucket_start(*timestamp))
            .or_default()
            .insert(message_id.as_str());
    }

    let mut frequencies: Vec<MessageFrequency> = buckets
        .into_iter()
        .map(|(bucket_start, ids)| MessageFrequency {
            bucket_start,
            num_messages: ids.len(),
        })
        .collect();
    frequencies.sort_by_key(|f| f.bucket_start);

    if frequencies.len() > max_buckets {
        frequencies.drain(..frequencies.len() - max_buckets);
    }
    frequencies
}

pub fn merge_token_maps<'a, I>(maps: I) -> TokenCounts
where
    I: IntoIterator<Item = &'a TokenFrequency>,
{
    let mut merged = TokenCounts::new();
    for map in maps {
        for (word, count) in map {
            *merged.entry(word.clone()).or_insert(0) += u64::from(*count);
        }
    }
    merged
}

/// The `n` most frequent tokens, ties broken alphabetically.
pub fn top_tokens(counts: &TokenCounts, n: usize) -> Vec<(String, u64)> {
    let mut sorted: Vec<(String, u64)> = counts.iter().map(|(w, c)| (w.clone(), *c)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.truncate(n);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, ts: f64) -> (String, f64) {
        (id.to_string(), ts)
    }

    #[test]
    fn test_hourly_buckets() {
        // 00:00:10, 00:00:20, 01:00:05
        let rows = vec![row("a", 10.0), row("b", 20.0), row("c", 3605.0)];
        let buckets = bucket_frequencies(&rows, TimeBucket::Hour, MAX_FREQUENCY_BUCKETS);
        assert_eq!(
            buckets,
            vec![
                MessageFrequency { bucket_start: 0, num_messages: 2 },
                MessageFrequency { bucket_start: 3600, num_messages: 1 },
            ]
        );
    }

    #[test]
    fn test_buckets_count_distinct_ids() {
        let rows = vec![row("a", 10.0), row("a", 11.0), row("b", 12.0)];
        let buckets = bucket_frequencies(&rows, TimeBucket::Minute, MAX_FREQUENCY_BUCKETS);
        assert_eq!(buckets, vec![MessageFrequency { bucket_start: 0, num_messages: 2 }]);
    }

    #[test]
    fn test_buckets_are_capped_to_newest() {
        let rows: Vec<(String, f64)> = (0..100)
            .map(|i| row(&format!("m{}", i), (i * 60) as f64))
            .collect();
        let buckets = bucket_frequencies(&rows, TimeBucket::Minute, MAX_FREQUENCY_BUCKETS);
        assert_eq!(buckets.len(), MAX_FREQUENCY_BUCKETS);
        assert_eq!(buckets.first().unwrap().bucket_start, 40 * 60);
        assert_eq!(buckets.last().unwrap().bucket_start, 99 * 60);
    }

    #[test]
    fn test_merge_and_top_tokens() {
        let a: TokenFrequency = [("cat".to_string(), 2), ("dog".to_string(), 1)].into();
        let b: TokenFrequency = [("cat".to_string(), 1), ("eel".to_string(), 3)].into();
        let merged = merge_token_maps([&a, &b]);
        assert_eq!(merged.get("cat"), Some(&3));
        assert_eq!(merged.get("dog"), Some(&1));
        assert_eq!(merged.get("eel"), Some(&3));

        assert_eq!(
            top_tokens(&merged, 2),
            vec![("cat".to_string(), 3), ("eel".to_string(), 3)]
        );
    }
}
