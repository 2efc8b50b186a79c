//! Tokenization and word frequencies.
//!
//! English only: tokens are Snowball (English) stems with the NLTK English
//! stopword list removed. Output is deterministic for a fixed `rust-stemmers`
//! version.

use std::collections::HashSet;

use rust_stemmers::{Algorithm, Stemmer};

use crate::models::TokenFrequency;
use crate::preprocessing::ContractionExpander;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "ain", "all", "am", "an", "and", "any",
    "are", "aren", "aren't", "as", "at", "be", "because", "been", "before", "being", "below",
    "between", "both", "but", "by", "can", "couldn", "couldn't", "d", "did", "didn", "didn't",
    "do", "does", "doesn", "doesn't", "doing", "don", "don't", "down", "during", "each", "few",
    "for", "from", "further", "had", "hadn", "hadn't", "has", "hasn", "hasn't", "have", "haven",
    "haven't", "having", "he", "her", "here", "hers", "herself", "him", "himself", "his", "how",
    "i", "if", "in", "into", "is", "isn", "isn't", "it", "it's", "its", "itself", "just", "ll",
    "m", "ma", "me", "mightn", "mightn't", "more", "most", "mustn", "mustn't", "my", "myself",
    "needn", "needn't", "no", "nor", "not", "now", "o", "of", "off", "on", "once", "only", "or",
    "other", "our", "ours", "ourselves", "out", "over", "own", "re", "s", "same", "shan",
    "shan't", "she", "she's", "should", "should've", "shouldn", "shouldn't", "so", "some",
    "such", "t", "than", "that", "that'll", "the", "their", "theirs", "them", "themselves",
    "then", "there", "these", "they", "this", "those", "through", "to", "too", "under", "until",
    "up", "ve", "very", "was", "wasn", "wasn't", "we", "were", "weren", "weren't", "what",
    "when", "where", "which", "while", "who", "whom", "why", "will", "with", "won", "won't",
    "wouldn", "wouldn't", "y", "you", "you'd", "you'll", "you're", "you've", "your", "yours",
    "yourself", "yourselves",
];

pub struct Tokenizer {
    stemmer: Stemmer,
    stopwords: HashSet<&'static str>,
    contractions: ContractionExpander,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
            stopwords: STOPWORDS.iter().copied().collect(),
            contractions: ContractionExpander::new(),
        }
    }

    /// Split `sentence` into stemmed, stopword-free tokens of length > 1.
    pub fn tokenize(&self, sentence: &str) -> Vec<String> {
        let expanded = self.contractions.expand(sentence);

        expanded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(|word| self.stemmer.stem(&word.to_lowercase()).into_owned())
            .filter(|stem| stem.chars().count() > 1 && !self.stopwords.contains(stem.as_str()))
            .collect()
    }
}

/// Count how many times each token appears.
pub fn word_frequency(tokens: &[String]) -> TokenFrequency {
    let mut frequency = TokenFrequency::new();
    for token in tokens {
        *frequency.entry(token.clone()).or_insert(0) += 1;
    }
    frequency
}
