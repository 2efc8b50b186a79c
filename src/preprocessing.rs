//! Deterministic text cleaning applied to every message before enrichment.
//!
//! Steps run in a fixed order: code blocks, links, ASCII transliteration,
//! contraction expansion, punctuation, over-long words, whitespace, truncation.
//! An empty result means "skip this message".

use std::collections::HashMap;

use regex::{Captures, Regex};

pub const DEFAULT_MAX_WORD_LENGTH: usize = 35;
pub const DEFAULT_MAX_LENGTH: usize = 256;

const CONTRACTIONS: &[(&str, &str)] = &[
    ("ain't", "are not"),
    ("aren't", "are not"),
    ("can't", "can not"),
    ("can't've", "can not have"),
    ("could've", "could have"),
    ("couldn't", "could not"),
    ("didn't", "did not"),
    ("doesn't", "does not"),
    ("don't", "do not"),
    ("hadn't", "had not"),
    ("hasn't", "has not"),
    ("haven't", "have not"),
    ("he'd", "he would"),
    ("he'll", "he will"),
    ("he's", "he is"),
    ("here's", "here is"),
    ("how'd", "how did"),
    ("how's", "how is"),
    ("i'd", "I would"),
    ("i'll", "I will"),
    ("i'm", "I am"),
    ("i've", "I have"),
    ("isn't", "is not"),
    ("it'd", "it would"),
    ("it'll", "it will"),
    ("it's", "it is"),
    ("let's", "let us"),
    ("ma'am", "madam"),
    ("might've", "might have"),
    ("mightn't", "might not"),
    ("must've", "must have"),
    ("mustn't", "must not"),
    ("needn't", "need not"),
    ("o'clock", "of the clock"),
    ("shan't", "shall not"),
    ("she'd", "she would"),
    ("she'll", "she will"),
    ("she's", "she is"),
    ("should've", "should have"),
    ("shouldn't", "should not"),
    ("that'd", "that would"),
    ("that's", "that is"),
    ("there'd", "there would"),
    ("there's", "there is"),
    ("they'd", "they would"),
    ("they'll", "they will"),
    ("they're", "they are"),
    ("they've", "they have"),
    ("wasn't", "was not"),
    ("we'd", "we would"),
    ("we'll", "we will"),
    ("we're", "we are"),
    ("we've", "we have"),
    ("weren't", "were not"),
    ("what'll", "what will"),
    ("what're", "what are"),
    ("what's", "what is"),
    ("what've", "what have"),
    ("when's", "when is"),
    ("where'd", "where did"),
    ("where's", "where is"),
    ("who'll", "who will"),
    ("who's", "who is"),
    ("who've", "who have"),
    ("why's", "why is"),
    ("won't", "will not"),
    ("would've", "would have"),
    ("wouldn't", "would not"),
    ("y'all", "you all"),
    ("you'd", "you would"),
    ("you'll", "you will"),
    ("you're", "you are"),
    ("you've", "you have"),
    ("gonna", "going to"),
    ("gotta", "got to"),
    ("wanna", "want to"),
];

/// Expands English contractions ("don't" -> "do not").
pub struct ContractionExpander {
    pattern: Regex,
    table: HashMap<&'static str, &'static str>,
}

impl Default for ContractionExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractionExpander {
    pub fn new() -> Self {
        // Longest alternatives first so "can't've" wins over "can't".
        let mut words: Vec<&str> = CONTRACTIONS.iter().map(|(from, _)| *from).collect();
        words.sort_by_key(|w| std::cmp::Reverse(w.len()));
        let alternation = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");

        Self {
            pattern: Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).unwrap(),
            table: CONTRACTIONS.iter().copied().collect(),
        }
    }

    pub fn expand(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures| {
                let matched = &caps[0];
                let Some(expansion) = self.table.get(matched.to_lowercase().as_str()) else {
                    return matched.to_string();
                };
                if matched.starts_with(|c: char| c.is_uppercase()) {
                    capitalize(expansion)
                } else {
                    expansion.to_string()
                }
            })
            .into_owned()
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct TextPreprocessor {
    re_code_block: Regex,
    re_link: Regex,
    contractions: ContractionExpander,
    max_word_length: usize,
    max_length: usize,
}

impl Default for TextPreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORD_LENGTH, DEFAULT_MAX_LENGTH)
    }
}

impl TextPreprocessor {
    pub fn new(max_word_length: usize, max_length: usize) -> Self {
        Self {
            re_code_block: Regex::new(r"(?s)```.*?```").unwrap(),
            re_link: Regex::new(r"(?i)https?://\S*|\bwww\.\S+").unwrap(),
            contractions: ContractionExpander::new(),
            max_word_length,
            max_length,
        }
    }

    pub fn process(&self, text: &str) -> String {
        let output = self.drop_code_blocks(text);
        let output = self.drop_links(&output);
        let output = deunicode::deunicode(&output);
        let output = self.contractions.expand(&output);
        let output = drop_punctuation(&output);
        let output = drop_very_long_words(&output, self.max_word_length);
        let output = drop_extra_whitespace(&output);
        truncate(&output, self.max_length)
    }

    fn drop_code_blocks(&self, text: &str) -> String {
        self.re_code_block.replace_all(text, " ").into_owned()
    }

    fn drop_links(&self, text: &str) -> String {
        self.re_link.replace_all(text, "").into_owned()
    }
}

pub fn drop_punctuation(text: &str) -> String {
    text.chars().filter(|c| !c.is_ascii_punctuation()).collect()
}

/// Remove every whitespace-separated word longer than `max_length` characters,
/// keeping the separators.
pub fn drop_very_long_words(text: &str, max_length: usize) -> String {
    let mut output = String::with_capacity(text.len());
    let mut word = String::new();
    for c in text.chars() {
        if c.is_whitespace() {
            push_word(&mut output, &word, max_length);
            word.clear();
            output.push(c);
        } else {
            word.push(c);
        }
    }
    push_word(&mut output, &word, max_length);
    output
}

fn push_word(output: &mut String, word: &str, max_length: usize) {
    if word.chars().count() <= max_length {
        output.push_str(word);
    }
}

pub fn drop_extra_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `max_length` characters, never leaving trailing whitespace.
pub fn truncate(text: &str, max_length: usize) -> String {
    let truncated: String = text.chars().take(max_length).collect();
    truncated.trim_end().to_string()
}
