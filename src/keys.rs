use crate::error::{Error, Result};

/// Separator between key segments; never allowed inside an id.
pub const KEY_SEPARATOR: char = ':';

/// Reject ids that are empty or would collide once joined into a key.
pub fn validate_id(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is empty", name)));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(Error::Validation(format!(
            "{} '{}' contains '{}'",
            name, value, KEY_SEPARATOR
        )));
    }
    Ok(())
}

/// Key names for everything the store persists.
///
/// All keys share one namespace prefix so test and production data can live
/// side by side in the same database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn prefixed(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    /// Key of one enriched message record.
    pub fn message_key(&self, guild_id: &str, message_id: &str) -> String {
        self.prefixed(&format!("messages:{}:{}", guild_id, message_id))
    }

    /// Key of the cumulative per-guild token counter.
    pub fn token_counter_key(&self, guild_id: &str) -> String {
        self.prefixed(&format!("messages:tokens:{}", guild_id))
    }
}
