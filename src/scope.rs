//! Query scoping: which guild/channel/user slice of the index a query touches.
//!
//! Every query is a conjunction of an exact guild match and, optionally, a
//! membership test on the scope's discriminating field. Numeric range and
//! vector-rank terms are layered on top by the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Scope of statistics results to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticScope {
    Guild,
    Channel,
    User,
}

impl StatisticScope {
    /// Indexed tag column the scope discriminates on.
    pub fn field(&self) -> &'static str {
        match self {
            StatisticScope::Guild => "guild_id",
            StatisticScope::Channel => "channel_id",
            StatisticScope::User => "user_id",
        }
    }
}

impl FromStr for StatisticScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guild" | "guild_id" => Ok(StatisticScope::Guild),
            "channel" | "channel_id" => Ok(StatisticScope::Channel),
            "user" | "user_id" => Ok(StatisticScope::User),
            _ => Err(Error::UnknownScope(s.to_string())),
        }
    }
}

/// Width of a message-frequency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Minute,
    Hour,
    Day,
}

impl TimeBucket {
    pub fn seconds(&self) -> i64 {
        match self {
            TimeBucket::Minute => 60,
            TimeBucket::Hour => 60 * 60,
            TimeBucket::Day => 60 * 60 * 24,
        }
    }

    /// Start of the bucket containing `timestamp` (seconds since epoch).
    pub fn bucket_start(&self, timestamp: f64) -> i64 {
        let width = self.seconds();
        (timestamp / width as f64).floor() as i64 * width
    }
}

impl FromStr for TimeBucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(TimeBucket::Minute),
            "hour" => Ok(TimeBucket::Hour),
            "day" => Ok(TimeBucket::Day),
            _ => Err(Error::UnknownDuration(s.to_string())),
        }
    }
}

/// Composed filter predicate: `guild_id == guild` AND optionally `field IN ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    pub guild_id: String,
    pub scope: StatisticScope,
    pub ids: Vec<String>,
}

/// Build the filter for `scope` over `ids` inside `guild_id`.
///
/// A guild scope, or an empty id list, yields the bare guild predicate.
pub fn build_scope(guild_id: &str, ids: &[String], scope: StatisticScope) -> ScopeFilter {
    let ids = match scope {
        StatisticScope::Guild => Vec::new(),
        _ => ids.to_vec(),
    };
    let scope = if ids.is_empty() {
        StatisticScope::Guild
    } else {
        scope
    };
    ScopeFilter {
        guild_id: guild_id.to_string(),
        scope,
        ids,
    }
}

impl ScopeFilter {
    pub fn guild(guild_id: &str) -> Self {
        build_scope(guild_id, &[], StatisticScope::Guild)
    }

    /// True when the filter narrows below the guild.
    pub fn is_narrowed(&self) -> bool {
        self.scope != StatisticScope::Guild && !self.ids.is_empty()
    }

    /// Column a grouped aggregation should group on.
    pub fn group_field(&self) -> &'static str {
        if self.is_narrowed() {
            self.scope.field()
        } else {
            StatisticScope::Guild.field()
        }
    }

    /// Render as a SQL boolean expression with positional parameters.
    ///
    /// `first_param` is the 1-based index of the first placeholder so callers
    /// can prepend their own parameters.
    pub fn to_sql(&self, first_param: usize) -> (String, Vec<String>) {
        let mut sql = format!("guild_id = ?{}", first_param);
        let mut params = vec![self.guild_id.clone()];

        if self.is_narrowed() {
            let placeholders: Vec<String> = (0..self.ids.len())
                .map(|i| format!("?{}", first_param + 1 + i))
                .collect();
            sql.push_str(&format!(
                " AND {} IN ({})",
                self.scope.field(),
                placeholders.join(", ")
            ));
            params.extend(self.ids.iter().cloned());
        }

        (format!("({})", sql), params)
    }
}

impl fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_narrowed() {
            write!(
                f,
                "(guild_id == {} AND {} IN {{{}}})",
                self.guild_id,
                self.scope.field(),
                self.ids.join("|")
            )
        } else {
            write!(f, "guild_id == {}", self.guild_id)
        }
    }
}
