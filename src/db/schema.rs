/// Message index and token counters.
///
/// `messages` carries the tag columns (exact match), sortable numeric columns
/// and the packed embedding. `namespace` is the key prefix, so several
/// environments can share one file.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        key                 TEXT PRIMARY KEY,
        namespace           TEXT NOT NULL,
        message_id          TEXT NOT NULL,
        channel_id          TEXT NOT NULL,
        guild_id            TEXT NOT NULL,
        user_id             TEXT NOT NULL,
        timestamp           REAL NOT NULL,
        sentiment_neg       REAL NOT NULL,
        sentiment_neu       REAL NOT NULL,
        sentiment_pos       REAL NOT NULL,
        sentiment_compound  REAL NOT NULL,
        embedding           BLOB NOT NULL,
        tokens              TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_guild_time
        ON messages (namespace, guild_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_messages_channel_time
        ON messages (namespace, guild_id, channel_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_messages_user_time
        ON messages (namespace, guild_id, user_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_messages_compound
        ON messages (namespace, guild_id, sentiment_compound);

    CREATE TABLE IF NOT EXISTS token_counters (
        key     TEXT NOT NULL,
        word    TEXT NOT NULL,
        count   INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (key, word)
    );
";
