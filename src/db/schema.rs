// src/db/schema.rs
// Table definitions and idempotent migrations for the memory store.
//
// Embedding columns are little-endian f32 BLOBs queried through sqlite-vec's
// vec_distance_cosine. Timestamps are RFC 3339 TEXT written from Rust, with
// CURRENT_TIMESTAMP as a DDL backstop.

use anyhow::Result;
use rusqlite::Connection;

/// Full schema, applied with CREATE TABLE IF NOT EXISTS so it is safe to run
/// on every pool open.
pub const SCHEMA: &str = r#"
-- Base record shared by all memory layers
CREATE TABLE IF NOT EXISTS user_memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    title TEXT,
    summary TEXT,
    details TEXT,
    summary_vector BLOB,
    details_vector BLOB,
    memory_layer TEXT NOT NULL,
    memory_type TEXT,
    memory_category TEXT,
    tags TEXT,
    metadata TEXT,
    status TEXT,
    captured_at TEXT,
    accessed_at TEXT,
    accessed_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_user_memories_user ON user_memories(user_id);
CREATE INDEX IF NOT EXISTS idx_user_memories_layer ON user_memories(user_id, memory_layer);

-- Identity extension (1:1 with a base row)
CREATE TABLE IF NOT EXISTS user_memory_identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    user_memory_id INTEGER NOT NULL REFERENCES user_memories(id) ON DELETE CASCADE,
    description TEXT,
    description_vector BLOB,
    role TEXT,
    relationship TEXT,
    type TEXT,
    episodic_date TEXT,
    tags TEXT,
    metadata TEXT,
    captured_at TEXT,
    accessed_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_identities_user ON user_memory_identities(user_id);
CREATE INDEX IF NOT EXISTS idx_identities_memory ON user_memory_identities(user_memory_id);

-- Experience extension (1:1 with a base row)
CREATE TABLE IF NOT EXISTS user_memory_experiences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    user_memory_id INTEGER NOT NULL REFERENCES user_memories(id) ON DELETE CASCADE,
    situation TEXT,
    situation_vector BLOB,
    action TEXT,
    action_vector BLOB,
    key_learning TEXT,
    key_learning_vector BLOB,
    reasoning TEXT,
    possible_outcome TEXT,
    score_confidence REAL,
    type TEXT,
    tags TEXT,
    metadata TEXT,
    captured_at TEXT,
    accessed_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_experiences_user ON user_memory_experiences(user_id);
CREATE INDEX IF NOT EXISTS idx_experiences_memory ON user_memory_experiences(user_memory_id);

-- Preference extension (1:1 with a base row)
CREATE TABLE IF NOT EXISTS user_memory_preferences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    user_memory_id INTEGER NOT NULL REFERENCES user_memories(id) ON DELETE CASCADE,
    conclusion_directives TEXT,
    conclusion_directives_vector BLOB,
    suggestions TEXT,
    score_priority REAL,
    type TEXT,
    tags TEXT,
    metadata TEXT,
    captured_at TEXT,
    accessed_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_preferences_user ON user_memory_preferences(user_id);
CREATE INDEX IF NOT EXISTS idx_preferences_memory ON user_memory_preferences(user_memory_id);

-- Context rows link to many base rows through a JSON id array, so no FK here.
-- Membership queries go through json_each(user_memory_ids).
CREATE TABLE IF NOT EXISTS user_memory_contexts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    user_memory_ids TEXT NOT NULL DEFAULT '[]',
    title TEXT,
    title_vector BLOB,
    description TEXT,
    description_vector BLOB,
    type TEXT,
    current_status TEXT,
    associated_subjects TEXT,
    associated_objects TEXT,
    score_impact REAL,
    score_urgency REAL,
    tags TEXT,
    metadata TEXT,
    captured_at TEXT,
    accessed_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_contexts_user ON user_memory_contexts(user_id);
"#;

/// Run migrations. Idempotent, called on every pool open.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    // Earlier schemas tracked access counts without the last-access stamp.
    if !column_exists(conn, "user_memories", "last_accessed_at")? {
        conn.execute(
            "ALTER TABLE user_memories ADD COLUMN last_accessed_at TEXT",
            [],
        )?;
        tracing::info!("Migrated user_memories: added last_accessed_at");
    }

    Ok(())
}

/// Check whether a table exists.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Check whether a column exists on a table.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
