pub const SCHEMA: &str = r#"
-- one row per storage key; values are serialized JSON documents
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

pub const GET_VALUE: &str = "SELECT value FROM kv WHERE key = ?1";

pub const PUT_VALUE: &str = r#"INSERT INTO kv (key, value) VALUES (?1, ?2)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = datetime('now')"#;

pub const DELETE_VALUE: &str = "DELETE FROM kv WHERE key = ?1";
