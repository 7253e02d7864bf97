//! Table definitions for the four logical tables (spec.md §4.6). Only the
//! backoff-capable negative table exists; the source's vestigial simple
//! negative-cache table is not reproduced.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identity (
    ed2k TEXT NOT NULL,
    size INTEGER NOT NULL,
    fid  INTEGER NOT NULL,
    UNIQUE(ed2k, size),
    UNIQUE(fid)
);

CREATE TABLE IF NOT EXISTS field (
    object_key TEXT NOT NULL,
    field_name TEXT NOT NULL,
    value      TEXT NOT NULL,
    expires_at INTEGER,
    PRIMARY KEY (object_key, field_name)
);

CREATE TABLE IF NOT EXISTS negative (
    ed2k TEXT NOT NULL,
    size INTEGER NOT NULL,
    failure_count INTEGER NOT NULL,
    first_failed_at INTEGER NOT NULL,
    synthesised_failure_until INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    UNIQUE(ed2k, size)
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);
"#;
