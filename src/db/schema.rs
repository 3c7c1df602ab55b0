/// Schema for the local replica.
///
/// One table per entity kind keyed by id, with the secondary indices needed
/// for scoped queries. Index columns are plain TEXT copies of fields that also
/// live inside the serialized `data` blob.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outlets (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    name TEXT,
    region TEXT,
    is_active TEXT,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_outlets_region ON outlets(region);
CREATE INDEX IF NOT EXISTS idx_outlets_is_active ON outlets(is_active);
CREATE INDEX IF NOT EXISTS idx_outlets_name ON outlets(name);

CREATE TABLE IF NOT EXISTS sales (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    outlet_id TEXT,
    date TEXT,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_sales_outlet_id ON sales(outlet_id);
CREATE INDEX IF NOT EXISTS idx_sales_date ON sales(date);
CREATE INDEX IF NOT EXISTS idx_sales_outlet_date ON sales(outlet_id, date);

CREATE TABLE IF NOT EXISTS dashboard_stats (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Freshness bookkeeping, one row per cache key (timestamps in unix millis)
CREATE TABLE IF NOT EXISTS cache_metadata (
    key TEXT PRIMARY KEY,
    written_at INTEGER NOT NULL,
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_cache_metadata_written ON cache_metadata(written_at);

-- Pending writes; seq preserves insertion order
CREATE TABLE IF NOT EXISTS offline_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_offline_queue_enqueued ON offline_queue(enqueued_at);
CREATE INDEX IF NOT EXISTS idx_offline_queue_entity ON offline_queue(entity_type);
"#;
