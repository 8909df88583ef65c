//! Schema bootstrap and versioned migration.

use sqlx::SqlitePool;
use tracing::info;

use super::StorageError;

/// Schema version the code expects. Bump together with a migration arm in
/// [`migrate_schema`].
pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_PROXY: &str = r#"
CREATE TABLE IF NOT EXISTS proxy (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ip          TEXT    NOT NULL,
    port        INTEGER NOT NULL,
    protocol    INTEGER NOT NULL,
    username    TEXT,
    password    TEXT,
    status      INTEGER NOT NULL DEFAULT 0,
    latency     INTEGER NOT NULL DEFAULT 0,
    test_count  INTEGER NOT NULL DEFAULT 0,
    fail_count  INTEGER NOT NULL DEFAULT 0,
    country     TEXT,
    created     TEXT    NOT NULL,
    modified    TEXT    NOT NULL,
    UNIQUE (ip, port)
);
"#;

pub const CREATE_PROXY_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_proxy_status ON proxy (status)",
    "CREATE INDEX IF NOT EXISTS idx_proxy_protocol ON proxy (protocol)",
    "CREATE INDEX IF NOT EXISTS idx_proxy_modified ON proxy (modified)",
    "CREATE INDEX IF NOT EXISTS idx_proxy_country ON proxy (country)",
];

pub const CREATE_PROXY_TEST: &str = r#"
CREATE TABLE IF NOT EXISTS proxy_test (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    proxy_id  INTEGER NOT NULL REFERENCES proxy (id) ON DELETE CASCADE,
    status    INTEGER NOT NULL DEFAULT 0,
    latency   INTEGER NOT NULL DEFAULT 0,
    info      TEXT,
    created   TEXT    NOT NULL
);
"#;

pub const CREATE_PROXY_TEST_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_proxy_test_proxy ON proxy_test (proxy_id)",
    "CREATE INDEX IF NOT EXISTS idx_proxy_test_status ON proxy_test (status)",
    "CREATE INDEX IF NOT EXISTS idx_proxy_test_created ON proxy_test (created)",
];

pub const CREATE_DB_CONFIG: &str = r#"
CREATE TABLE IF NOT EXISTS db_config (
    key       TEXT PRIMARY KEY,
    value     TEXT,
    modified  TEXT NOT NULL
);
"#;

/// Create missing tables and reconcile the stored schema version.
///
/// Refuses to run against a database written by newer code; migrates older
/// databases in place.
pub async fn verify_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for statement in [CREATE_PROXY, CREATE_PROXY_TEST, CREATE_DB_CONFIG]
        .iter()
        .copied()
        .chain(CREATE_PROXY_INDEXES.iter().copied())
        .chain(CREATE_PROXY_TEST_INDEXES.iter().copied())
    {
        sqlx::query(statement).execute(pool).await?;
    }

    let now = chrono::Utc::now();
    sqlx::query(
        "INSERT OR IGNORE INTO db_config (key, value, modified) VALUES ('schema_version', ?, ?)",
    )
    .bind(SCHEMA_VERSION.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    // Make sure the distributed lock row exists before anyone races for it
    sqlx::query("INSERT OR IGNORE INTO db_config (key, value, modified) VALUES ('read_lock', NULL, ?)")
        .bind(now)
        .execute(pool)
        .await?;

    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM db_config WHERE key = 'schema_version'")
            .fetch_optional(pool)
            .await?;

    let stored: i64 = stored
        .as_deref()
        .unwrap_or("0")
        .parse()
        .map_err(|_| StorageError::Schema("unreadable schema version".to_string()))?;

    if stored < SCHEMA_VERSION {
        migrate_schema(pool, stored).await?;
    } else if stored > SCHEMA_VERSION {
        return Err(StorageError::Schema(format!(
            "unsupported schema version: {stored} (code requires: {SCHEMA_VERSION})"
        )));
    }

    Ok(())
}

async fn migrate_schema(pool: &SqlitePool, old_version: i64) -> Result<(), StorageError> {
    info!("Migrating schema version {old_version} to {SCHEMA_VERSION}.");

    // Migration arms for future versions land here.

    sqlx::query("UPDATE db_config SET value = ?, modified = ? WHERE key = 'schema_version'")
        .bind(SCHEMA_VERSION.to_string())
        .bind(chrono::Utc::now())
        .execute(pool)
        .await?;

    info!("Schema migration complete.");
    Ok(())
}
