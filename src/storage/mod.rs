/*!
SQLite-backed storage for proxies, probe outcomes and coordination state.

All claim/release primitives live here:

- the per-row claim is a conditional update gated on the status the caller
  read (`lock_for_testing`), so concurrent workers never hold the same
  proxy;
- the coarse cross-process lock is a single `db_config` row with a short
  lease (`lock_database`/`unlock_database` in [`lock`]).

Connections come from a shared pool; every operation acquires one for its
own scope. Foreign keys are on, so deleting a proxy cascades to its tests.
*/

pub mod lock;
pub mod schema;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::models::{Proxy, ProxyProtocol, ProxyRecord, ProxyStatus, ProxyTest};

/// Rows per statement in batched writes.
pub const DEFAULT_BATCH_SIZE: usize = 250;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub struct Storage {
    pool: SqlitePool,
    batch_size: usize,
}

impl Storage {
    /// Open (or create) the database at `path` and verify its schema.
    pub async fn connect(
        path: &Path,
        max_connections: u32,
        batch_size: usize,
    ) -> Result<Self, StorageError> {
        info!("Connecting to database at {}...", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        schema::verify_schema(&pool).await?;

        Ok(Storage { pool, batch_size })
    }

    /// In-memory database for tests. Single connection, since every SQLite
    /// `:memory:` connection is its own database.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StorageError::Sqlx)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        schema::verify_schema(&pool).await?;

        Ok(Storage {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_proxy(row: &sqlx::sqlite::SqliteRow) -> Result<Proxy, StorageError> {
        let protocol: i64 = row.try_get("protocol")?;
        let status: i64 = row.try_get("status")?;

        Ok(Proxy {
            id: row.try_get("id")?,
            ip: row.try_get("ip")?,
            port: row.try_get::<i64, _>("port")? as u16,
            protocol: ProxyProtocol::from_i64(protocol)
                .ok_or_else(|| StorageError::Corrupt(format!("protocol {protocol}")))?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            status: ProxyStatus::from_i64(status)
                .ok_or_else(|| StorageError::Corrupt(format!("status {status}")))?,
            latency: row.try_get::<i64, _>("latency")? as u32,
            test_count: row.try_get::<i64, _>("test_count")? as u32,
            fail_count: row.try_get::<i64, _>("fail_count")? as u32,
            country: row.try_get("country")?,
            created: row.try_get::<DateTime<Utc>, _>("created")?,
            modified: row.try_get::<DateTime<Utc>, _>("modified")?,
        })
    }

    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    /// Batched upsert of scraped candidates. Existing `(ip, port)` rows take
    /// the incoming credentials/protocol/modified; status, latency and the
    /// counters are left untouched.
    pub async fn insert_bulk(&self, records: &[ProxyRecord]) -> Result<u64, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut count = 0u64;

        for batch in records.chunks(self.batch_size) {
            let mut tx = self.pool.begin().await?;
            for record in batch {
                let result = sqlx::query(
                    "INSERT INTO proxy (ip, port, protocol, username, password, status, latency, \
                     test_count, fail_count, country, created, modified) \
                     VALUES (?, ?, ?, ?, ?, 0, 0, 0, 0, NULL, ?, ?) \
                     ON CONFLICT (ip, port) DO UPDATE SET \
                     username = excluded.username, password = excluded.password, \
                     protocol = excluded.protocol, modified = excluded.modified",
                )
                .bind(&record.ip)
                .bind(record.port as i64)
                .bind(record.protocol as i64)
                .bind(&record.username)
                .bind(&record.password)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                count += result.rows_affected();
            }
            tx.commit().await?;
        }

        debug!("Upserted {count} proxies to the database.");
        Ok(count)
    }

    /// Proxies due for (re-)testing: stale and not currently claimed.
    /// Recently-broken rows come first (status ascending), stalest first
    /// within a status.
    pub async fn need_scan(
        &self,
        limit: i64,
        age_secs: i64,
        protocols: &[ProxyProtocol],
    ) -> Result<Vec<Proxy>, StorageError> {
        let min_age = Utc::now() - chrono::Duration::seconds(age_secs);

        let mut sql = String::from(
            "SELECT * FROM proxy WHERE modified < ? AND status != ?",
        );
        if !protocols.is_empty() {
            sql.push_str(&format!(
                " AND protocol IN ({})",
                Self::placeholders(protocols.len())
            ));
        }
        sql.push_str(" ORDER BY status ASC, modified ASC LIMIT ?");

        let mut query = sqlx::query(&sql)
            .bind(min_age)
            .bind(ProxyStatus::Testing as i64);
        for protocol in protocols {
            query = query.bind(*protocol as i64);
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_proxy).collect()
    }

    /// One proxy matching the `need_scan` predicate (or never tested),
    /// picked in random order to spread lock contention across workers.
    pub async fn get_for_scan(
        &self,
        age_secs: i64,
        protocols: &[ProxyProtocol],
    ) -> Result<Option<Proxy>, StorageError> {
        let min_age = Utc::now() - chrono::Duration::seconds(age_secs);

        let mut sql = String::from(
            "SELECT * FROM proxy WHERE (status = ? OR (modified < ? AND status != ?))",
        );
        if !protocols.is_empty() {
            sql.push_str(&format!(
                " AND protocol IN ({})",
                Self::placeholders(protocols.len())
            ));
        }
        sql.push_str(" ORDER BY RANDOM() LIMIT 1");

        let mut query = sqlx::query(&sql)
            .bind(ProxyStatus::Unknown as i64)
            .bind(min_age)
            .bind(ProxyStatus::Testing as i64);
        for protocol in protocols {
            query = query.bind(*protocol as i64);
        }

        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_proxy).transpose()
    }

    /// Claim `proxy` for testing. The update only applies while the row
    /// still holds the status the caller read, so exactly one of any number
    /// of racing workers wins. Returns the number of affected rows (0 or 1).
    pub async fn lock_for_testing(&self, proxy: &Proxy) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE proxy SET status = ?, modified = ? WHERE id = ? AND status = ?",
        )
        .bind(ProxyStatus::Testing as i64)
        .bind(Utc::now())
        .bind(proxy.id)
        .bind(proxy.status as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Claim a prefetched batch in one statement.
    pub async fn bulk_lock(&self, ids: &[i64]) -> Result<u64, StorageError> {
        self.bulk_set_status(ids, ProxyStatus::Testing).await
    }

    /// Release claims that were never handed to a tester.
    pub async fn bulk_unlock(&self, ids: &[i64]) -> Result<u64, StorageError> {
        self.bulk_set_status(ids, ProxyStatus::Unknown).await
    }

    async fn bulk_set_status(
        &self,
        ids: &[i64],
        status: ProxyStatus,
    ) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut count = 0u64;
        for batch in ids.chunks(self.batch_size) {
            let sql = format!(
                "UPDATE proxy SET status = ?, modified = ? WHERE id IN ({})",
                Self::placeholders(batch.len())
            );
            let mut query = sqlx::query(&sql).bind(status as i64).bind(Utc::now());
            for id in batch {
                query = query.bind(id);
            }
            count += query.execute(&self.pool).await?.rows_affected();
        }
        Ok(count)
    }

    /// Crash-recovery sweep: anything stuck in TESTING past `max_minutes`
    /// is released to ERROR.
    pub async fn unlock_stuck(&self, max_minutes: i64) -> Result<u64, StorageError> {
        let min_age = Utc::now() - chrono::Duration::minutes(max_minutes);

        let result = sqlx::query(
            "UPDATE proxy SET status = ?, modified = ? WHERE status = ? AND modified < ?",
        )
        .bind(ProxyStatus::Error as i64)
        .bind(Utc::now())
        .bind(ProxyStatus::Testing as i64)
        .bind(min_age)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Recently verified working proxies, oldest first.
    pub async fn get_valid(
        &self,
        limit: i64,
        max_age_secs: i64,
        protocol: Option<ProxyProtocol>,
        exclude_countries: &[String],
    ) -> Result<Vec<Proxy>, StorageError> {
        let min_age = Utc::now() - chrono::Duration::seconds(max_age_secs);

        let mut sql = String::from("SELECT * FROM proxy WHERE modified > ? AND status = ?");
        if protocol.is_some() {
            sql.push_str(" AND protocol = ?");
        }
        if !exclude_countries.is_empty() {
            sql.push_str(&format!(
                " AND (country IS NULL OR country NOT IN ({}))",
                Self::placeholders(exclude_countries.len())
            ));
        }
        sql.push_str(" ORDER BY created ASC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(min_age).bind(ProxyStatus::Ok as i64);
        if let Some(protocol) = protocol {
            query = query.bind(protocol as i64);
        }
        for country in exclude_countries {
            query = query.bind(country);
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_proxy).collect()
    }

    /// Drop chronically failing proxies; their tests cascade away.
    pub async fn delete_failed(
        &self,
        age_days: i64,
        min_tests: i64,
        fail_rate: f64,
        limit: i64,
    ) -> Result<u64, StorageError> {
        let min_age = Utc::now() - chrono::Duration::days(age_days);

        let result = sqlx::query(
            "DELETE FROM proxy WHERE id IN ( \
             SELECT id FROM proxy WHERE created < ? AND test_count > ? \
             AND CAST(fail_count AS REAL) / test_count > ? LIMIT ?)",
        )
        .bind(min_age)
        .bind(min_tests)
        .bind(fail_rate)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Single-row delete; cascades to the proxy's tests.
    pub async fn delete_proxy(&self, id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM proxy WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Prune ancient test history.
    pub async fn delete_tests_older_than(&self, age_days: i64) -> Result<u64, StorageError> {
        let max_age = Utc::now() - chrono::Duration::days(age_days);
        let result = sqlx::query("DELETE FROM proxy_test WHERE created < ?")
            .bind(max_age)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Batched write-back of tester results:
    /// status/latency/counters/country/modified.
    pub async fn update_bulk(&self, proxies: &[Proxy]) -> Result<u64, StorageError> {
        if proxies.is_empty() {
            return Ok(0);
        }

        let mut count = 0u64;
        for batch in proxies.chunks(self.batch_size) {
            let mut tx = self.pool.begin().await?;
            for proxy in batch {
                let result = sqlx::query(
                    "UPDATE proxy SET status = ?, latency = ?, test_count = ?, \
                     fail_count = ?, country = ?, modified = ? WHERE id = ?",
                )
                .bind(proxy.status as i64)
                .bind(proxy.latency as i64)
                .bind(proxy.test_count as i64)
                .bind(proxy.fail_count as i64)
                .bind(&proxy.country)
                .bind(proxy.modified)
                .bind(proxy.id)
                .execute(&mut *tx)
                .await?;
                count += result.rows_affected();
            }
            tx.commit().await?;
        }
        Ok(count)
    }

    /// Batched append of probe outcomes.
    pub async fn insert_tests_bulk(&self, tests: &[ProxyTest]) -> Result<u64, StorageError> {
        if tests.is_empty() {
            return Ok(0);
        }

        let mut count = 0u64;
        for batch in tests.chunks(self.batch_size) {
            let mut tx = self.pool.begin().await?;
            for test in batch {
                let result = sqlx::query(
                    "INSERT INTO proxy_test (proxy_id, status, latency, info, created) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(test.proxy_id)
                .bind(test.status as i64)
                .bind(test.latency as i64)
                .bind(&test.info)
                .bind(test.created)
                .execute(&mut *tx)
                .await?;
                count += result.rows_affected();
            }
            tx.commit().await?;
        }
        Ok(count)
    }

    pub async fn get_proxy(&self, id: i64) -> Result<Option<Proxy>, StorageError> {
        let row = sqlx::query("SELECT * FROM proxy WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_proxy).transpose()
    }

    /// One random proxy, used by scrapers that route through the pool.
    pub async fn get_random(&self) -> Result<Option<Proxy>, StorageError> {
        let row = sqlx::query("SELECT * FROM proxy ORDER BY RANDOM() LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_proxy).transpose()
    }

    /// Proxy counts grouped by status, for the status page.
    pub async fn count_by_status(&self) -> Result<Vec<(ProxyStatus, i64)>, StorageError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM proxy GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: i64 = row.try_get("status")?;
            let status = ProxyStatus::from_i64(status)
                .ok_or_else(|| StorageError::Corrupt(format!("status {status}")))?;
            counts.push((status, row.try_get("count")?));
        }
        Ok(counts)
    }

    pub async fn count_proxies(&self) -> Result<i64, StorageError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM proxy")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_tests(&self) -> Result<i64, StorageError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM proxy_test")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Latest tests recorded for one proxy, newest first.
    pub async fn latest_tests(
        &self,
        proxy_id: i64,
        limit: i64,
    ) -> Result<Vec<ProxyTest>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM proxy_test WHERE proxy_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(proxy_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut tests = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: i64 = row.try_get("status")?;
            tests.push(ProxyTest {
                id: row.try_get("id")?,
                proxy_id: row.try_get("proxy_id")?,
                status: ProxyStatus::from_i64(status)
                    .ok_or_else(|| StorageError::Corrupt(format!("status {status}")))?,
                latency: row.try_get::<i64, _>("latency")? as u32,
                info: row.try_get("info")?,
                created: row.try_get::<DateTime<Utc>, _>("created")?,
            });
        }
        Ok(tests)
    }
}
