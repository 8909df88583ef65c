//! Cross-process lock over a single `db_config` row.
//!
//! The lock serializes the batch-claim and cleanup passes between
//! deployments sharing one database. It is held only for the duration of a
//! storage batch, never across probes. A holder that disappears is forgiven
//! after [`LOCK_LEASE_SECS`]: the next contender seizes the row with a
//! warning.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::{Storage, StorageError};

/// Maximum time a holder may keep the lock before it can be seized.
pub const LOCK_LEASE_SECS: i64 = 10;

/// Derive the lock token for this node from its public IP.
pub fn lock_token(public_ip: &str) -> String {
    let digest = Sha256::digest(public_ip.as_bytes());
    format!("{:x}", digest)
}

impl Storage {
    /// Try to take the cross-process lock. Returns `true` when this node
    /// now holds it.
    ///
    /// Succeeds when the row is free or already held by the same token.
    /// When another holder has exceeded the lease, the lock is seized
    /// forcibly.
    pub async fn lock_database(&self, token: &str) -> Result<bool, StorageError> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE db_config SET value = ?, modified = ? \
             WHERE key = 'read_lock' AND (value IS NULL OR value = ?)",
        )
        .bind(token)
        .bind(now)
        .bind(token)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Somebody else holds it; take it over once their lease expired.
        let lease_cutoff = now - chrono::Duration::seconds(LOCK_LEASE_SECS);
        let result = sqlx::query(
            "UPDATE db_config SET value = ?, modified = ? \
             WHERE key = 'read_lock' AND modified < ?",
        )
        .bind(token)
        .bind(now)
        .bind(lease_cutoff)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 1 {
            warn!("Seized expired database lock from a stale holder.");
            return Ok(true);
        }

        Ok(false)
    }

    /// Release the lock, but only when this node's token still holds it.
    pub async fn unlock_database(&self, token: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE db_config SET value = NULL, modified = ? \
             WHERE key = 'read_lock' AND value = ?",
        )
        .bind(Utc::now())
        .bind(token)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_stable_and_hex() {
        let a = lock_token("203.0.113.7");
        let b = lock_token("203.0.113.7");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, lock_token("203.0.113.8"));
    }
}
