//! # Read Cache
//!
//! Time-to-live cache for reads fetched while online, so the dashboard can
//! keep rendering the last known values offline. Kept in its own table and
//! not counted against the mutation store's capacity.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for TTL cached reads.
#[derive(Debug, Clone)]
pub struct ReadCache {
    pool: SqlitePool,
}

impl ReadCache {
    pub fn new(pool: SqlitePool) -> Self {
        ReadCache { pool }
    }

    /// Stores `value` under `key` for `ttl`, replacing any previous value.
    pub async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> DbResult<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DbError::InvalidInput(format!("ttl out of range: {e}")))?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| DbError::InvalidInput("ttl out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO read_cache (key, value, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        debug!(key = %key, expires_at = %expires_at, "Cached read");
        Ok(())
    }

    /// Returns the cached value, or `None` if absent or expired.
    ///
    /// An expired row is deleted on the way out.
    pub async fn get(&self, key: &str) -> DbResult<Option<serde_json::Value>> {
        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT value, expires_at FROM read_cache WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let Some((value, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at <= Utc::now() {
            debug!(key = %key, "Cached read expired");
            self.invalidate(key).await?;
            return Ok(None);
        }

        let value = serde_json::from_str(&value).map_err(|e| DbError::CorruptRecord {
            id: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(value))
    }

    /// Drops `key`. Returns whether a row existed.
    pub async fn invalidate(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM read_cache WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes every expired row.
    pub async fn purge_expired(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM read_cache WHERE expires_at <= ?1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(purged = result.rows_affected(), "Purged expired reads");
        }
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;

    async fn read_cache() -> ReadCache {
        Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .read_cache()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = read_cache().await;

        cache
            .set("vessels", &json!([{"imo": 9321483}]), Duration::from_secs(60))
            .await
            .unwrap();

        let value = cache.get("vessels").await.unwrap();
        assert_eq!(value, Some(json!([{"imo": 9321483}])));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_replaces_previous_value() {
        let cache = read_cache().await;

        cache.set("k", &json!(1), Duration::from_secs(60)).await.unwrap();
        cache.set("k", &json!(2), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_expired_read_is_absent_and_dropped() {
        let cache = read_cache().await;

        cache.set("stale", &json!("x"), Duration::ZERO).await.unwrap();

        assert_eq!(cache.get("stale").await.unwrap(), None);
        // Row was removed by the expired get
        assert!(!cache.invalidate("stale").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = read_cache().await;

        cache.set("k", &json!(true), Duration::from_secs(60)).await.unwrap();
        assert!(cache.invalidate("k").await.unwrap());
        assert!(!cache.invalidate("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_rows() {
        let cache = read_cache().await;

        cache.set("a", &json!(1), Duration::ZERO).await.unwrap();
        cache.set("b", &json!(2), Duration::ZERO).await.unwrap();
        cache.set("live", &json!(3), Duration::from_secs(3600)).await.unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 2);
        assert_eq!(cache.get("live").await.unwrap(), Some(json!(3)));
    }
}
