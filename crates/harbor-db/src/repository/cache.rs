//! # Local Cache Store
//!
//! Durable, capacity-bounded holding area for buffered mutations.
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cache Entry Lifecycle                                │
//! │                                                                         │
//! │  put(data, module)                                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT INTO cache_entries (..., synchronized = 0)          │   │
//! │  │  2. size = 2 + SUM(size_bytes) + (COUNT - 1)                   │   │
//! │  │  3. size > capacity?  ──► evict oldest 25% of synchronized     │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PENDING ──── get_pending() ──► SyncEngine delivers                    │
//! │       │                               │                                 │
//! │       │   record_failure(id, msg) ◄───┤ retries exhausted               │
//! │       │                               │                                 │
//! │       ▼                               ▼ delivered                       │
//! │  SYNCHRONIZED ◄──── mark_synchronized(ids)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Eviction candidate (oldest created_at first)                          │
//! │                                                                         │
//! │  KEY GUARANTEE: a pending entry is never evicted. Only clear()         │
//! │  removes pending entries.                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Size Accounting
//! Each row stores the byte length of its record in the persisted layout
//! (`{id, data, timestamp, synchronized, module}`). The store size is the
//! length of the whole serialized array, which `export_json()` reproduces
//! byte for byte.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use harbor_core::policy;
use harbor_core::validation::validate_module_tag;
use harbor_core::{
    CacheEntry, CacheStats, EvictionReport, MutationKind, NewMutation, PersistedRecord, Priority,
};

/// `"synchronized":false` serializes one byte longer than `"synchronized":true`.
const SYNC_FLAG_SHRINK_BYTES: i64 = 1;

/// Ids per UPDATE statement when marking entries synchronized.
const MARK_CHUNK_SIZE: usize = 500;

const ENTRY_COLUMNS: &str = "id, kind, module, data, priority, synchronized, attempts, \
                             last_error, created_at, synchronized_at";

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct CacheEntryRow {
    id: String,
    kind: MutationKind,
    module: String,
    data: String,
    priority: Option<Priority>,
    synchronized: bool,
    attempts: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    synchronized_at: Option<DateTime<Utc>>,
}

impl TryFrom<CacheEntryRow> for CacheEntry {
    type Error = DbError;

    fn try_from(row: CacheEntryRow) -> Result<Self, Self::Error> {
        let data = serde_json::from_str(&row.data).map_err(|e| DbError::CorruptRecord {
            id: row.id.clone(),
            reason: e.to_string(),
        })?;

        Ok(CacheEntry {
            id: row.id,
            kind: row.kind,
            module: row.module,
            data,
            priority: row.priority,
            synchronized: row.synchronized,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            synchronized_at: row.synchronized_at,
        })
    }
}

fn into_entries(rows: Vec<CacheEntryRow>) -> DbResult<Vec<CacheEntry>> {
    rows.into_iter().map(CacheEntry::try_from).collect()
}

/// Outcome of a `put`: the stored entry plus the eviction it triggered.
#[derive(Debug, Clone, PartialEq)]
pub struct PutOutcome {
    pub entry: CacheEntry,
    pub eviction: Option<EvictionReport>,
}

/// Behavior of an insert whose id is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConflict {
    /// Surface the unique violation.
    Fail,
    /// Leave the stored row alone.
    Skip,
}

impl OnConflict {
    fn clause(self) -> &'static str {
        match self {
            OnConflict::Fail => "",
            OnConflict::Skip => "ON CONFLICT(id) DO NOTHING",
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for buffered mutations.
#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    pool: SqlitePool,
    capacity_bytes: u64,
}

impl LocalCacheStore {
    /// Creates a store over `pool` bounded by `capacity_bytes`.
    pub fn new(pool: SqlitePool, capacity_bytes: u64) -> Self {
        LocalCacheStore {
            pool,
            capacity_bytes,
        }
    }

    /// Configured capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Appends a new unsynchronized `create` entry tagged with `module`.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let entry = cache.put(json!({"vessel": "IMO9321483"}), "mmi").await?;
    /// assert!(!entry.synchronized);
    /// ```
    pub async fn put(&self, data: serde_json::Value, module: &str) -> DbResult<CacheEntry> {
        let outcome = self.put_mutation(NewMutation::create(module, data)).await?;
        Ok(outcome.entry)
    }

    /// Appends a new unsynchronized entry built from `mutation`.
    ///
    /// Insert, size check and eviction share one transaction. Eviction runs
    /// at most once per call, even if the store is still over capacity
    /// afterwards (pending entries are never removed to make room).
    pub async fn put_mutation(&self, mutation: NewMutation) -> DbResult<PutOutcome> {
        validate_module_tag(&mutation.module)?;

        let entry = CacheEntry {
            id: Uuid::new_v4().to_string(),
            kind: mutation.kind,
            module: mutation.module,
            data: mutation.data,
            priority: mutation.priority,
            synchronized: false,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            synchronized_at: None,
        };

        let mut tx = self.pool.begin().await?;

        Self::insert_on(&mut *tx, &entry, OnConflict::Fail).await?;

        let size = Self::size_on(&mut *tx).await?;
        let eviction = if size > self.capacity_bytes {
            let report = Self::evict_on(&mut *tx).await?;
            info!(
                size_before = report.size_before,
                size_after = report.size_after,
                removed = report.removed,
                candidates = report.candidates,
                capacity = self.capacity_bytes,
                "Cache over capacity, evicted synchronized entries"
            );
            Some(report)
        } else {
            None
        };

        tx.commit().await?;

        debug!(
            id = %entry.id,
            module = %entry.module,
            kind = %entry.kind,
            "Buffered mutation"
        );

        Ok(PutOutcome { entry, eviction })
    }

    /// Flips `synchronized` for the given ids.
    ///
    /// Idempotent: already-synchronized and unknown ids are ignored.
    ///
    /// ## Returns
    /// Number of entries that changed state.
    pub async fn mark_synchronized(&self, ids: &[String]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for chunk in ids.chunks(MARK_CHUNK_SIZE) {
            let mut qb: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("UPDATE cache_entries SET synchronized = 1, size_bytes = size_bytes - ");
            qb.push_bind(SYNC_FLAG_SHRINK_BYTES);
            qb.push(", synchronized_at = ");
            qb.push_bind(now);
            qb.push(" WHERE synchronized = 0 AND id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            updated += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(requested = ids.len(), updated, "Marked entries synchronized");
        Ok(updated)
    }

    /// Records an exhausted delivery cycle for `id`.
    pub async fn record_failure(&self, id: &str, message: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE cache_entries SET
                attempts = attempts + 1,
                last_error = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CacheEntry", id));
        }
        Ok(())
    }

    /// Removes the oldest 25% (rounded up) of synchronized entries.
    ///
    /// Pending entries are never candidates.
    pub async fn evict(&self) -> DbResult<EvictionReport> {
        let mut tx = self.pool.begin().await?;
        let report = Self::evict_on(&mut *tx).await?;
        tx.commit().await?;

        info!(
            removed = report.removed,
            candidates = report.candidates,
            size_after = report.size_after,
            "Eviction pass complete"
        );
        Ok(report)
    }

    /// Deletes every entry, pending ones included.
    ///
    /// ## Returns
    /// Number of deleted entries.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;

        warn!(removed = result.rows_affected(), "Local cache cleared");
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches one entry by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<CacheEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM cache_entries WHERE id = ?1");
        let row: Option<CacheEntryRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CacheEntry::try_from).transpose()
    }

    /// All unsynchronized entries in insertion order.
    pub async fn get_pending(&self) -> DbResult<Vec<CacheEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM cache_entries WHERE synchronized = 0 ORDER BY seq ASC"
        );
        let rows: Vec<CacheEntryRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        into_entries(rows)
    }

    /// Counts unsynchronized entries.
    pub async fn count_pending(&self) -> DbResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE synchronized = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    /// Point-in-time statistics.
    pub async fn stats(&self) -> DbResult<CacheStats> {
        let (total, pending, records_bytes): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN synchronized = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(size_bytes), 0)
            FROM cache_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let size = policy::collection_size(total as u64, records_bytes as u64);
        Ok(CacheStats::new(
            total as u64,
            pending as u64,
            size,
            self.capacity_bytes,
        ))
    }

    // =========================================================================
    // Import / Export
    // =========================================================================

    /// Serializes the whole store as a persisted-layout JSON array.
    pub async fn export_json(&self) -> DbResult<String> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM cache_entries ORDER BY seq ASC");
        let rows: Vec<CacheEntryRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        let records: Vec<PersistedRecord> = into_entries(rows)?
            .iter()
            .map(CacheEntry::to_record)
            .collect();

        Ok(serde_json::to_string(&records)?)
    }

    /// Loads a persisted-layout JSON array into the store.
    ///
    /// Records whose id already exists are skipped. One eviction pass runs
    /// if the import leaves the store over capacity.
    ///
    /// ## Returns
    /// Number of records imported.
    pub async fn import_json(&self, json: &str) -> DbResult<u64> {
        let records: Vec<PersistedRecord> = serde_json::from_str(json)?;

        let mut tx = self.pool.begin().await?;
        let mut imported = 0;

        for record in records {
            let entry = CacheEntry::try_from(record)?;
            validate_module_tag(&entry.module)?;

            if Self::insert_on(&mut *tx, &entry, OnConflict::Skip).await? == 0 {
                debug!(id = %entry.id, "Skipping already-present record");
                continue;
            }
            imported += 1;
        }

        if Self::size_on(&mut *tx).await? > self.capacity_bytes {
            let report = Self::evict_on(&mut *tx).await?;
            info!(removed = report.removed, "Import exceeded capacity, evicted");
        }

        tx.commit().await?;

        info!(imported, "Imported persisted cache records");
        Ok(imported)
    }

    // =========================================================================
    // Connection-level helpers
    // =========================================================================

    /// Inserts `entry`, returning the number of rows written (0 when an
    /// existing id was skipped).
    async fn insert_on(
        conn: &mut SqliteConnection,
        entry: &CacheEntry,
        on_conflict: OnConflict,
    ) -> DbResult<u64> {
        let size_bytes = entry.persisted_size()? as i64;
        let data = serde_json::to_string(&entry.data)?;

        let sql = format!(
            r#"
            INSERT INTO cache_entries (
                id, kind, module, data, priority, synchronized,
                attempts, last_error, size_bytes, created_at, synchronized_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            {}
            "#,
            on_conflict.clause()
        );

        let result = sqlx::query(&sql)
        .bind(&entry.id)
        .bind(entry.kind)
        .bind(&entry.module)
        .bind(data)
        .bind(entry.priority)
        .bind(entry.synchronized)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(size_bytes)
        .bind(entry.created_at)
        .bind(entry.synchronized_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    async fn size_on(conn: &mut SqliteConnection) -> DbResult<u64> {
        let (count, records_bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries")
                .fetch_one(&mut *conn)
                .await?;

        Ok(policy::collection_size(count as u64, records_bytes as u64))
    }

    async fn evict_on(conn: &mut SqliteConnection) -> DbResult<EvictionReport> {
        let size_before = Self::size_on(conn).await?;

        let candidates: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE synchronized = 1")
                .fetch_one(&mut *conn)
                .await?;

        let quota = policy::eviction_count(candidates as u64);
        let removed = if quota == 0 {
            0
        } else {
            sqlx::query(
                r#"
                DELETE FROM cache_entries WHERE seq IN (
                    SELECT seq FROM cache_entries
                    WHERE synchronized = 1
                    ORDER BY created_at ASC, seq ASC
                    LIMIT ?1
                )
                "#,
            )
            .bind(quota as i64)
            .execute(&mut *conn)
            .await?
            .rows_affected()
        };

        let size_after = Self::size_on(conn).await?;

        Ok(EvictionReport {
            candidates: candidates as u64,
            removed,
            size_before,
            size_after,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
