use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool, migrate::Migrator};
use thiserror::Error;

use crate::paths::parent_of;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-path journal entry of one sync folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareStateRecord {
    pub path: String,
    pub file_id: Option<String>,
    pub locked: bool,
    pub shared: bool,
    pub share_fetched_at: Option<i64>,
}

impl ShareStateRecord {
    pub fn is_valid(&self) -> bool {
        !self.path.is_empty()
    }

    /// Server file ids look like `00000123ocabcdef`; the leading digits are
    /// the numeric id the preview endpoint expects.
    pub fn numeric_file_id(&self) -> Option<u64> {
        let file_id = self.file_id.as_deref()?;
        let digits_end = file_id
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(file_id.len());
        file_id[..digits_end]
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, JournalError> {
        let locked: i64 = row.try_get("is_locked")?;
        let shared: i64 = row.try_get("is_shared")?;
        Ok(Self {
            path: row.try_get("path")?,
            file_id: row.try_get("file_id")?,
            locked: locked != 0,
            shared: shared != 0,
            share_fetched_at: row.try_get("share_fetched_at")?,
        })
    }
}

/// Record store of one sync folder, keyed by folder-relative path.
///
/// Cloning shares the underlying pool.
#[derive(Clone)]
pub struct JournalStore {
    pool: SqlitePool,
}

impl JournalStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Single-connection in-memory journal.
    pub async fn in_memory() -> Result<Self, JournalError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), JournalError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_record(&self, record: &ShareStateRecord) -> Result<(), JournalError> {
        sqlx::query(
            "INSERT INTO records (path, file_id, is_locked, is_shared, share_fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                file_id = excluded.file_id,
                is_locked = excluded.is_locked,
                is_shared = excluded.is_shared,
                share_fetched_at = excluded.share_fetched_at",
        )
        .bind(&record.path)
        .bind(&record.file_id)
        .bind(if record.locked { 1 } else { 0 })
        .bind(if record.shared { 1 } else { 0 })
        .bind(record.share_fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_record(&self, path: &str) -> Result<Option<ShareStateRecord>, JournalError> {
        let row = sqlx::query(
            "SELECT path, file_id, is_locked, is_shared, share_fetched_at FROM records WHERE path = ?1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(ShareStateRecord::from_row).transpose()
    }

    /// Records at `prefix` or below it. An empty prefix lists everything.
    pub async fn list_records_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<ShareStateRecord>, JournalError> {
        select_by_prefix(&self.pool, prefix).await
    }

    /// Sets the shared flag and its fetch timestamp in one statement.
    /// Returns `false` when no record exists for `path`.
    pub async fn set_share_state(
        &self,
        path: &str,
        shared: bool,
        fetched_at: i64,
    ) -> Result<bool, JournalError> {
        update_share_state(&self.pool, path, shared, fetched_at).await
    }

    /// Applies one remote share listing for the direct children of
    /// `collection`: every child is reset to unshared, then every path in
    /// `shared_paths` is marked shared, all stamped with `fetched_at`.
    ///
    /// Runs in one transaction so readers never observe the reset without
    /// the marks.
    pub async fn apply_share_listing(
        &self,
        collection: &str,
        shared_paths: &[String],
        fetched_at: i64,
    ) -> Result<ListingStats, JournalError> {
        let collection = collection.trim_matches('/');
        let mut tx = self.pool.begin().await?;
        let mut stats = ListingStats::default();

        let children = select_by_prefix(&mut *tx, collection).await?;
        for record in children
            .iter()
            .filter(|record| record.path != collection && parent_of(&record.path) == collection)
        {
            update_share_state(&mut *tx, &record.path, false, fetched_at).await?;
            stats.reset += 1;
        }
        for path in shared_paths {
            if update_share_state(&mut *tx, path, true, fetched_at).await? {
                stats.marked += 1;
            } else {
                stats.unknown += 1;
            }
        }

        tx.commit().await?;
        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingStats {
    pub reset: usize,
    pub marked: usize,
    /// Shares the remote reported for paths this journal has no record of.
    pub unknown: usize,
}

async fn select_by_prefix<'e, E>(
    executor: E,
    prefix: &str,
) -> Result<Vec<ShareStateRecord>, JournalError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let prefix = prefix.trim_matches('/');
    let rows = if prefix.is_empty() {
        sqlx::query(
            "SELECT path, file_id, is_locked, is_shared, share_fetched_at
             FROM records
             ORDER BY path ASC",
        )
        .fetch_all(executor)
        .await?
    } else {
        // substr() rather than LIKE so `_` and `%` in paths stay literal.
        sqlx::query(
            "SELECT path, file_id, is_locked, is_shared, share_fetched_at
             FROM records
             WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2
             ORDER BY path ASC",
        )
        .bind(prefix)
        .bind(format!("{prefix}/"))
        .fetch_all(executor)
        .await?
    };

    rows.iter().map(ShareStateRecord::from_row).collect()
}

async fn update_share_state<'e, E>(
    executor: E,
    path: &str,
    shared: bool,
    fetched_at: i64,
) -> Result<bool, JournalError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result =
        sqlx::query("UPDATE records SET is_shared = ?1, share_fetched_at = ?2 WHERE path = ?3")
            .bind(if shared { 1 } else { 0 })
            .bind(fetched_at)
            .bind(path)
            .execute(executor)
            .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
