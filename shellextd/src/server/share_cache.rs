use std::time::Duration;

use shellext_core::ShareEntry;
use shellext_integrations::protocol::CustomState;
use time::OffsetDateTime;

use crate::folders::SyncFolder;
use crate::journal::{JournalError, ListingStats, ShareStateRecord};
use crate::paths::relative_from_remote;

pub const DEFAULT_SHARE_TTL: Duration = Duration::from_secs(120);

pub fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

/// A record without a fetch timestamp is never fresh.
pub fn is_fresh(record: &ShareStateRecord, now_ms: i64, ttl: Duration) -> bool {
    let Some(fetched_at) = record.share_fetched_at else {
        return false;
    };
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(fetched_at) < ttl_ms
}

pub fn custom_state_of(record: &ShareStateRecord) -> CustomState {
    CustomState {
        is_locked: record.locked,
        is_shared: record.shared,
    }
}

/// TTL view over the share flags kept in each folder's journal.
#[derive(Debug, Clone, Copy)]
pub struct ShareStateCache {
    ttl: Duration,
}

impl Default for ShareStateCache {
    fn default() -> Self {
        Self::new(DEFAULT_SHARE_TTL)
    }
}

impl ShareStateCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_fresh(&self, record: &ShareStateRecord, now_ms: i64) -> bool {
        is_fresh(record, now_ms, self.ttl)
    }

    /// Writes one remote listing of `collection` into the folder's journal.
    ///
    /// Shares outside the folder's remote prefix are ignored.
    pub async fn apply_share_listing(
        &self,
        folder: &SyncFolder,
        collection: &str,
        shares: &[ShareEntry],
        fetched_at: i64,
    ) -> Result<ListingStats, JournalError> {
        let Some(collection) = relative_from_remote(folder.remote_prefix(), collection) else {
            return Ok(ListingStats::default());
        };
        let shared_paths: Vec<String> = shares
            .iter()
            .filter_map(|share| relative_from_remote(folder.remote_prefix(), &share.path))
            .filter(|path| !path.is_empty())
            .collect();
        folder
            .journal()
            .apply_share_listing(&collection, &shared_paths, fetched_at)
            .await
    }
}
