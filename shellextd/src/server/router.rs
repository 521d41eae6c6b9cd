use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shellext_integrations::protocol::{CustomStateRequest, Payload, ThumbnailRequest};

use crate::folders::{FolderResolver, SyncFolder};
use crate::journal::ShareStateRecord;
use crate::paths::collection_path_for;
use crate::server::error::QueryError;
use crate::server::fetch::{FetchCoordinator, FetchOutcome};
use crate::server::share_cache::{custom_state_of, now_ms};
use crate::server::thumbnail::fetch_thumbnail;

/// Dispatches decoded requests to the custom-state or thumbnail handler.
pub struct RequestRouter {
    folders: Arc<dyn FolderResolver>,
    coordinator: Arc<FetchCoordinator>,
    deferred_reply_timeout: Duration,
}

impl RequestRouter {
    pub fn new(
        folders: Arc<dyn FolderResolver>,
        coordinator: Arc<FetchCoordinator>,
        deferred_reply_timeout: Duration,
    ) -> Self {
        Self {
            folders,
            coordinator,
            deferred_reply_timeout,
        }
    }

    pub fn coordinator(&self) -> &Arc<FetchCoordinator> {
        &self.coordinator
    }

    pub async fn route(&self, payload: Payload) -> Result<Payload, QueryError> {
        match payload {
            Payload::CustomStateRequest(request) => self.custom_state(request).await,
            Payload::ThumbnailRequest(request) => self.thumbnail(request).await,
            Payload::CustomState(_) | Payload::Thumbnail(_) | Payload::Empty => {
                Err(QueryError::UnsupportedPayload)
            }
        }
    }

    async fn custom_state(&self, request: CustomStateRequest) -> Result<Payload, QueryError> {
        let (folder, record) = self.lookup(&request.path).await?;
        let cache = self.coordinator.cache();
        if cache.is_fresh(&record, now_ms()) {
            return Ok(Payload::CustomState(custom_state_of(&record)));
        }

        let collection = collection_path_for(&folder.remote_path(&record.path));
        let waiter = self
            .coordinator
            .request_fetch(Arc::clone(&folder), collection.clone());
        match tokio::time::timeout(self.deferred_reply_timeout, waiter).await {
            Ok(Ok(FetchOutcome::Refreshed)) => {}
            Ok(Ok(FetchOutcome::Failed)) => {
                tracing::debug!(%collection, "answering from cache after failed share fetch");
            }
            Ok(Err(_)) => return Err(QueryError::ShuttingDown),
            Err(_) => {
                tracing::debug!(%collection, "share fetch still running, answering from cache");
            }
        }

        let record = load_record(&folder, &record.path).await?;
        Ok(Payload::CustomState(custom_state_of(&record)))
    }

    async fn thumbnail(&self, request: ThumbnailRequest) -> Result<Payload, QueryError> {
        let size = request
            .size
            .filter(|size| !size.is_empty())
            .ok_or_else(|| QueryError::InvalidRequest("missing thumbnail size".into()))?;
        let (folder, record) = self.lookup(&request.path).await?;
        let bytes = fetch_thumbnail(&folder, &record, size).await?;
        Ok(Payload::Thumbnail(bytes))
    }

    async fn lookup(&self, path: &str) -> Result<(Arc<SyncFolder>, ShareStateRecord), QueryError> {
        if path.is_empty() {
            return Err(QueryError::InvalidRequest("missing path".into()));
        }
        let local = Path::new(path);
        let folder = self
            .folders
            .resolve(local)
            .ok_or_else(|| QueryError::FolderNotFound(path.to_string()))?;
        let relative = folder.relative_path(local)?;
        let record = load_record(&folder, &relative).await?;
        Ok((folder, record))
    }
}

async fn load_record(folder: &SyncFolder, relative: &str) -> Result<ShareStateRecord, QueryError> {
    let record = folder
        .journal()
        .get_record(relative)
        .await?
        .ok_or_else(|| QueryError::RecordNotFound(relative.to_string()))?;
    if !record.is_valid() {
        return Err(QueryError::InvalidRecord(relative.to_string()));
    }
    Ok(record)
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
