use std::path::{Path, PathBuf};
use std::sync::Arc;

use shellext_core::CloudClient;

use crate::journal::JournalStore;
use crate::paths::{PathError, relative_path_for, remote_path_for};

/// A local directory kept in sync with a remote collection.
pub struct SyncFolder {
    alias: String,
    local_root: PathBuf,
    remote_prefix: String,
    journal: JournalStore,
    client: CloudClient,
}

impl SyncFolder {
    pub fn new(
        alias: impl Into<String>,
        local_root: impl Into<PathBuf>,
        remote_prefix: &str,
        journal: JournalStore,
        client: CloudClient,
    ) -> Self {
        Self {
            alias: alias.into(),
            local_root: local_root.into(),
            remote_prefix: remote_prefix.trim_matches('/').to_string(),
            journal,
            client,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn remote_prefix(&self) -> &str {
        &self.remote_prefix
    }

    pub fn journal(&self) -> &JournalStore {
        &self.journal
    }

    pub fn client(&self) -> &CloudClient {
        &self.client
    }

    pub fn relative_path(&self, path: &Path) -> Result<String, PathError> {
        relative_path_for(&self.local_root, path)
    }

    pub fn remote_path(&self, relative: &str) -> String {
        remote_path_for(&self.remote_prefix, relative)
    }
}

/// Finds the sync folder that owns a local path.
pub trait FolderResolver: Send + Sync {
    fn resolve(&self, path: &Path) -> Option<Arc<SyncFolder>>;
}

/// Folders in registration order.
#[derive(Default)]
pub struct FolderRegistry {
    folders: Vec<Arc<SyncFolder>>,
}

impl FolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, folder: SyncFolder) -> Arc<SyncFolder> {
        let folder = Arc::new(folder);
        self.folders.push(Arc::clone(&folder));
        folder
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

impl FolderResolver for FolderRegistry {
    /// Longest matching local root wins; equal roots go to the earlier registration.
    fn resolve(&self, path: &Path) -> Option<Arc<SyncFolder>> {
        let mut best: Option<&Arc<SyncFolder>> = None;
        for folder in &self.folders {
            if !path.starts_with(folder.local_root()) {
                continue;
            }
            let depth = folder.local_root().components().count();
            let better = best
                .map(|current| depth > current.local_root().components().count())
                .unwrap_or(true);
            if better {
                best = Some(folder);
            }
        }
        best.cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn folder(alias: &str, root: &str) -> SyncFolder {
        SyncFolder::new(
            alias,
            root,
            "/",
            JournalStore::in_memory().await.unwrap(),
            CloudClient::new("http://127.0.0.1:9", "token").unwrap(),
        )
    }

    #[tokio::test]
    async fn resolves_longest_matching_root() {
        let mut registry = FolderRegistry::new();
        registry.register(folder("outer", "/home/user/Cloud").await);
        registry.register(folder("inner", "/home/user/Cloud/Work").await);

        let resolved = registry
            .resolve(Path::new("/home/user/Cloud/Work/plan.odt"))
            .unwrap();
        assert_eq!(resolved.alias(), "inner");

        let resolved = registry
            .resolve(Path::new("/home/user/Cloud/notes.txt"))
            .unwrap();
        assert_eq!(resolved.alias(), "outer");
    }

    #[tokio::test]
    async fn equal_roots_resolve_to_first_registration() {
        let mut registry = FolderRegistry::new();
        registry.register(folder("first", "/sync").await);
        registry.register(folder("second", "/sync").await);

        let resolved = registry.resolve(Path::new("/sync/a.txt")).unwrap();
        assert_eq!(resolved.alias(), "first");
    }

    #[tokio::test]
    async fn matches_whole_path_components_only() {
        let mut registry = FolderRegistry::new();
        registry.register(folder("docs", "/sync/docs").await);

        assert!(registry.resolve(Path::new("/sync/docs2/a.txt")).is_none());
        assert!(registry.resolve(Path::new("/elsewhere/a.txt")).is_none());
        assert!(registry.resolve(Path::new("/sync/docs/a.txt")).is_some());
    }

    #[tokio::test]
    async fn folder_maps_paths_to_remote() {
        let folder = SyncFolder::new(
            "photos",
            "/home/user/Photos",
            "/Photos/",
            JournalStore::in_memory().await.unwrap(),
            CloudClient::new("http://127.0.0.1:9", "token").unwrap(),
        );
        let relative = folder
            .relative_path(Path::new("/home/user/Photos/2024/a.jpg"))
            .unwrap();
        assert_eq!(relative, "2024/a.jpg");
        assert_eq!(folder.remote_prefix(), "Photos");
        assert_eq!(folder.remote_path(&relative), "Photos/2024/a.jpg");
    }
}
