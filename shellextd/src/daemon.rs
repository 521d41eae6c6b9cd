use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use shellext_core::CloudClient;
use shellext_integrations::ids::{
    APP_NAME_DEFAULT, server_name_for_application, socket_path_for_server_name,
};
use shellext_integrations::protocol::{CLIENT_TIMEOUT, deferred_reply_timeout_for};

use crate::folders::{FolderRegistry, SyncFolder};
use crate::journal::JournalStore;
use crate::server::{FetchCoordinator, IpcListener, RequestRouter, ShareStateCache};

const DEFAULT_SHARE_TTL_SECS: u64 = 120;
const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 20;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub app_name: String,
    pub socket_path: PathBuf,
    pub share_ttl: Duration,
    pub socket_timeout: Duration,
    /// Kept below the client's reply timeout so the cached answer is read.
    pub deferred_reply_timeout: Duration,
    pub remote_timeout: Duration,
    pub folders_file: PathBuf,
    pub default_token: Option<String>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Ok(Self::from_lookup(|name| std::env::var(name).ok(), &home))
    }

    /// Builds the configuration from `lookup`, which maps variable names to values.
    pub fn from_lookup<F>(lookup: F, home: &Path) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_name = lookup("SHELLEXT_APP_NAME")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| APP_NAME_DEFAULT.to_string());
        let server_name = lookup("SHELLEXT_SERVER_NAME")
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(&value, home).to_string_lossy().into_owned())
            .unwrap_or_else(|| server_name_for_application(&app_name));
        let socket_path = socket_path_for_server_name(&server_name);
        let share_ttl = Duration::from_secs(read_u64(
            lookup("SHELLEXT_SHARE_TTL_SECS"),
            DEFAULT_SHARE_TTL_SECS,
        ));
        let socket_timeout = Duration::from_secs(read_u64(
            lookup("SHELLEXT_SOCKET_TIMEOUT_SECS"),
            DEFAULT_SOCKET_TIMEOUT_SECS,
        ));
        let deferred_reply_timeout = match read_u64(lookup("SHELLEXT_DEFERRED_REPLY_MS"), 0) {
            0 => deferred_reply_timeout_for(CLIENT_TIMEOUT),
            millis => Duration::from_millis(millis),
        }
        .min(socket_timeout);
        let remote_timeout = Duration::from_secs(read_u64(
            lookup("SHELLEXT_REMOTE_TIMEOUT_SECS"),
            DEFAULT_REMOTE_TIMEOUT_SECS,
        ));
        let folders_file = lookup("SHELLEXT_FOLDERS_FILE")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(default_folders_file);
        let default_token = lookup("SHELLEXT_TOKEN").filter(|value| !value.is_empty());

        Self {
            app_name,
            socket_path,
            share_ttl,
            socket_timeout,
            deferred_reply_timeout,
            remote_timeout,
            folders_file,
            default_token,
        }
    }
}

/// One entry of the folders file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FolderSpec {
    pub alias: String,
    pub local_root: String,
    #[serde(default)]
    pub remote_prefix: String,
    pub journal: String,
    pub server_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FoldersFile {
    #[serde(default)]
    pub folders: Vec<FolderSpec>,
}

impl FoldersFile {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        serde_json::from_str(content).context("invalid folders file")
    }

    /// A missing file means no folders are configured yet.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::parse(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "folders file not found, serving no folders");
                Ok(Self::default())
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to read folders file {}", path.display()))
            }
        }
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    listener: IpcListener,
    folder_count: usize,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        let folders = FoldersFile::load(&config.folders_file).await?;

        let mut registry = FolderRegistry::new();
        for spec in &folders.folders {
            let folder = open_folder(spec, &home, &config)
                .await
                .with_context(|| format!("failed to open sync folder {}", spec.alias))?;
            tracing::info!(
                alias = %folder.alias(),
                local_root = %folder.local_root().display(),
                remote_prefix = %folder.remote_prefix(),
                "registered sync folder"
            );
            registry.register(folder);
        }
        let folder_count = registry.len();

        let coordinator = Arc::new(FetchCoordinator::new(ShareStateCache::new(config.share_ttl)));
        let router = Arc::new(RequestRouter::new(
            Arc::new(registry),
            coordinator,
            config.deferred_reply_timeout,
        ));
        let listener = IpcListener::bind(&config.socket_path, router, config.socket_timeout)
            .await
            .with_context(|| {
                format!("failed to bind socket at {}", config.socket_path.display())
            })?;

        Ok(Self {
            config,
            listener,
            folder_count,
        })
    }

    pub fn socket_path(&self) -> &Path {
        self.listener.socket_path()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tracing::info!(
            app = %self.config.app_name,
            socket = %self.listener.socket_path().display(),
            folders = self.folder_count,
            share_ttl_secs = self.config.share_ttl.as_secs(),
            "shellextd started"
        );
        self.listener
            .run(shutdown)
            .await
            .context("shell extension listener failed")?;
        tracing::info!("shellextd stopped");
        Ok(())
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
