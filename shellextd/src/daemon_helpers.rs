fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_folders_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("shellext")
        .join("folders.json")
}

fn read_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

async fn open_folder(
    spec: &FolderSpec,
    home: &Path,
    config: &DaemonConfig,
) -> anyhow::Result<SyncFolder> {
    let token = spec
        .token
        .clone()
        .or_else(|| config.default_token.clone())
        .context("no token configured for folder (set `token` or SHELLEXT_TOKEN)")?;
    let local_root = expand_with_home(&spec.local_root, home);
    anyhow::ensure!(
        local_root.is_absolute(),
        "local root {} is not absolute",
        local_root.display()
    );
    let journal = JournalStore::open(&expand_with_home(&spec.journal, home))
        .await
        .context("failed to open journal")?;
    let client = CloudClient::with_timeout(&spec.server_url, token, config.remote_timeout)
        .context("invalid server url")?;
    Ok(SyncFolder::new(
        spec.alias.clone(),
        local_root,
        &spec.remote_prefix,
        journal,
        client,
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
