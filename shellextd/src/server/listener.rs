use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shellext_integrations::protocol::{self, MAX_REQUEST_BYTES, MESSAGE_TERMINATOR};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::task::TaskTracker;

use crate::server::router::RequestRouter;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("another server is already listening on {0}")]
    AlreadyRunning(PathBuf),
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("connection timed out")]
    Timeout,
    #[error("connection closed before a request arrived")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Unix socket endpoint answering one request per connection.
pub struct IpcListener {
    listener: UnixListener,
    socket_path: PathBuf,
    router: Arc<RequestRouter>,
    socket_timeout: Duration,
    tracker: TaskTracker,
}

impl IpcListener {
    /// Binds `socket_path`, replacing a stale socket file left by a dead
    /// server. Fails with [`ListenerError::AlreadyRunning`] when a live
    /// server still accepts connections there.
    pub async fn bind(
        socket_path: impl Into<PathBuf>,
        router: Arc<RequestRouter>,
        socket_timeout: Duration,
    ) -> Result<Self, ListenerError> {
        let socket_path = socket_path.into();
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&socket_path).await? {
            if UnixStream::connect(&socket_path).await.is_ok() {
                return Err(ListenerError::AlreadyRunning(socket_path));
            }
            tracing::debug!(path = %socket_path.display(), "removing stale socket");
            tokio::fs::remove_file(&socket_path).await?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        tracing::info!(path = %socket_path.display(), "listening for shell extension requests");
        Ok(Self {
            listener,
            socket_path,
            router,
            socket_timeout,
            tracker: TaskTracker::new(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accepts connections until `shutdown` resolves, then releases pending
    /// waiters, drains connections and removes the socket file.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ListenerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let router = Arc::clone(&self.router);
                        let socket_timeout = self.socket_timeout;
                        self.tracker.spawn(async move {
                            if let Err(err) = serve_connection(stream, router, socket_timeout).await {
                                tracing::debug!("shell extension connection dropped: {err}");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!("accept failed: {err}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        tracing::info!("shutting down shell extension listener");
        self.router.coordinator().disconnect_all();
        self.tracker.close();
        if tokio::time::timeout(self.socket_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                pending = self.tracker.len(),
                "connections still open after shutdown grace period"
            );
        }
        drop(self.listener);
        match tokio::fs::remove_file(&self.socket_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    router: Arc<RequestRouter>,
    socket_timeout: Duration,
) -> Result<(), ConnectionError> {
    let (read_half, mut write_half) = stream.into_split();
    let request = tokio::time::timeout(socket_timeout, read_request(read_half))
        .await
        .map_err(|_| ConnectionError::Timeout)??;

    let reply = match protocol::decode(&request) {
        Ok(message) => match router.route(message.payload).await {
            Ok(payload) => protocol::encode(&payload),
            Err(err) => {
                tracing::debug!("answering with empty reply: {err}");
                protocol::empty_reply()
            }
        },
        Err(err) => {
            tracing::debug!("rejecting request: {err}");
            protocol::empty_reply()
        }
    };

    tokio::time::timeout(socket_timeout, async {
        write_half.write_all(&reply).await?;
        write_half.shutdown().await
    })
    .await
    .map_err(|_| ConnectionError::Timeout)??;
    Ok(())
}

/// Reads one terminated message. A peer that half-closes after sending an
/// unterminated message still gets it decoded.
async fn read_request<R>(reader: R) -> Result<Vec<u8>, ConnectionError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES + 1));
    let mut buf = Vec::new();
    reader.read_until(MESSAGE_TERMINATOR, &mut buf).await?;
    if buf.is_empty() {
        return Err(ConnectionError::Closed);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folders::FolderRegistry;
    use crate::server::fetch::FetchCoordinator;
    use crate::server::share_cache::ShareStateCache;
    use shellext_integrations::protocol::{CustomStateRequest, Payload};

    fn router() -> Arc<RequestRouter> {
        Arc::new(RequestRouter::new(
            Arc::new(FolderRegistry::new()),
            Arc::new(FetchCoordinator::new(ShareStateCache::default())),
            Duration::from_secs(1),
        ))
    }

    async fn exchange(path: &Path, request: &[u8]) -> Vec<u8> {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn malformed_and_foreign_requests_get_empty_reply() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("test.sock");
        let listener = IpcListener::bind(&socket, router(), Duration::from_secs(2))
            .await
            .unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(listener.run(async {
            let _ = stop_rx.await;
        }));

        assert_eq!(exchange(&socket, b"not json\n").await, protocol::empty_reply());
        assert_eq!(
            exchange(&socket, b"{\"version\":\"9.9\"}\n").await,
            protocol::empty_reply()
        );
        let request = protocol::encode(&Payload::CustomStateRequest(CustomStateRequest {
            path: "/nowhere/a.txt".into(),
        }));
        assert_eq!(exchange(&socket, &request).await, protocol::empty_reply());

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn silent_client_is_closed_without_reply() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("test.sock");
        let listener = IpcListener::bind(&socket, router(), Duration::from_millis(200))
            .await
            .unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(listener.run(async {
            let _ = stop_rx.await;
        }));

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        let mut reply = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn second_server_on_live_socket_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("test.sock");
        let _first = IpcListener::bind(&socket, router(), Duration::from_secs(1))
            .await
            .unwrap();

        let err = IpcListener::bind(&socket, router(), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ListenerError::AlreadyRunning(path) if path == socket));
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("test.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        let listener = IpcListener::bind(&socket, router(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(listener.socket_path(), socket.as_path());
    }

    #[tokio::test]
    async fn shutdown_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nested").join("test.sock");
        let listener = IpcListener::bind(&socket, router(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(socket.exists());

        listener.run(async {}).await.unwrap();
        assert!(!socket.exists());
    }
}
