//! Blocking client for shell-integration plugins.
//!
//! File managers call into plugins on their UI thread, so every call here is
//! bounded by a timeout and every failure is reported as "nothing to show".

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shellext_integrations::ids::{server_name_for_application, socket_path_for_server_name};
use shellext_integrations::protocol::{
    self, CLIENT_TIMEOUT, CustomStateRequest, MAX_REPLY_BYTES, MESSAGE_TERMINATOR, Payload,
    ProtocolError, ThumbnailRequest, ThumbnailSize,
};
use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;

pub use shellext_integrations::protocol::CustomState;

/// The server answers stale lookups from cache well inside this bound.
pub const DEFAULT_TIMEOUT: Duration = CLIENT_TIMEOUT;

/// Path fragments of the sync client's own bookkeeping files.
const INTERNAL_FILE_MARKERS: [&str; 2] = [".sync_", ".owncloudsync.log"];

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("reply exceeds the size limit")]
    ReplyTooLarge,
    #[error("server closed the connection without a reply")]
    NoReply,
}

/// Emblem names for the file-manager overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emblem {
    Shared,
    Locked,
}

impl Emblem {
    pub fn icon_name(self) -> &'static str {
        match self {
            Self::Shared => "emblem-shared",
            Self::Locked => "emblem-readonly",
        }
    }
}

pub fn emblems_for_state(state: CustomState) -> Vec<Emblem> {
    let mut emblems = Vec::new();
    if state.is_locked {
        emblems.push(Emblem::Locked);
    }
    if state.is_shared {
        emblems.push(Emblem::Shared);
    }
    emblems
}

/// True for files the sync client keeps for itself; they never get badges.
pub fn is_sync_internal(path: &str) -> bool {
    INTERNAL_FILE_MARKERS
        .iter()
        .any(|marker| path.contains(marker))
}

#[derive(Debug, Clone)]
pub struct CustomStateClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl CustomStateClient {
    /// `server_name` is the endpoint name, or a socket path when it contains `/`.
    pub fn new(server_name: &str) -> Self {
        Self {
            socket_path: socket_path_for_server_name(server_name),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn for_application(app_name: &str) -> Self {
        Self::new(&server_name_for_application(app_name))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Lock and share flags of `path`, or `None` when there is nothing to show.
    pub fn fetch_custom_state(&self, path: &str) -> Option<CustomState> {
        if path.is_empty() || is_sync_internal(path) {
            return None;
        }
        let request = Payload::CustomStateRequest(CustomStateRequest {
            path: path.to_string(),
        });
        match self.exchange(&request).ok()? {
            Payload::CustomState(state) => Some(state),
            _ => None,
        }
    }

    pub fn fetch_thumbnail(&self, path: &str, width: u32, height: u32) -> Option<Vec<u8>> {
        if path.is_empty() || is_sync_internal(path) || width == 0 || height == 0 {
            return None;
        }
        let request = Payload::ThumbnailRequest(ThumbnailRequest {
            path: path.to_string(),
            size: Some(ThumbnailSize {
                width: i64::from(width),
                height: i64::from(height),
            }),
        });
        match self.exchange(&request).ok()? {
            Payload::Thumbnail(bytes) if !bytes.is_empty() => Some(bytes),
            _ => None,
        }
    }

    /// Sends one request and reads the single reply.
    pub fn exchange(&self, request: &Payload) -> Result<Payload, ClientError> {
        let mut stream = self.connect()?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(&protocol::encode(request))?;
        stream.flush()?;

        let mut reader = BufReader::new(stream.take(MAX_REPLY_BYTES + 1));
        let mut reply = Vec::new();
        reader.read_until(MESSAGE_TERMINATOR, &mut reply)?;
        if reply.is_empty() {
            return Err(ClientError::NoReply);
        }
        if reply.last() != Some(&MESSAGE_TERMINATOR) && reply.len() as u64 > MAX_REPLY_BYTES {
            return Err(ClientError::ReplyTooLarge);
        }
        Ok(protocol::decode(&reply)?.payload)
    }

    /// Connects within the timeout. A server whose accept backlog is full
    /// fails the connect instead of blocking the caller.
    fn connect(&self) -> Result<UnixStream, ClientError> {
        let address = SockAddr::unix(&self.socket_path)?;
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        socket.connect_timeout(&address, self.timeout)?;
        Ok(UnixStream::from(std::os::fd::OwnedFd::from(socket)))
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
