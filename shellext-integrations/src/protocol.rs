//! Wire envelope spoken between the shell-extension server and its clients.
//!
//! Every message is one JSON object terminated by `\n`:
//! `{"version": "1.0", "<payloadKey>": <payload>}`. A message with no payload
//! key is the empty reply, which clients read as "no data".

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const PROTOCOL_VERSION: &str = "1.0";

pub const VERSION_KEY: &str = "version";
pub const CUSTOM_STATE_REQUEST_KEY: &str = "customStateRequest";
pub const CUSTOM_STATE_DATA_KEY: &str = "customStateData";
pub const THUMBNAIL_REQUEST_KEY: &str = "thumbnailRequest";
pub const THUMBNAIL_DATA_KEY: &str = "thumbnailData";

pub const MESSAGE_TERMINATOR: u8 = b'\n';
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;
pub const MAX_REPLY_BYTES: u64 = 32 * 1024 * 1024;

/// How long a client waits on connect, write and reply.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest time the server may hold a reply back for a remote fetch before
/// answering from cache. Half the client's wait, so the cached answer is
/// written while the client still reads.
pub fn deferred_reply_timeout_for(client_timeout: Duration) -> Duration {
    client_timeout / 2
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomStateRequest {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSize {
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

impl ThumbnailSize {
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ThumbnailSize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomState {
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub is_shared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    CustomStateRequest(CustomStateRequest),
    ThumbnailRequest(ThumbnailRequest),
    CustomState(CustomState),
    Thumbnail(Vec<u8>),
    Empty,
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: String,
    pub payload: Payload,
}

/// The JSON object on the wire. At most one payload field is set.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom_state_request: Option<CustomStateRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thumbnail_request: Option<ThumbnailRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom_state_data: Option<CustomState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thumbnail_data: Option<String>,
}

impl Envelope {
    fn for_payload(payload: &Payload) -> Self {
        let mut envelope = Self {
            version: Some(Value::String(PROTOCOL_VERSION.to_string())),
            ..Self::default()
        };
        match payload {
            Payload::CustomStateRequest(request) => {
                envelope.custom_state_request = Some(request.clone());
            }
            Payload::ThumbnailRequest(request) => {
                envelope.thumbnail_request = Some(request.clone());
            }
            Payload::CustomState(state) => envelope.custom_state_data = Some(*state),
            Payload::Thumbnail(bytes) => envelope.thumbnail_data = Some(BASE64.encode(bytes)),
            Payload::Empty => {}
        }
        envelope
    }
}

/// Encodes `payload` stamped with this build's version, including the
/// trailing terminator.
pub fn encode(payload: &Payload) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(&Envelope::for_payload(payload))
        .unwrap_or_else(|_| bare_envelope().into_bytes());
    bytes.push(MESSAGE_TERMINATOR);
    bytes
}

pub fn empty_reply() -> Vec<u8> {
    encode(&Payload::Empty)
}

// The envelope has only string keys and plain values, so serialization does
// not fail; if it ever did, the peer gets the empty reply.
fn bare_envelope() -> String {
    format!("{{\"{VERSION_KEY}\":\"{PROTOCOL_VERSION}\"}}")
}

pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|err| ProtocolError::MalformedMessage(err.to_string()))?;

    match &envelope.version {
        Some(Value::String(version)) if version == PROTOCOL_VERSION => {}
        Some(other) => return Err(ProtocolError::UnsupportedVersion(other.to_string())),
        None => return Err(ProtocolError::UnsupportedVersion("missing".to_string())),
    }

    let mut payloads = Vec::with_capacity(1);
    if let Some(request) = envelope.custom_state_request {
        payloads.push(Payload::CustomStateRequest(request));
    }
    if let Some(request) = envelope.thumbnail_request {
        payloads.push(Payload::ThumbnailRequest(request));
    }
    if let Some(state) = envelope.custom_state_data {
        payloads.push(Payload::CustomState(state));
    }
    if let Some(data) = envelope.thumbnail_data {
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|err| ProtocolError::MalformedMessage(format!("thumbnail data: {err}")))?;
        payloads.push(Payload::Thumbnail(bytes));
    }

    if payloads.len() > 1 {
        return Err(ProtocolError::MalformedMessage(
            "more than one payload key".to_string(),
        ));
    }

    Ok(Message {
        version: PROTOCOL_VERSION.to_string(),
        payload: payloads.pop().unwrap_or(Payload::Empty),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(payload: Payload) {
        let decoded = decode(&encode(&payload)).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn every_payload_variant_survives_roundtrip() {
        roundtrip(Payload::CustomStateRequest(CustomStateRequest {
            path: "/sync/docs/report.pdf".into(),
        }));
        roundtrip(Payload::ThumbnailRequest(ThumbnailRequest {
            path: "/sync/pics/cat.png".into(),
            size: Some(ThumbnailSize {
                width: 256,
                height: 128,
            }),
        }));
        roundtrip(Payload::ThumbnailRequest(ThumbnailRequest {
            path: "/sync/pics/cat.png".into(),
            size: None,
        }));
        roundtrip(Payload::CustomState(CustomState {
            is_locked: true,
            is_shared: false,
        }));
        roundtrip(Payload::Thumbnail(vec![0x89, b'P', b'N', b'G', 0, 255]));
        roundtrip(Payload::Empty);
    }

    #[test]
    fn encodes_documented_wire_shape() {
        let bytes = encode(&Payload::CustomState(CustomState {
            is_locked: false,
            is_shared: true,
        }));
        assert_eq!(bytes.last(), Some(&MESSAGE_TERMINATOR));
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({
                "version": "1.0",
                "customStateData": { "isLocked": false, "isShared": true }
            })
        );

        let value: Value = serde_json::from_slice(&empty_reply()).unwrap();
        assert_eq!(value, json!({ "version": "1.0" }));
    }

    #[test]
    fn thumbnail_request_without_size_omits_the_field() {
        let bytes = encode(&Payload::ThumbnailRequest(ThumbnailRequest {
            path: "/sync/a.png".into(),
            size: None,
        }));
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({ "version": "1.0", "thumbnailRequest": { "path": "/sync/a.png" } })
        );
        assert_eq!(bare_envelope().as_bytes(), &empty_reply()[..empty_reply().len() - 1]);
    }

    #[test]
    fn thumbnail_data_is_base64() {
        let bytes = encode(&Payload::Thumbnail(b"img".to_vec()));
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value[THUMBNAIL_DATA_KEY], "aW1n");
    }

    #[test]
    fn deferred_reply_fits_inside_client_wait() {
        let deferred = deferred_reply_timeout_for(CLIENT_TIMEOUT);
        assert_eq!(deferred, Duration::from_secs(5));
        assert!(deferred < CLIENT_TIMEOUT);
    }

    #[test]
    fn rejects_invalid_framing() {
        assert!(matches!(
            decode(b"{\"version\": \"1.0\""),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode(b"\"just a string\""),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode(b"{\"version\":\"1.0\",\"thumbnailData\":\"***\"}"),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn rejects_foreign_or_missing_version() {
        assert!(matches!(
            decode(b"{\"version\":\"2.0\",\"customStateRequest\":{\"path\":\"/a\"}}"),
            Err(ProtocolError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            decode(b"{\"version\":1,\"customStateRequest\":{\"path\":\"/a\"}}"),
            Err(ProtocolError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            decode(b"{\"customStateRequest\":{\"path\":\"/a\"}}"),
            Err(ProtocolError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn rejects_more_than_one_payload() {
        let raw = br#"{"version":"1.0","customStateRequest":{"path":"/a"},"thumbnailRequest":{"path":"/a"}}"#;
        assert!(matches!(
            decode(raw),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn missing_request_fields_decode_as_defaults() {
        let message = decode(br#"{"version":"1.0","thumbnailRequest":{}}"#).unwrap();
        assert_eq!(
            message.payload,
            Payload::ThumbnailRequest(ThumbnailRequest::default())
        );
        let message = decode(b"{\"version\":\"1.0\"}\n").unwrap();
        assert!(message.payload.is_empty());
    }
}
