//! Frame encoding and decoding for the foldersync wire format.
//!
//! Every message is one JSON header line, terminated by `\n`, tagged by its
//! `action` field. Add and modify headers announce `size` bytes of raw payload
//! that follow the terminator immediately:
//!
//! ```text
//! {"action":"add","path":"notes.txt","size":5,"version":"0190..."}\nhello
//! {"action":"modify","path":"a/b.bin","size":N,"version":"0190..."}\n<N bytes>
//! {"action":"delete","path":"notes.txt"}\n
//! {"action":"status","peers":{"10.0.0.2:51000":"online"}}\n
//! ```
//!
//! JSON escapes control characters, so a header never contains a raw newline
//! and the terminator alone delimits it.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{
    ChangeAction, HEADER_TERMINATOR, MAX_PAYLOAD_SIZE, PathError, SyncPath, VersionError,
    VersionId,
};

/// Liveness of one peer as seen by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// Connection is open.
    Online,
    /// Connection has ended; the entry is kept for later broadcasts.
    Offline,
}

impl PeerState {
    /// Wire spelling of this state.
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::Online => "online",
            PeerState::Offline => "offline",
        }
    }

    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "online" => Some(PeerState::Online),
            "offline" => Some(PeerState::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping of endpoint identity to liveness, as carried by a status broadcast.
pub type PeerStatusMap = BTreeMap<String, PeerState>;

/// Header of a file-change message.
///
/// `size` is present exactly when the action carries a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeHeader {
    /// What happened to the file.
    pub action: ChangeAction,
    /// Path relative to the sync root.
    pub path: SyncPath,
    /// Payload length in bytes (absent for delete).
    pub size: Option<u64>,
    /// Version token chosen by the sender (absent for delete).
    pub version: Option<VersionId>,
}

/// A decoded header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// File change (add, modify or delete).
    Change(ChangeHeader),
    /// Liveness snapshot from the relay.
    Status(PeerStatusMap),
}

impl Header {
    /// Number of payload bytes that follow this header on the wire.
    pub fn payload_len(&self) -> u64 {
        match self {
            Header::Change(change) => change.size.unwrap_or(0),
            Header::Status(_) => 0,
        }
    }

    /// Whether this is a liveness broadcast.
    pub fn is_status(&self) -> bool {
        matches!(self, Header::Status(_))
    }

    /// Serialize to a single line, terminator included.
    pub fn to_line(&self) -> Result<Vec<u8>, FrameError> {
        let wire = match self {
            Header::Change(change) => {
                let path = change.path.as_str();
                let version = change.version.as_ref().map(VersionId::as_str);
                match change.action {
                    ChangeAction::Add => WireHeaderRef::Add {
                        path,
                        size: change.size,
                        version,
                    },
                    ChangeAction::Modify => WireHeaderRef::Modify {
                        path,
                        size: change.size,
                        version,
                    },
                    ChangeAction::Delete => WireHeaderRef::Delete { path },
                }
            }
            Header::Status(peers) => WireHeaderRef::Status { peers },
        };

        let mut line = serde_json::to_vec(&wire)?;
        line.push(HEADER_TERMINATOR);
        Ok(line)
    }
}

/// Serialization view of a header, borrowing from [`Header`].
#[derive(Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum WireHeaderRef<'a> {
    Add {
        path: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<&'a str>,
    },
    Modify {
        path: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<&'a str>,
    },
    Delete {
        path: &'a str,
    },
    Status {
        peers: &'a PeerStatusMap,
    },
}

/// Deserialization view of a file-change header before validation.
#[derive(Deserialize)]
struct WireChange {
    path: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    version: Option<WireVersion>,
}

/// Version tokens arrive as strings, or as numbers from timestamp-based peers.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireVersion {
    Text(String),
    Number(serde_json::Number),
}

impl WireVersion {
    fn into_token(self) -> Result<VersionId, FrameError> {
        let text = match self {
            WireVersion::Text(s) => s,
            WireVersion::Number(n) => n.to_string(),
        };
        Ok(VersionId::parse(&text)?)
    }
}

#[derive(Deserialize)]
struct WireStatus {
    peers: PeerStatusMap,
}

/// Parse one header line (terminator optional).
pub fn parse_header(line: &[u8]) -> Result<Header, FrameError> {
    let line = line.strip_suffix(&[HEADER_TERMINATOR]).unwrap_or(line);
    let value: Value = serde_json::from_slice(line)?;
    let Value::Object(map) = value else {
        return Err(FrameError::NotAnObject);
    };

    let action = match map.get("action") {
        Some(Value::String(action)) => action.clone(),
        Some(other) => return Err(FrameError::UnknownAction(other.to_string())),
        None => return parse_legacy_status(&map),
    };

    let value = Value::Object(map);
    let change_action = match action.as_str() {
        "add" => ChangeAction::Add,
        "modify" => ChangeAction::Modify,
        "delete" => ChangeAction::Delete,
        "status" => {
            let status: WireStatus = serde_json::from_value(value)?;
            return Ok(Header::Status(status.peers));
        }
        _ => return Err(FrameError::UnknownAction(action)),
    };

    let wire: WireChange = serde_json::from_value(value)?;
    let path = SyncPath::new(&wire.path)?;

    if !change_action.carries_payload() {
        return Ok(Header::Change(ChangeHeader {
            action: change_action,
            path,
            size: None,
            version: None,
        }));
    }

    let size = wire.size.ok_or(FrameError::MissingSize(change_action))?;
    if size > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size,
            limit: MAX_PAYLOAD_SIZE,
        });
    }
    let version = wire.version.map(WireVersion::into_token).transpose()?;

    Ok(Header::Change(ChangeHeader {
        action: change_action,
        path,
        size: Some(size),
        version,
    }))
}

/// Status broadcasts from older relays are a bare `{identity: state}` object.
fn parse_legacy_status(map: &serde_json::Map<String, Value>) -> Result<Header, FrameError> {
    let mut peers = PeerStatusMap::new();
    for (identity, state) in map {
        let state = state
            .as_str()
            .and_then(PeerState::from_wire)
            .ok_or(FrameError::MissingAction)?;
        peers.insert(identity.clone(), state);
    }
    Ok(Header::Status(peers))
}

/// A complete message as it travels on the wire.
///
/// The frame keeps the exact bytes it was decoded from (or encoded to), so a
/// relay can forward it without re-serializing.
#[derive(Debug, Clone)]
pub struct Frame {
    header: Header,
    wire: Bytes,
    header_len: usize,
}

impl Frame {
    /// Encode a header and its payload.
    pub fn new(header: Header, payload: &[u8]) -> Result<Self, FrameError> {
        let expected = header.payload_len();
        if expected != payload.len() as u64 {
            return Err(FrameError::PayloadLengthMismatch {
                expected,
                actual: payload.len(),
            });
        }

        let line = header.to_line()?;
        let header_len = line.len();
        let mut wire = BytesMut::with_capacity(header_len + payload.len());
        wire.extend_from_slice(&line);
        wire.extend_from_slice(payload);

        Ok(Self {
            header,
            wire: wire.freeze(),
            header_len,
        })
    }

    /// Assemble a frame from bytes already read off a stream.
    ///
    /// `wire` must hold the header line (terminator included, `header_len`
    /// bytes) followed by exactly the announced payload.
    pub(crate) fn from_wire(header: Header, wire: Bytes, header_len: usize) -> Self {
        debug_assert_eq!(wire.len() as u64, header_len as u64 + header.payload_len());
        Self {
            header,
            wire,
            header_len,
        }
    }

    /// Add event carrying the full contents of a new file.
    pub fn add(path: SyncPath, version: VersionId, payload: &[u8]) -> Result<Self, FrameError> {
        Self::change(ChangeAction::Add, path, version, payload)
    }

    /// Modify event carrying the full current contents of a file.
    pub fn modify(path: SyncPath, version: VersionId, payload: &[u8]) -> Result<Self, FrameError> {
        Self::change(ChangeAction::Modify, path, version, payload)
    }

    /// Delete event carrying only the path.
    pub fn delete(path: SyncPath) -> Result<Self, FrameError> {
        let header = Header::Change(ChangeHeader {
            action: ChangeAction::Delete,
            path,
            size: None,
            version: None,
        });
        Self::new(header, &[])
    }

    /// Liveness snapshot.
    pub fn status(peers: PeerStatusMap) -> Result<Self, FrameError> {
        Self::new(Header::Status(peers), &[])
    }

    fn change(
        action: ChangeAction,
        path: SyncPath,
        version: VersionId,
        payload: &[u8],
    ) -> Result<Self, FrameError> {
        let header = Header::Change(ChangeHeader {
            action,
            path,
            size: Some(payload.len() as u64),
            version: Some(version),
        });
        Self::new(header, payload)
    }

    /// The decoded header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The payload bytes (empty for delete and status).
    pub fn payload(&self) -> Bytes {
        self.wire.slice(self.header_len..)
    }

    /// The exact bytes of this frame on the wire.
    pub fn wire(&self) -> &Bytes {
        &self.wire
    }

    /// Total length on the wire.
    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

    /// Split into header and payload.
    pub fn into_parts(self) -> (Header, Bytes) {
        let payload = self.wire.slice(self.header_len..);
        (self.header, payload)
    }
}

/// A file change with its payload, as produced by a watcher or decoded off
/// the wire.
///
/// `payload` is empty for delete events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened to the file.
    pub action: ChangeAction,
    /// Path relative to the sync root.
    pub path: SyncPath,
    /// Version token chosen by the sender.
    pub version: Option<VersionId>,
    /// Full file contents for add and modify.
    pub payload: Bytes,
}

impl ChangeEvent {
    /// Payload length as announced on the wire (absent for delete).
    pub fn size(&self) -> Option<u64> {
        self.action
            .carries_payload()
            .then_some(self.payload.len() as u64)
    }

    /// Encode as a frame.
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        if !self.action.carries_payload() {
            return Frame::delete(self.path.clone());
        }
        let header = Header::Change(ChangeHeader {
            action: self.action,
            path: self.path.clone(),
            size: self.size(),
            version: self.version.clone(),
        });
        Frame::new(header, &self.payload)
    }
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// File change for the change handler.
    Change(ChangeEvent),
    /// Liveness snapshot for the status handler.
    Status(PeerStatusMap),
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        let (header, payload) = frame.into_parts();
        match header {
            Header::Change(change) => Message::Change(ChangeEvent {
                action: change.action,
                path: change.path,
                version: change.version,
                payload,
            }),
            Header::Status(peers) => Message::Status(peers),
        }
    }
}

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Header is not valid JSON, or a field has the wrong type.
    #[error("malformed header: {0}")]
    MalformedHeader(#[from] serde_json::Error),

    /// Header is valid JSON but not an object.
    #[error("header is not a JSON object")]
    NotAnObject,

    /// Header has no `action` and is not a legacy status map.
    #[error("header has no action")]
    MissingAction,

    /// Header names an action this protocol does not know.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Add or modify header without `size`.
    #[error("{0} header without size")]
    MissingSize(ChangeAction),

    /// Header path is not a valid relative path.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// Header version token is not usable as an archive key.
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] VersionError),

    /// Header line exceeds the configured limit.
    #[error("header exceeds {limit} bytes")]
    HeaderTooLong {
        /// Configured limit.
        limit: usize,
    },

    /// Announced payload exceeds the protocol limit.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Announced size.
        size: u64,
        /// Maximum accepted size.
        limit: u64,
    },

    /// Payload length does not match the header.
    #[error("payload length mismatch: header says {expected}, but {actual} bytes given")]
    PayloadLengthMismatch {
        /// Length announced by the header.
        expected: u64,
        /// Length actually supplied.
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> SyncPath {
        SyncPath::new(s).unwrap()
    }

    fn version(s: &str) -> VersionId {
        VersionId::parse(s).unwrap()
    }

    #[test]
    fn test_add_header_layout() {
        let frame = Frame::add(path("notes.txt"), version("v1"), b"hello").unwrap();
        let expected: &[u8] =
            b"{\"action\":\"add\",\"path\":\"notes.txt\",\"size\":5,\"version\":\"v1\"}\nhello";
        assert_eq!(frame.wire().as_ref(), expected);
        assert_eq!(frame.payload().as_ref(), b"hello");
    }

    #[test]
    fn test_delete_header_layout() {
        let frame = Frame::delete(path("notes.txt")).unwrap();
        assert_eq!(
            frame.wire().as_ref(),
            b"{\"action\":\"delete\",\"path\":\"notes.txt\"}\n"
        );
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_status_header_layout() {
        let mut peers = PeerStatusMap::new();
        peers.insert("10.0.0.2:5000".into(), PeerState::Online);
        peers.insert("10.0.0.3:5000".into(), PeerState::Offline);
        let frame = Frame::status(peers.clone()).unwrap();
        assert_eq!(
            frame.wire().as_ref(),
            b"{\"action\":\"status\",\"peers\":{\"10.0.0.2:5000\":\"online\",\"10.0.0.3:5000\":\"offline\"}}\n"
        );
        assert_eq!(parse_header(frame.wire()).unwrap(), Header::Status(peers));
    }

    #[test]
    fn test_parse_modify() {
        let header = parse_header(
            b"{\"action\":\"modify\",\"path\":\"a/b.bin\",\"size\":3,\"version\":\"abc\"}\n",
        )
        .unwrap();
        let Header::Change(change) = header else {
            panic!("expected change header");
        };
        assert_eq!(change.action, ChangeAction::Modify);
        assert_eq!(change.path.as_str(), "a/b.bin");
        assert_eq!(change.size, Some(3));
        assert_eq!(change.version, Some(version("abc")));
    }

    #[test]
    fn test_parse_numeric_version() {
        let header = parse_header(
            br#"{"action":"add","path":"x","size":0,"version":1700000000.25}"#,
        )
        .unwrap();
        let Header::Change(change) = header else {
            panic!("expected change header");
        };
        assert_eq!(change.version, Some(version("1700000000.25")));
    }

    #[test]
    fn test_parse_add_without_version() {
        let header = parse_header(br#"{"action":"add","path":"x","size":2}"#).unwrap();
        assert_eq!(header.payload_len(), 2);
        let Header::Change(change) = header else {
            panic!("expected change header");
        };
        assert_eq!(change.version, None);
    }

    #[test]
    fn test_parse_delete_ignores_extra_fields() {
        let header =
            parse_header(br#"{"action":"delete","path":"x","size":10,"version":"v"}"#).unwrap();
        assert_eq!(header.payload_len(), 0);
    }

    #[test]
    fn test_parse_legacy_status() {
        let header =
            parse_header(br#"{"('10.0.0.2', 5000)":"online","('10.0.0.3', 5000)":"offline"}"#)
                .unwrap();
        let Header::Status(peers) = header else {
            panic!("expected status header");
        };
        assert_eq!(peers.len(), 2);
        assert_eq!(peers["('10.0.0.2', 5000)"], PeerState::Online);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_header(b"not json"),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(parse_header(b"[1,2]"), Err(FrameError::NotAnObject)));
        assert!(matches!(
            parse_header(br#"{"action":"rename","path":"x"}"#),
            Err(FrameError::UnknownAction(_))
        ));
        assert!(matches!(
            parse_header(br#"{"action":"add","path":"x"}"#),
            Err(FrameError::MissingSize(ChangeAction::Add))
        ));
        assert!(matches!(
            parse_header(br#"{"action":"add","path":"../x","size":1}"#),
            Err(FrameError::InvalidPath(PathError::Traversal(_)))
        ));
        assert!(matches!(
            parse_header(br#"{"action":"add","path":"x","size":1,"version":"../v"}"#),
            Err(FrameError::InvalidVersion(_))
        ));
        assert!(matches!(
            parse_header(br#"{"path":"x"}"#),
            Err(FrameError::MissingAction)
        ));
        let too_big = format!(
            r#"{{"action":"add","path":"x","size":{}}}"#,
            MAX_PAYLOAD_SIZE + 1
        );
        assert!(matches!(
            parse_header(too_big.as_bytes()),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_payload_length_mismatch() {
        let header = Header::Change(ChangeHeader {
            action: ChangeAction::Add,
            path: path("x"),
            size: Some(4),
            version: None,
        });
        assert!(matches!(
            Frame::new(header, b"abc"),
            Err(FrameError::PayloadLengthMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_frame_into_message() {
        let frame = Frame::modify(path("a.txt"), version("v2"), b"body").unwrap();
        let Message::Change(event) = Message::from(frame.clone()) else {
            panic!("expected change message");
        };
        assert_eq!(event.action, ChangeAction::Modify);
        assert_eq!(event.payload.as_ref(), b"body");
        assert_eq!(event.size(), Some(4));
        assert_eq!(event.to_frame().unwrap().wire(), frame.wire());

        let status = Frame::status(PeerStatusMap::new()).unwrap();
        assert_eq!(Message::from(status), Message::Status(PeerStatusMap::new()));
    }

    #[test]
    fn test_delete_event_has_no_size() {
        let event = ChangeEvent {
            action: ChangeAction::Delete,
            path: path("gone.txt"),
            version: None,
            payload: Bytes::new(),
        };
        assert_eq!(event.size(), None);
        assert_eq!(
            event.to_frame().unwrap().wire().as_ref(),
            b"{\"action\":\"delete\",\"path\":\"gone.txt\"}\n"
        );
    }

    #[test]
    fn test_path_with_newline_stays_on_one_line() {
        let frame = Frame::add(path("odd\nname"), version("v"), b"").unwrap();
        let newlines = frame.wire().iter().filter(|b| **b == b'\n').count();
        assert_eq!(newlines, 1);
        let Header::Change(change) = parse_header(frame.wire()).unwrap() else {
            panic!("expected change header");
        };
        assert_eq!(change.path.as_str(), "odd\nname");
    }
}
