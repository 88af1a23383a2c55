//! Wire messages exchanged between peers.
//!
//! Every message travels as one JSON frame naming its event:
//!
//! ```json
//! {"event": "code-change", "data": {"roomId": "r1", "code": {...}}}
//! ```
//!
//! `code-change` is the only event a minimal peer needs; `code` is either the
//! full buffer as a string or a structured [`RemoteEnvelope`]. The ack and
//! resync events are only understood by peers running this core.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::document::EditOp;

/// Event carrying a document change.
pub const CODE_CHANGE: &str = "code-change";
/// Event acknowledging an applied envelope.
pub const CODE_ACK: &str = "code-ack";
/// Event asking any peer for its current document.
pub const SYNC_REQUEST: &str = "sync-request";
/// Event answering a [`SYNC_REQUEST`].
pub const SYNC_SNAPSHOT: &str = "sync-snapshot";

/// One edit plus the metadata needed to reconcile it on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEnvelope {
    /// Room the edit belongs to.
    pub room_id: String,
    /// The edit itself.
    pub op: EditOp,
    /// Sender's document revision the edit was computed against.
    pub origin_revision: u64,
    /// Origin revision of the sender's previous envelope, `None` for the
    /// first one. Receivers use it to notice a missing envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_origin: Option<u64>,
    /// Peer that produced the edit.
    pub sender_id: String,
}

impl RemoteEnvelope {
    /// Split into the edit and its origin revision.
    pub fn into_parts(self) -> (EditOp, u64) {
        (self.op, self.origin_revision)
    }
}

/// Body of a `code-change` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CodePayload {
    /// Structured single-edit envelope.
    Envelope(RemoteEnvelope),
    /// Whole buffer, sent by peers that only do full-text replacement.
    Text(String),
}

impl<'de> Deserialize<'de> for CodePayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(text) => Ok(CodePayload::Text(text)),
            value @ serde_json::Value::Object(_) => serde_json::from_value(value)
                .map(CodePayload::Envelope)
                .map_err(de::Error::custom),
            other => Err(de::Error::custom(format!(
                "expected string or envelope for `code`, found {other}"
            ))),
        }
    }
}

/// `code-change` event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    /// Room the change belongs to.
    pub room_id: String,
    /// The change.
    pub code: CodePayload,
}

/// `code-ack` event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAck {
    /// Room the acknowledged envelope belongs to.
    pub room_id: String,
    /// Peer sending the acknowledgement.
    pub sender_id: String,
    /// Peer whose envelope is acknowledged.
    pub target: String,
    /// Origin revision of the acknowledged envelope.
    pub revision: u64,
}

/// `sync-request` event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Room to resync.
    pub room_id: String,
    /// Peer asking for a snapshot.
    pub sender_id: String,
}

/// `sync-snapshot` event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Room the snapshot belongs to.
    pub room_id: String,
    /// Peer sharing its document.
    pub sender_id: String,
    /// Peer that requested the snapshot.
    pub target: String,
    /// Full buffer.
    pub buffer: String,
    /// Revision of the buffer on the sending peer.
    pub revision: u64,
    /// Per sender, the origin revision of the last envelope included in
    /// the buffer.
    #[serde(default)]
    pub cursors: BTreeMap<String, u64>,
}

/// A framed wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Message {
    /// A document change.
    #[serde(rename = "code-change")]
    CodeChange(CodeChange),
    /// An acknowledgement.
    #[serde(rename = "code-ack")]
    Ack(CodeAck),
    /// A resync request.
    #[serde(rename = "sync-request")]
    SyncRequest(SyncRequest),
    /// A resync answer.
    #[serde(rename = "sync-snapshot")]
    SyncSnapshot(SyncSnapshot),
}

impl Message {
    /// Event name the message is framed with.
    pub fn event(&self) -> &'static str {
        match self {
            Message::CodeChange(_) => CODE_CHANGE,
            Message::Ack(_) => CODE_ACK,
            Message::SyncRequest(_) => SYNC_REQUEST,
            Message::SyncSnapshot(_) => SYNC_SNAPSHOT,
        }
    }

    /// Room the message belongs to.
    pub fn room_id(&self) -> &str {
        match self {
            Message::CodeChange(m) => &m.room_id,
            Message::Ack(m) => &m.room_id,
            Message::SyncRequest(m) => &m.room_id,
            Message::SyncSnapshot(m) => &m.room_id,
        }
    }
}
