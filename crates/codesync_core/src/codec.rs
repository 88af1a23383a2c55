//! Change encoder/decoder.
//!
//! [`ChangeCodec`] turns local edits into [`RemoteEnvelope`]s and frames
//! [`Message`]s as JSON text; [`ChangeCodec::decode`] does the reverse for
//! untrusted input and never touches document state, so a failed decode
//! cannot leave anything half-applied.

use std::collections::BTreeMap;

use crate::document::{EditOp, Snapshot};
use crate::error::{Result, SyncError};
use crate::protocol::{
    CodeAck, CodeChange, CodePayload, Message, RemoteEnvelope, SyncRequest, SyncSnapshot,
};

/// Encoder bound to one room and one local peer.
#[derive(Debug, Clone)]
pub struct ChangeCodec {
    room_id: String,
    sender_id: String,
}

impl ChangeCodec {
    /// Create a codec for `room_id`, stamping envelopes with `sender_id`.
    pub fn new(room_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            sender_id: sender_id.into(),
        }
    }

    /// Room this codec encodes for.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Local peer id.
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Wrap an edit computed against `revision` in an envelope, linked to
    /// the previous envelope this peer sent.
    pub fn encode(&self, op: &EditOp, revision: u64, prev_origin: Option<u64>) -> RemoteEnvelope {
        RemoteEnvelope {
            room_id: self.room_id.clone(),
            op: op.clone(),
            origin_revision: revision,
            prev_origin,
            sender_id: self.sender_id.clone(),
        }
    }

    /// A `code-change` message carrying an envelope.
    pub fn change_message(&self, envelope: RemoteEnvelope) -> Message {
        Message::CodeChange(CodeChange {
            room_id: self.room_id.clone(),
            code: CodePayload::Envelope(envelope),
        })
    }

    /// A `code-change` message carrying the whole buffer.
    pub fn full_text_message(&self, text: &str) -> Message {
        Message::CodeChange(CodeChange {
            room_id: self.room_id.clone(),
            code: CodePayload::Text(text.to_string()),
        })
    }

    /// A `code-ack` for an envelope received from `target`.
    pub fn ack_message(&self, target: &str, revision: u64) -> Message {
        Message::Ack(CodeAck {
            room_id: self.room_id.clone(),
            sender_id: self.sender_id.clone(),
            target: target.to_string(),
            revision,
        })
    }

    /// A `sync-request` asking peers for their document.
    pub fn sync_request_message(&self) -> Message {
        Message::SyncRequest(SyncRequest {
            room_id: self.room_id.clone(),
            sender_id: self.sender_id.clone(),
        })
    }

    /// A `sync-snapshot` answering `target`'s request.
    pub fn sync_snapshot_message(
        &self,
        target: &str,
        snapshot: Snapshot,
        cursors: BTreeMap<String, u64>,
    ) -> Message {
        Message::SyncSnapshot(SyncSnapshot {
            room_id: self.room_id.clone(),
            sender_id: self.sender_id.clone(),
            target: target.to_string(),
            buffer: snapshot.buffer,
            revision: snapshot.revision,
            cursors,
        })
    }

    /// Serialize a message into a wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Encode`] if serialization fails.
    pub fn frame(message: &Message) -> Result<String> {
        serde_json::to_string(message).map_err(SyncError::Encode)
    }

    /// Parse and validate a wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedEnvelope`] for invalid JSON, unknown
    /// events or edit variants, negative or fractional positions and lengths,
    /// missing fields, and envelopes without a sender.
    pub fn decode(frame: &str) -> Result<Message> {
        let message: Message = serde_json::from_str(frame)
            .map_err(|e| SyncError::MalformedEnvelope(e.to_string()))?;
        validate(&message)?;
        Ok(message)
    }

    /// Decode a frame that must hold a `code-change` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedEnvelope`] if the frame is invalid or
    /// carries anything other than an envelope.
    pub fn decode_envelope(frame: &str) -> Result<RemoteEnvelope> {
        match Self::decode(frame)? {
            Message::CodeChange(CodeChange {
                code: CodePayload::Envelope(envelope),
                ..
            }) => Ok(envelope),
            other => Err(SyncError::MalformedEnvelope(format!(
                "expected envelope, got `{}` message",
                other.event()
            ))),
        }
    }
}

fn validate(message: &Message) -> Result<()> {
    let sender = match message {
        Message::CodeChange(CodeChange {
            code: CodePayload::Envelope(envelope),
            ..
        }) => {
            if envelope.room_id != message.room_id() {
                return Err(SyncError::MalformedEnvelope(format!(
                    "envelope room `{}` does not match frame room `{}`",
                    envelope.room_id,
                    message.room_id()
                )));
            }
            Some(envelope.sender_id.as_str())
        }
        Message::CodeChange(_) => None,
        Message::Ack(ack) => Some(ack.sender_id.as_str()),
        Message::SyncRequest(req) => Some(req.sender_id.as_str()),
        Message::SyncSnapshot(snap) => Some(snap.sender_id.as_str()),
    };

    if sender.is_some_and(str::is_empty) {
        return Err(SyncError::MalformedEnvelope(format!(
            "`{}` message without sender id",
            message.event()
        )));
    }
    Ok(())
}
