//! Frame headers for the transfer handshake, chunk stream, and teardown.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Handshake payloads
// ---------------------------------------------------------------------------

/// Opens a transfer. Always the first frame a sender puts on a channel.
///
/// `chunk_size` is fixed for the lifetime of the transfer; both sides derive
/// chunk sequence numbers from it, including across resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOffer {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    pub chunk_size: u32,
    /// Hex SHA-256 of the whole file; empty when the sender skips checksums.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub protocol_version: u32,
}

/// Accepts an offer and tells the sender where to start reading.
///
/// `resume_from` is 0 for a fresh transfer, or the count of contiguous bytes
/// the receiver already holds from an interrupted attempt. It is always a
/// multiple of the offered chunk size, or the full file size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAccept {
    pub transfer_id: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub resume_from: u64,
}

/// Declines an offer. The reason is surfaced to the sending user as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReject {
    pub transfer_id: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Chunk stream payloads
// ---------------------------------------------------------------------------

/// Describes the chunk bytes that follow this header in the same frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub transfer_id: String,
    /// Zero-based chunk index: `offset / chunk_size`.
    pub seq: u64,
    pub offset: u64,
    /// Hex SHA-256 of this chunk's payload; empty when checksums are off.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Acknowledges one chunk. `received_bytes` is the receiver's contiguous
/// total, which doubles as the resume offset for a later reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub transfer_id: String,
    pub seq: u64,
    pub received_bytes: u64,
}

// ---------------------------------------------------------------------------
// Teardown payloads
// ---------------------------------------------------------------------------

/// Reports that the receiver holds the complete file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferComplete {
    pub transfer_id: String,
    pub received_bytes: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Tears down a transfer before completion. Sent by either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAbort {
    pub transfer_id: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Frame dispatch
// ---------------------------------------------------------------------------

/// Typed frame header, dispatched on the JSON `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FrameHeader {
    Offer(TransferOffer),
    Accept(TransferAccept),
    Reject(TransferReject),
    Chunk(ChunkHeader),
    Ack(ChunkAck),
    Complete(TransferComplete),
    Abort(TransferAbort),
}

impl FrameHeader {
    /// Transfer this frame belongs to.
    pub fn transfer_id(&self) -> &str {
        match self {
            FrameHeader::Offer(p) => &p.transfer_id,
            FrameHeader::Accept(p) => &p.transfer_id,
            FrameHeader::Reject(p) => &p.transfer_id,
            FrameHeader::Chunk(p) => &p.transfer_id,
            FrameHeader::Ack(p) => &p.transfer_id,
            FrameHeader::Complete(p) => &p.transfer_id,
            FrameHeader::Abort(p) => &p.transfer_id,
        }
    }

    /// Short name of the frame type, for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameHeader::Offer(_) => "offer",
            FrameHeader::Accept(_) => "accept",
            FrameHeader::Reject(_) => "reject",
            FrameHeader::Chunk(_) => "chunk",
            FrameHeader::Ack(_) => "ack",
            FrameHeader::Complete(_) => "complete",
            FrameHeader::Abort(_) => "abort",
        }
    }
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}
