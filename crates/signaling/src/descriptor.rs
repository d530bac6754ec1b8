//! Connection descriptors exchanged during manual signaling.
//!
//! With no signaling server, each side serializes its session description
//! (plus any gathered ICE candidates) to JSON and base64-encodes it so the
//! blob can ride in a URL or be pasted into a chat. URL-safe alphabet
//! without padding, so blobs drop into query strings untouched.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::SignalingError;

/// An SDP session description in the shape browsers produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// `"offer"` or `"answer"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: "offer".into(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: "answer".into(),
            sdp: sdp.into(),
        }
    }
}

/// A gathered ICE candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

/// Everything one side publishes for manual signaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub sdp: SessionDescription,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<IceCandidate>,
}

impl ConnectionDescriptor {
    pub fn new(sdp: SessionDescription) -> Self {
        ConnectionDescriptor {
            sdp,
            candidates: Vec::new(),
        }
    }

    pub fn with_candidate(mut self, candidate: IceCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    /// Decodes either a full descriptor blob or a compact one.
    ///
    /// Compact blobs carry only the session description and decode into a
    /// descriptor with no candidates.
    pub fn from_blob(blob: &str) -> Result<Self, SignalingError> {
        let raw = decode_blob(blob)?;
        if let Ok(descriptor) = serde_json::from_slice::<ConnectionDescriptor>(&raw) {
            return Ok(descriptor);
        }
        let sdp: SessionDescription = serde_json::from_slice(&raw)?;
        Ok(ConnectionDescriptor::new(sdp))
    }
}

/// Encodes a full descriptor for embedding in a link.
pub fn encode_descriptor(descriptor: &ConnectionDescriptor) -> Result<String, SignalingError> {
    let json = serde_json::to_vec(descriptor)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a blob produced by [`encode_descriptor`].
pub fn decode_descriptor(blob: &str) -> Result<ConnectionDescriptor, SignalingError> {
    let raw = decode_blob(blob)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Encodes only the session description. Shorter, for QR codes and the like,
/// at the cost of losing trickled candidates.
pub fn encode_compact(sdp: &SessionDescription) -> Result<String, SignalingError> {
    let json = serde_json::to_vec(sdp)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a blob produced by [`encode_compact`].
pub fn decode_compact(blob: &str) -> Result<SessionDescription, SignalingError> {
    let raw = decode_blob(blob)?;
    Ok(serde_json::from_slice(&raw)?)
}

// Tolerates whitespace picked up while copy-pasting the blob around.
fn decode_blob(blob: &str) -> Result<Vec<u8>, SignalingError> {
    Ok(URL_SAFE_NO_PAD.decode(blob.trim())?)
}
