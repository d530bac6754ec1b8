//! Binary frame codec: 4-byte big-endian header length + JSON header + payload.

use crate::MAX_FRAME_HEADER_LEN;
use crate::messages::{ChunkHeader, FrameHeader};

/// A single protocol frame as carried by one channel message.
///
/// Control frames have an empty payload; chunk frames carry the bytes
/// described by their [`ChunkHeader`].
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a control frame with no payload.
    pub fn control(header: FrameHeader) -> Self {
        Frame {
            header,
            payload: Vec::new(),
        }
    }

    /// Builds a chunk frame from its header and the chunk bytes.
    pub fn chunk(header: ChunkHeader, payload: Vec<u8>) -> Self {
        Frame {
            header: FrameHeader::Chunk(header),
            payload,
        }
    }

    /// Encodes the frame: `[4 bytes: header_len (big-endian)][JSON header][payload]`.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let header_json = serde_json::to_vec(&self.header)
            .map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        if header_json.len() > MAX_FRAME_HEADER_LEN {
            return Err(FrameError::HeaderTooLarge {
                len: header_json.len(),
            });
        }
        let header_len = header_json.len() as u32;

        let mut buf = Vec::with_capacity(4 + header_json.len() + self.payload.len());
        buf.extend_from_slice(&header_len.to_be_bytes());
        buf.extend_from_slice(&header_json);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one frame from a complete channel message.
    pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
        if data.len() < 4 {
            return Err(FrameError::TooShort);
        }

        let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if header_len > MAX_FRAME_HEADER_LEN {
            return Err(FrameError::HeaderTooLarge { len: header_len });
        }
        if data.len() < 4 + header_len {
            return Err(FrameError::HeaderTruncated {
                expected: header_len,
                got: data.len() - 4,
            });
        }

        let header: FrameHeader = serde_json::from_slice(&data[4..4 + header_len])
            .map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let payload = data[4 + header_len..].to_vec();

        Ok(Frame { header, payload })
    }
}

/// Errors from frame encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short (need at least 4 bytes)")]
    TooShort,

    #[error("frame header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("frame header too large: {len} bytes")]
    HeaderTooLarge { len: usize },

    #[error("invalid frame header JSON: {0}")]
    InvalidJson(String),
}
