//! Error types for signaling codecs.

/// Errors produced while encoding or decoding signaling artifacts.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid descriptor JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a share link: {0}")]
    NotShareLink(String),

    #[error("share link has no recognized parameter")]
    MissingTarget,

    #[error("not a magnet link: {0}")]
    NotMagnet(String),

    #[error("magnet link has no info hash")]
    MissingInfoHash,

    #[error("invalid info hash: {0}")]
    InvalidInfoHash(String),

    #[error("invalid percent-encoding: {0}")]
    InvalidEncoding(String),
}
