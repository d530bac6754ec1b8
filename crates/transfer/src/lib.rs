//! Chunked file transfer with resume support and progress tracking.
//!
//! A transfer starts with an offer frame carrying the file metadata, the
//! chunk size, and the expected byte count. Once the peer accepts, the
//! sender streams fixed-size chunks with sequence numbers and the receiver
//! acknowledges each one, so either side can pick the transfer back up on a
//! fresh channel after a drop. [`ChunkSender`] and [`ChunkReceiver`] drive
//! the two ends; [`connect_with_retry`] wraps channel establishment in the
//! linear-backoff policy both ends share.

mod assembler;
mod chunker;
mod events;
mod frames;
mod progress;
mod receiver;
mod retry;
mod sender;
mod session;
mod validation;

pub use assembler::{ChunkAssembler, PushOutcome};
pub use chunker::{Chunk, ChunkReader, checksum_bytes, file_checksum};
pub use events::{EventSender, TransferEvent, event_stream};
pub use progress::{RateEstimator, format_size, percent};
pub use receiver::{ChunkReceiver, ReceiveOptions};
pub use retry::{Connector, RetryDecision, RetryPolicy, RetryState, connect_with_retry};
pub use sender::{ChunkSender, SendOptions};
pub use session::{TransferProgress, TransferSession, TransferStatus};
pub use validation::{
    ALLOWED_TYPE_PATTERNS, guess_mime_type, type_allowed, validate_file_name, validate_offer,
    validate_selection,
};

use linkdrop_channel::ChannelError;
use linkdrop_protocol::FrameError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("no file selected")]
    NoFileSelected,

    #[error("file type not allowed: {0}")]
    UnsupportedType(String),

    #[error("file of {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("offer rejected: {0}")]
    Rejected(String),

    #[error("transfer aborted by peer: {0}")]
    Aborted(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("unexpected {got} frame while waiting for {expected}")]
    UnexpectedFrame {
        expected: &'static str,
        got: &'static str,
    },

    #[error("chunk sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("transfer incomplete: {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("gave up after {attempts} failed connection attempts")]
    AttemptsExhausted { attempts: u32 },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl TransferError {
    /// Whether reconnecting and resuming can plausibly clear this error.
    ///
    /// Transport failures are transient; protocol-level failures (rejection,
    /// checksum mismatch, sequence gaps) and cancellation are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Channel(ChannelError::Cancelled) => false,
            TransferError::Channel(_) | TransferError::Io(_) => true,
            _ => false,
        }
    }
}
