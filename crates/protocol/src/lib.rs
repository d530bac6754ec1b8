//! Wire protocol for LinkDrop peer-to-peer file transfers.
//!
//! Every message exchanged on a data channel is one binary frame: a 4-byte
//! big-endian header length, a JSON header, and an optional raw payload.
//! Control frames (offer, accept, ack, complete, ...) carry an empty payload;
//! chunk frames carry the file bytes described by their header.

pub mod frame;
pub mod messages;

pub use frame::{Frame, FrameError};
pub use messages::{
    ChunkAck, ChunkHeader, FrameHeader, TransferAbort, TransferAccept, TransferComplete,
    TransferOffer, TransferReject,
};

/// Protocol revision advertised in transfer offers.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default payload size of a single chunk frame.
///
/// 16 KiB keeps every frame comfortably below the message size limits of the
/// channel transports, so a chunk never has to be split again in flight.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Upper bound on the serialized JSON header of a single frame.
pub const MAX_FRAME_HEADER_LEN: usize = 1024;

/// Largest file accepted for sharing (100 MiB).
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
