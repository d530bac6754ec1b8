//! Message channels for LinkDrop transfers.
//!
//! The transfer protocol is written against [`MessageChannel`], a small
//! reliable, ordered, message-oriented surface. Two transports implement it
//! here: an in-memory pair for same-process demos and tests, and a TCP
//! transport for direct peer connections. A WebRTC data channel satisfies
//! the same contract; the signaling crate produces the blobs needed to set
//! one up.

pub mod error;
pub mod memory;
pub mod tcp;

pub use error::ChannelError;
pub use memory::MemoryChannel;
pub use tcp::{ChannelInfo, TcpChannel, TcpChannelListener};

use std::future::Future;

/// Ceiling on a single message when the transport does not impose its own.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Senders stop queuing once this many bytes are buffered locally.
pub const HIGH_WATERMARK: usize = 1024 * 1024;

/// Senders resume once the local backlog falls below this.
pub const LOW_WATERMARK: usize = 256 * 1024;

/// A reliable, ordered, message-oriented pipe between two peers.
///
/// Messages arrive whole and in send order, or not at all; when delivery
/// breaks down the channel reports an error or a close, never a gap in the
/// middle of the stream.
pub trait MessageChannel {
    /// Queues one message for delivery.
    ///
    /// Returns once the message is accepted into the local send queue, not
    /// once the peer has it. Fails if the message exceeds
    /// [`max_message_len`](Self::max_message_len) or the channel is closed.
    fn send(&self, message: Vec<u8>) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Waits for the next inbound message.
    ///
    /// `Ok(None)` means the peer closed cleanly; an error means the
    /// transport failed. Implementations must be cancel safe: dropping the
    /// returned future must not lose a message.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, ChannelError>> + Send;

    /// Bytes accepted by [`send`](Self::send) but not yet handed to the
    /// transport.
    fn buffered_amount(&self) -> usize;

    /// Waits until [`buffered_amount`](Self::buffered_amount) drops below
    /// `threshold`, or the channel closes.
    fn wait_buffered_below(
        &self,
        threshold: usize,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Largest message [`send`](Self::send) accepts.
    fn max_message_len(&self) -> usize {
        DEFAULT_MAX_MESSAGE_LEN
    }

    /// Whether the channel is still usable for sending.
    fn is_open(&self) -> bool;

    /// Closes the channel.
    ///
    /// Every message [`send`](Self::send) has accepted is flushed to the
    /// peer first; transports may bound the flush with a teardown timeout.
    /// Afterwards sends fail with [`ChannelError::Closed`] and the peer's
    /// [`recv`](Self::recv) reports end of stream.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
