//! Frame I/O over a message channel.

use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use linkdrop_channel::{ChannelError, MessageChannel};
use linkdrop_protocol::Frame;

use crate::TransferError;

/// Encodes and sends one frame.
pub(crate) async fn send_frame<C: MessageChannel>(
    channel: &C,
    frame: Frame,
) -> Result<(), TransferError> {
    channel.send(frame.encode()?).await?;
    Ok(())
}

/// Waits for the next frame, honoring cancellation.
///
/// A clean channel close while a transfer still expects frames surfaces as
/// [`ChannelError::Closed`], which resume treats like any other drop.
pub(crate) async fn recv_frame<C: MessageChannel>(
    channel: &C,
    cancel: &CancellationToken,
) -> Result<Frame, TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Channel(ChannelError::Cancelled)),
        message = channel.recv() => match message? {
            Some(bytes) => Ok(Frame::decode(&bytes)?),
            None => Err(TransferError::Channel(ChannelError::Closed)),
        },
    }
}

/// Polls for a pending frame without waiting.
///
/// Relies on `recv` being cancel-safe; a zero timeout gives the channel one
/// poll to produce an already-queued message.
pub(crate) async fn try_recv_frame<C: MessageChannel>(
    channel: &C,
) -> Result<Option<Frame>, TransferError> {
    match timeout(Duration::ZERO, channel.recv()).await {
        Err(_) => Ok(None),
        Ok(message) => match message? {
            Some(bytes) => Ok(Some(Frame::decode(&bytes)?)),
            None => Err(TransferError::Channel(ChannelError::Closed)),
        },
    }
}
