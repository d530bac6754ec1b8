//! Sending side of a transfer.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use linkdrop_channel::{ChannelError, HIGH_WATERMARK, LOW_WATERMARK, MessageChannel};
use linkdrop_protocol::{
    CHUNK_SIZE, ChunkHeader, Frame, FrameHeader, MAX_FILE_SIZE, MAX_FRAME_HEADER_LEN,
    PROTOCOL_VERSION, TransferAbort, TransferOffer,
};

use crate::TransferError;
use crate::chunker::{ChunkReader, file_checksum};
use crate::events::{EventSender, TransferEvent, emit, emit_progress};
use crate::frames::{recv_frame, send_frame, try_recv_frame};
use crate::progress::percent;
use crate::retry::{Connector, RetryDecision, RetryPolicy, RetryState, connect_with_retry};
use crate::session::TransferSession;
use crate::validation::{guess_mime_type, validate_selection};

/// Options for [`ChunkSender`].
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Chunk payload size; 0 selects [`CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Attach per-chunk and whole-file SHA-256 checksums.
    pub with_checksums: bool,
    /// MIME type of the file; guessed from the extension when empty.
    pub mime_type: String,
}

impl Default for SendOptions {
    fn default() -> Self {
        SendOptions {
            chunk_size: CHUNK_SIZE,
            with_checksums: true,
            mime_type: String::new(),
        }
    }
}

/// Streams one file to a receiving peer, chunk by chunk.
///
/// A sender outlives any single channel. When a channel dies mid-transfer
/// the sender keeps its state; run it again on a fresh channel and the
/// handshake resumes from whatever the receiver confirmed, or hand a
/// [`Connector`] to [`run_with_retry`](Self::run_with_retry) and let the
/// backoff policy drive reconnection.
pub struct ChunkSender {
    session: Arc<TransferSession>,
    path: PathBuf,
    file_name: String,
    file_size: u64,
    mime_type: String,
    chunk_size: usize,
    with_checksums: bool,
    checksum: String,
    events: EventSender,
    cancel: CancellationToken,
    started_emitted: bool,
}

impl ChunkSender {
    /// Prepares a transfer for the file at `path`.
    ///
    /// Validates the selection the way the share dialog would: a missing
    /// file, an unsupported type, or an oversized file fails here, before
    /// anything reaches the peer.
    pub async fn new(
        path: impl Into<PathBuf>,
        options: SendOptions,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<Self, TransferError> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        let metadata = tokio::fs::metadata(&path).await?;
        let file_size = metadata.len();

        let mime_type = if options.mime_type.is_empty() {
            guess_mime_type(&file_name).unwrap_or("").to_string()
        } else {
            options.mime_type
        };
        validate_selection(&file_name, file_size, &mime_type, MAX_FILE_SIZE)?;

        let chunk_size = if options.chunk_size == 0 {
            CHUNK_SIZE
        } else {
            options.chunk_size
        };

        let transfer_id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(TransferSession::new(
            transfer_id,
            file_name.clone(),
            file_size,
        ));

        Ok(ChunkSender {
            session,
            path,
            file_name,
            file_size,
            mime_type,
            chunk_size,
            with_checksums: options.with_checksums,
            checksum: String::new(),
            events,
            cancel,
            started_emitted: false,
        })
    }

    /// Shared session handle for UIs.
    pub fn session(&self) -> Arc<TransferSession> {
        Arc::clone(&self.session)
    }

    /// Returns the transfer ID offers will carry.
    pub fn transfer_id(&self) -> String {
        self.session.id()
    }

    /// Runs the transfer over one channel until the receiver confirms
    /// completion.
    ///
    /// On a transient failure the session stays active so a later `run` on
    /// a fresh channel resumes; terminal failures mark it failed.
    pub async fn run<C: MessageChannel>(&mut self, channel: &C) -> Result<(), TransferError> {
        match self.run_inner(channel).await {
            Ok(()) => {
                self.session.complete();
                info!(
                    transfer = %self.session.id(),
                    bytes = self.file_size,
                    "transfer complete"
                );
                emit(
                    &self.events,
                    TransferEvent::Completed {
                        transfer_id: self.session.id(),
                        total_bytes: self.file_size,
                    },
                )
                .await;
                Ok(())
            }
            Err(e) => {
                self.note_failure(channel, &e).await;
                Err(e)
            }
        }
    }

    /// Runs the transfer end to end, redialing through `connector` on
    /// transient failures until completion, cancellation, a terminal
    /// protocol error, or attempt exhaustion.
    pub async fn run_with_retry<F: Connector>(
        &mut self,
        connector: &mut F,
        policy: RetryPolicy,
    ) -> Result<(), TransferError> {
        let mut state = RetryState::new(policy);
        let transfer_id = self.session.id();
        let mut recovered: Option<F::Channel> = None;
        loop {
            let channel = match recovered.take() {
                Some(channel) => {
                    // A channel that came back on its own is a successful
                    // open; the policy re-arms for the next outage.
                    state.record_success();
                    channel
                }
                None => {
                    self.session.connecting();
                    let cancel = self.cancel.clone();
                    let events = self.events.clone();
                    match connect_with_retry(connector, &mut state, &transfer_id, &cancel, &events)
                        .await
                    {
                        Ok(channel) => channel,
                        Err(e) => {
                            self.settle_terminal(&e).await;
                            return Err(e);
                        }
                    }
                }
            };

            match self.run(&channel).await {
                Ok(()) => {
                    channel.close().await;
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    debug!(transfer = %transfer_id, error = %e, "channel lost; retrying");
                    match state.record_failure() {
                        RetryDecision::GiveUp => {
                            let err = TransferError::AttemptsExhausted {
                                attempts: state.attempts(),
                            };
                            self.settle_terminal(&err).await;
                            return Err(err);
                        }
                        RetryDecision::RetryAfter(delay) => {
                            emit(
                                &self.events,
                                TransferEvent::Retrying {
                                    transfer_id: transfer_id.clone(),
                                    attempt: state.attempts(),
                                    delay,
                                },
                            )
                            .await;
                            tokio::select! {
                                biased;
                                _ = self.cancel.cancelled() => {
                                    let err = TransferError::Channel(ChannelError::Cancelled);
                                    self.settle_terminal(&err).await;
                                    return Err(err);
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                            recovered = connector.reopened();
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_inner<C: MessageChannel>(&mut self, channel: &C) -> Result<(), TransferError> {
        // A chunk frame (length prefix + JSON header + payload) must fit in
        // one channel message.
        let max_payload = channel
            .max_message_len()
            .saturating_sub(4 + MAX_FRAME_HEADER_LEN);
        if self.chunk_size > max_payload {
            return Err(TransferError::ProtocolViolation(format!(
                "chunk size {} does not fit a channel message of {}",
                self.chunk_size,
                channel.max_message_len()
            )));
        }

        if self.with_checksums && self.checksum.is_empty() {
            self.checksum = file_checksum(&self.path).await?;
        }

        let offer = TransferOffer {
            transfer_id: self.session.id(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
            chunk_size: self.chunk_size as u32,
            checksum: self.checksum.clone(),
            protocol_version: PROTOCOL_VERSION,
        };
        send_frame(channel, Frame::control(FrameHeader::Offer(offer))).await?;
        debug!(
            transfer = %self.session.id(),
            file = %self.file_name,
            size = self.file_size,
            "offer sent"
        );

        let resume_from = match recv_frame(channel, &self.cancel).await?.header {
            FrameHeader::Accept(accept) => accept.resume_from,
            FrameHeader::Reject(reject) => return Err(TransferError::Rejected(reject.reason)),
            FrameHeader::Abort(abort) => return Err(TransferError::Aborted(abort.reason)),
            other => {
                return Err(TransferError::UnexpectedFrame {
                    expected: "accept",
                    got: other.kind(),
                });
            }
        };

        let mut reader = ChunkReader::open(&self.path, self.chunk_size).await?;
        if !self.with_checksums {
            reader = reader.without_checksums();
        }
        reader.seek_to(resume_from).await?;
        self.session.set_transferred(resume_from);
        if resume_from > 0 {
            self.session.record_ack(resume_from);
            debug!(transfer = %self.session.id(), resume_from, "resuming");
        }

        self.session.start();
        if !self.started_emitted {
            self.started_emitted = true;
            emit(
                &self.events,
                TransferEvent::Started {
                    transfer_id: self.session.id(),
                    file_name: self.file_name.clone(),
                    total_bytes: self.file_size,
                },
            )
            .await;
        }

        // One pass over the file: read a chunk, respect the watermarks,
        // send it, then sweep any acks the receiver has queued up.
        let mut completed = false;
        while let Some(chunk) = reader.next_chunk().await? {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Channel(ChannelError::Cancelled));
            }
            if channel.buffered_amount() >= HIGH_WATERMARK {
                channel.wait_buffered_below(LOW_WATERMARK).await?;
            }

            let header = ChunkHeader {
                transfer_id: self.session.id(),
                seq: chunk.seq,
                offset: chunk.offset,
                checksum: chunk.checksum.clone(),
            };
            let len = chunk.data.len() as u64;
            send_frame(channel, Frame::chunk(header, chunk.data)).await?;
            self.session.add_progress(len);
            trace!(transfer = %self.session.id(), seq = chunk.seq, len, "chunk sent");

            emit_progress(
                &self.events,
                TransferEvent::Progress {
                    transfer_id: self.session.id(),
                    transferred_bytes: self.session.transferred_bytes(),
                    total_bytes: self.file_size,
                    percent: percent(self.session.transferred_bytes(), self.file_size),
                },
            );

            if self.sweep_inbound(channel).await? {
                completed = true;
                break;
            }
        }

        if !completed {
            debug!(
                transfer = %self.session.id(),
                "all chunks sent; waiting for confirmation"
            );
            self.await_completion(channel).await?;
        }
        Ok(())
    }

    /// Non-blocking sweep of inbound frames between chunks. Returns `true`
    /// once the receiver reports completion.
    async fn sweep_inbound<C: MessageChannel>(&self, channel: &C) -> Result<bool, TransferError> {
        while let Some(frame) = try_recv_frame(channel).await? {
            match frame.header {
                FrameHeader::Ack(ack) => {
                    self.session.record_ack(ack.received_bytes);
                    trace!(transfer = %self.session.id(), seq = ack.seq, "ack");
                }
                FrameHeader::Complete(complete) => {
                    self.session.record_ack(complete.received_bytes);
                    return Ok(true);
                }
                FrameHeader::Abort(abort) => return Err(TransferError::Aborted(abort.reason)),
                other => {
                    return Err(TransferError::UnexpectedFrame {
                        expected: "ack",
                        got: other.kind(),
                    });
                }
            }
        }
        Ok(false)
    }

    /// Blocks on the closing ack/complete exchange after the last chunk.
    async fn await_completion<C: MessageChannel>(&self, channel: &C) -> Result<(), TransferError> {
        loop {
            match recv_frame(channel, &self.cancel).await?.header {
                FrameHeader::Ack(ack) => self.session.record_ack(ack.received_bytes),
                FrameHeader::Complete(complete) => {
                    self.session.record_ack(complete.received_bytes);
                    return Ok(());
                }
                FrameHeader::Abort(abort) => return Err(TransferError::Aborted(abort.reason)),
                other => {
                    return Err(TransferError::UnexpectedFrame {
                        expected: "complete",
                        got: other.kind(),
                    });
                }
            }
        }
    }

    /// Session and event bookkeeping for a failed `run`.
    async fn note_failure<C: MessageChannel>(&self, channel: &C, error: &TransferError) {
        match error {
            TransferError::Channel(ChannelError::Cancelled) => {
                if channel.is_open() {
                    let abort = TransferAbort {
                        transfer_id: self.session.id(),
                        reason: "cancelled".into(),
                    };
                    let _ = send_frame(channel, Frame::control(FrameHeader::Abort(abort))).await;
                    // Flush the abort before the channel goes away.
                    channel.close().await;
                }
                self.settle_terminal(error).await;
            }
            e if e.is_transient() => {
                warn!(transfer = %self.session.id(), error = %e, "transfer attempt failed");
            }
            _ => {
                if channel.is_open() {
                    let abort = TransferAbort {
                        transfer_id: self.session.id(),
                        reason: error.to_string(),
                    };
                    let _ = send_frame(channel, Frame::control(FrameHeader::Abort(abort))).await;
                    channel.close().await;
                }
                self.settle_terminal(error).await;
            }
        }
    }

    /// Marks the session terminal and emits the matching lifecycle event.
    async fn settle_terminal(&self, error: &TransferError) {
        match error {
            TransferError::Channel(ChannelError::Cancelled) => {
                self.session.cancel();
                emit(
                    &self.events,
                    TransferEvent::Cancelled {
                        transfer_id: self.session.id(),
                    },
                )
                .await;
            }
            _ => {
                self.session.fail(&error.to_string());
                warn!(transfer = %self.session.id(), error = %error, "transfer failed");
                emit(
                    &self.events,
                    TransferEvent::Failed {
                        transfer_id: self.session.id(),
                        error: error.to_string(),
                    },
                )
                .await;
            }
        }
    }
}
