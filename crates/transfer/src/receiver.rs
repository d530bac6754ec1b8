//! Receiving side of a transfer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use linkdrop_channel::{ChannelError, MessageChannel};
use linkdrop_protocol::{
    ChunkAck, Frame, FrameHeader, MAX_FILE_SIZE, TransferAbort, TransferAccept, TransferComplete,
    TransferOffer, TransferReject,
};

use crate::TransferError;
use crate::assembler::{ChunkAssembler, PushOutcome};
use crate::chunker::checksum_bytes;
use crate::events::{EventSender, TransferEvent, emit, emit_progress};
use crate::frames::{recv_frame, send_frame};
use crate::retry::{Connector, RetryDecision, RetryPolicy, RetryState, connect_with_retry};
use crate::session::TransferSession;
use crate::validation::validate_offer;

/// Options for [`ChunkReceiver`].
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Largest file the receiver will accept.
    pub max_file_size: u64,
    /// Verify per-chunk and whole-file checksums when the sender attached
    /// them.
    pub verify_checksums: bool,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        ReceiveOptions {
            max_file_size: MAX_FILE_SIZE,
            verify_checksums: true,
        }
    }
}

/// Everything the receiver keeps between channels for one transfer.
struct ReceiverState {
    offer: TransferOffer,
    session: Arc<TransferSession>,
    assembler: ChunkAssembler,
}

/// Accepts one offered file and assembles its chunks.
///
/// Like the sender, a receiver outlives any single channel: when a channel
/// dies it keeps the chunks accumulated so far, and the next `run` answers
/// the peer's re-offer with the matching resume offset.
pub struct ChunkReceiver {
    options: ReceiveOptions,
    events: EventSender,
    cancel: CancellationToken,
    state: Option<ReceiverState>,
    started_emitted: bool,
    completed_emitted: bool,
}

impl ChunkReceiver {
    pub fn new(options: ReceiveOptions, events: EventSender, cancel: CancellationToken) -> Self {
        ChunkReceiver {
            options,
            events,
            cancel,
            state: None,
            started_emitted: false,
            completed_emitted: false,
        }
    }

    /// Shared session handle, once an offer has been accepted.
    pub fn session(&self) -> Option<Arc<TransferSession>> {
        self.state.as_ref().map(|s| Arc::clone(&s.session))
    }

    /// The accepted offer, if any.
    pub fn offer(&self) -> Option<&TransferOffer> {
        self.state.as_ref().map(|s| &s.offer)
    }

    /// Drives one channel until the transfer completes.
    ///
    /// On a transient failure the accumulated chunks stay put, so calling
    /// `run` again on a fresh channel resumes where this one died.
    pub async fn run<C: MessageChannel>(&mut self, channel: &C) -> Result<(), TransferError> {
        match self.run_inner(channel).await {
            Ok(()) => {
                if let Some(state) = &self.state {
                    state.session.complete();
                    info!(
                        transfer = %state.offer.transfer_id,
                        bytes = state.assembler.received_bytes(),
                        "transfer complete"
                    );
                    if !self.completed_emitted {
                        self.completed_emitted = true;
                        emit(
                            &self.events,
                            TransferEvent::Completed {
                                transfer_id: state.offer.transfer_id.clone(),
                                total_bytes: state.assembler.received_bytes(),
                            },
                        )
                        .await;
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.note_failure(channel, &e).await;
                Err(e)
            }
        }
    }

    /// Accepts the transfer end to end, redialing through `connector` on
    /// transient failures, with the same backoff policy the sender uses.
    pub async fn run_with_retry<F: Connector>(
        &mut self,
        connector: &mut F,
        policy: RetryPolicy,
    ) -> Result<(), TransferError> {
        let mut state = RetryState::new(policy);
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
                    let transfer_id = self
                        .state
                        .as_ref()
                        .map(|s| s.offer.transfer_id.clone())
                        .unwrap_or_default();
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
                    debug!(error = %e, "channel lost; retrying");
                    match state.record_failure() {
                        RetryDecision::GiveUp => {
                            let err = TransferError::AttemptsExhausted {
                                attempts: state.attempts(),
                            };
                            self.settle_terminal(&err).await;
                            return Err(err);
                        }
                        RetryDecision::RetryAfter(delay) => {
                            let transfer_id = self
                                .state
                                .as_ref()
                                .map(|s| s.offer.transfer_id.clone())
                                .unwrap_or_default();
                            emit(
                                &self.events,
                                TransferEvent::Retrying {
                                    transfer_id,
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
        let offer = match recv_frame(channel, &self.cancel).await?.header {
            FrameHeader::Offer(offer) => offer,
            FrameHeader::Abort(abort) => return Err(TransferError::Aborted(abort.reason)),
            other => {
                return Err(TransferError::UnexpectedFrame {
                    expected: "offer",
                    got: other.kind(),
                });
            }
        };
        self.take_offer(channel, offer).await?;
        let Some(state) = self.state.as_mut() else {
            return Err(TransferError::ProtocolViolation(
                "transfer state missing after offer".into(),
            ));
        };

        let resume_from = state.assembler.received_bytes();
        send_frame(
            channel,
            Frame::control(FrameHeader::Accept(TransferAccept {
                transfer_id: state.offer.transfer_id.clone(),
                resume_from,
            })),
        )
        .await?;
        if resume_from > 0 {
            debug!(
                transfer = %state.offer.transfer_id,
                resume_from,
                "accepting resumed transfer"
            );
        }
        state.session.set_transferred(resume_from);
        state.session.start();
        if !self.started_emitted {
            self.started_emitted = true;
            emit(
                &self.events,
                TransferEvent::Started {
                    transfer_id: state.offer.transfer_id.clone(),
                    file_name: state.offer.file_name.clone(),
                    total_bytes: state.offer.file_size,
                },
            )
            .await;
        }

        if state.assembler.is_complete() {
            // Nothing left to move; the peer just needs the confirmation it
            // missed.
            let complete = TransferComplete {
                transfer_id: state.offer.transfer_id.clone(),
                received_bytes: state.assembler.received_bytes(),
                checksum: state.assembler.checksum(),
            };
            send_frame(channel, Frame::control(FrameHeader::Complete(complete))).await?;
            return Ok(());
        }

        loop {
            let frame = recv_frame(channel, &self.cancel).await?;
            match frame.header {
                FrameHeader::Chunk(header) => {
                    if header.transfer_id != state.offer.transfer_id {
                        return Err(TransferError::ProtocolViolation(format!(
                            "chunk for foreign transfer {}",
                            header.transfer_id
                        )));
                    }
                    if self.options.verify_checksums
                        && !header.checksum.is_empty()
                        && checksum_bytes(&frame.payload) != header.checksum
                    {
                        return Err(TransferError::ChecksumMismatch);
                    }

                    match state.assembler.push(header.seq, &frame.payload)? {
                        PushOutcome::Appended => {
                            state.session.add_progress(frame.payload.len() as u64);
                            trace!(
                                transfer = %state.offer.transfer_id,
                                seq = header.seq,
                                len = frame.payload.len(),
                                "chunk stored"
                            );
                            Self::ack(channel, state, header.seq).await?;
                            emit_progress(
                                &self.events,
                                TransferEvent::Progress {
                                    transfer_id: state.offer.transfer_id.clone(),
                                    transferred_bytes: state.assembler.received_bytes(),
                                    total_bytes: state.offer.file_size,
                                    percent: state.assembler.percent(),
                                },
                            );
                        }
                        PushOutcome::Completed => {
                            state.session.add_progress(frame.payload.len() as u64);
                            Self::ack(channel, state, header.seq).await?;
                            emit_progress(
                                &self.events,
                                TransferEvent::Progress {
                                    transfer_id: state.offer.transfer_id.clone(),
                                    transferred_bytes: state.assembler.received_bytes(),
                                    total_bytes: state.offer.file_size,
                                    percent: state.assembler.percent(),
                                },
                            );

                            if self.options.verify_checksums
                                && !state.offer.checksum.is_empty()
                                && state.assembler.checksum() != state.offer.checksum
                            {
                                return Err(TransferError::ChecksumMismatch);
                            }

                            let complete = TransferComplete {
                                transfer_id: state.offer.transfer_id.clone(),
                                received_bytes: state.assembler.received_bytes(),
                                checksum: state.assembler.checksum(),
                            };
                            send_frame(channel, Frame::control(FrameHeader::Complete(complete)))
                                .await?;
                            return Ok(());
                        }
                        PushOutcome::Duplicate => {
                            debug!(
                                transfer = %state.offer.transfer_id,
                                seq = header.seq,
                                "duplicate chunk re-acked"
                            );
                            Self::ack(channel, state, header.seq).await?;
                        }
                        PushOutcome::Stray => {
                            trace!(
                                transfer = %state.offer.transfer_id,
                                seq = header.seq,
                                "stray chunk after completion"
                            );
                        }
                    }
                }
                FrameHeader::Abort(abort) => return Err(TransferError::Aborted(abort.reason)),
                other => {
                    return Err(TransferError::UnexpectedFrame {
                        expected: "chunk",
                        got: other.kind(),
                    });
                }
            }
        }
    }

    /// Vets a fresh offer, or checks a re-offer against the transfer in
    /// progress.
    async fn take_offer<C: MessageChannel>(
        &mut self,
        channel: &C,
        offer: TransferOffer,
    ) -> Result<(), TransferError> {
        match &self.state {
            None => {
                if let Err(e) = validate_offer(&offer, self.options.max_file_size) {
                    let reason = e.to_string();
                    warn!(transfer = %offer.transfer_id, %reason, "rejecting offer");
                    let reject = TransferReject {
                        transfer_id: offer.transfer_id.clone(),
                        reason,
                    };
                    let _ = send_frame(channel, Frame::control(FrameHeader::Reject(reject))).await;
                    return Err(e);
                }
                let session = Arc::new(TransferSession::new(
                    offer.transfer_id.clone(),
                    offer.file_name.clone(),
                    offer.file_size,
                ));
                debug!(
                    transfer = %offer.transfer_id,
                    file = %offer.file_name,
                    size = offer.file_size,
                    "offer accepted"
                );
                self.state = Some(ReceiverState {
                    assembler: ChunkAssembler::new(offer.file_size, offer.chunk_size),
                    session,
                    offer,
                });
                Ok(())
            }
            Some(state) => {
                if state.offer.transfer_id != offer.transfer_id
                    || state.offer.file_size != offer.file_size
                    || state.offer.chunk_size != offer.chunk_size
                    || state.offer.checksum != offer.checksum
                {
                    return Err(TransferError::ProtocolViolation(
                        "re-offer does not match the transfer in progress".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    async fn ack<C: MessageChannel>(
        channel: &C,
        state: &ReceiverState,
        seq: u64,
    ) -> Result<(), TransferError> {
        let ack = ChunkAck {
            transfer_id: state.offer.transfer_id.clone(),
            seq,
            received_bytes: state.assembler.received_bytes(),
        };
        send_frame(channel, Frame::control(FrameHeader::Ack(ack))).await
    }

    /// Session and event bookkeeping for a failed `run`.
    async fn note_failure<C: MessageChannel>(&self, channel: &C, error: &TransferError) {
        match error {
            TransferError::Channel(ChannelError::Cancelled) => {
                if let (Some(state), true) = (&self.state, channel.is_open()) {
                    let abort = TransferAbort {
                        transfer_id: state.offer.transfer_id.clone(),
                        reason: "cancelled".into(),
                    };
                    let _ = send_frame(channel, Frame::control(FrameHeader::Abort(abort))).await;
                    // Flush the abort before the channel goes away.
                    channel.close().await;
                }
                self.settle_terminal(error).await;
            }
            e if e.is_transient() => {
                warn!(error = %e, "transfer attempt failed");
            }
            TransferError::ChecksumMismatch
            | TransferError::SequenceGap { .. }
            | TransferError::ProtocolViolation(_)
            | TransferError::UnexpectedFrame { .. } => {
                if let (Some(state), true) = (&self.state, channel.is_open()) {
                    let abort = TransferAbort {
                        transfer_id: state.offer.transfer_id.clone(),
                        reason: error.to_string(),
                    };
                    let _ = send_frame(channel, Frame::control(FrameHeader::Abort(abort))).await;
                    channel.close().await;
                }
                self.settle_terminal(error).await;
            }
            _ => self.settle_terminal(error).await,
        }
    }

    /// Marks the session terminal and emits the matching lifecycle event.
    async fn settle_terminal(&self, error: &TransferError) {
        let transfer_id = self
            .state
            .as_ref()
            .map(|s| s.offer.transfer_id.clone())
            .unwrap_or_default();
        match error {
            TransferError::Channel(ChannelError::Cancelled) => {
                if let Some(state) = &self.state {
                    state.session.cancel();
                }
                emit(&self.events, TransferEvent::Cancelled { transfer_id }).await;
            }
            _ => {
                if let Some(state) = &self.state {
                    state.session.fail(&error.to_string());
                }
                warn!(transfer = %transfer_id, error = %error, "transfer failed");
                emit(
                    &self.events,
                    TransferEvent::Failed {
                        transfer_id,
                        error: error.to_string(),
                    },
                )
                .await;
            }
        }
    }

    /// Assembled file bytes, once the transfer is complete.
    pub fn into_payload(self) -> Result<Vec<u8>, TransferError> {
        match self.state {
            Some(state) if state.assembler.is_complete() => Ok(state.assembler.into_payload()),
            Some(state) => Err(TransferError::Incomplete {
                received: state.assembler.received_bytes(),
                expected: state.assembler.expected_bytes(),
            }),
            None => Err(TransferError::Incomplete {
                received: 0,
                expected: 0,
            }),
        }
    }

    /// Writes the assembled file into `dir` under its offered name and
    /// returns the full path.
    pub async fn save_to_dir(&self, dir: &Path) -> Result<PathBuf, TransferError> {
        let Some(state) = &self.state else {
            return Err(TransferError::Incomplete {
                received: 0,
                expected: 0,
            });
        };
        if !state.assembler.is_complete() {
            return Err(TransferError::Incomplete {
                received: state.assembler.received_bytes(),
                expected: state.assembler.expected_bytes(),
            });
        }
        let path = dir.join(&state.offer.file_name);
        tokio::fs::write(&path, state.assembler.payload()).await?;
        info!(path = %path.display(), "file saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use linkdrop_channel::MemoryChannel;
    use linkdrop_channel::memory::pair;
    use linkdrop_protocol::ChunkHeader;

    use crate::events::event_stream;

    fn offer_frame(id: &str, file_size: u64, chunk_size: u32, checksum: &str) -> Vec<u8> {
        Frame::control(FrameHeader::Offer(TransferOffer {
            transfer_id: id.into(),
            file_name: "notes.txt".into(),
            file_size,
            mime_type: "text/plain".into(),
            chunk_size,
            checksum: checksum.into(),
            protocol_version: 1,
        }))
        .encode()
        .unwrap()
    }

    fn chunk_frame(id: &str, seq: u64, offset: u64, data: &[u8]) -> Vec<u8> {
        Frame::chunk(
            ChunkHeader {
                transfer_id: id.into(),
                seq,
                offset,
                checksum: checksum_bytes(data),
            },
            data.to_vec(),
        )
        .encode()
        .unwrap()
    }

    async fn next_header(channel: &MemoryChannel) -> FrameHeader {
        let bytes = channel.recv().await.unwrap().unwrap();
        Frame::decode(&bytes).unwrap().header
    }

    fn fresh_receiver() -> (ChunkReceiver, tokio::sync::mpsc::Receiver<TransferEvent>) {
        let (events, rx) = event_stream();
        (
            ChunkReceiver::new(ReceiveOptions::default(), events, CancellationToken::new()),
            rx,
        )
    }

    /// Reads the peer side until the chunk carrying `expected_bytes` is
    /// acknowledged, then closes the channel under the receiver.
    async fn close_after_ack(remote: MemoryChannel, expected_bytes: u64) {
        loop {
            let bytes = remote.recv().await.unwrap().unwrap();
            if let FrameHeader::Ack(ack) = Frame::decode(&bytes).unwrap().header {
                assert_eq!(ack.received_bytes, expected_bytes);
                break;
            }
        }
        remote.close().await;
    }

    #[tokio::test]
    async fn assembles_and_confirms_a_transfer() {
        let (mut receiver, mut events) = fresh_receiver();
        let (local, remote) = pair();

        remote.send(offer_frame("t1", 10, 4, "")).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();
        remote.send(chunk_frame("t1", 1, 4, b"4567")).await.unwrap();
        remote.send(chunk_frame("t1", 2, 8, b"89")).await.unwrap();

        receiver.run(&local).await.unwrap();

        assert!(matches!(
            next_header(&remote).await,
            FrameHeader::Accept(TransferAccept { resume_from: 0, .. })
        ));
        for expected in [4u64, 8, 10] {
            match next_header(&remote).await {
                FrameHeader::Ack(ack) => assert_eq!(ack.received_bytes, expected),
                other => panic!("expected ack, got {other:?}"),
            }
        }
        match next_header(&remote).await {
            FrameHeader::Complete(complete) => {
                assert_eq!(complete.received_bytes, 10);
                assert_eq!(complete.checksum, checksum_bytes(b"0123456789"));
            }
            other => panic!("expected complete, got {other:?}"),
        }

        assert_eq!(
            receiver.session().unwrap().status(),
            crate::TransferStatus::Completed
        );
        assert!(matches!(
            events.recv().await,
            Some(TransferEvent::Started { .. })
        ));
        assert_eq!(receiver.into_payload().unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn oversized_offer_is_rejected_with_reason() {
        let (events, _rx) = event_stream();
        let options = ReceiveOptions {
            max_file_size: 100,
            ..ReceiveOptions::default()
        };
        let mut receiver = ChunkReceiver::new(options, events, CancellationToken::new());
        let (local, remote) = pair();

        remote.send(offer_frame("t1", 101, 4, "")).await.unwrap();

        let err = receiver.run(&local).await.unwrap_err();
        assert!(matches!(err, TransferError::FileTooLarge { .. }));

        match next_header(&remote).await {
            FrameHeader::Reject(reject) => assert!(reject.reason.contains("exceeds")),
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_chunk_is_reacked() {
        let (mut receiver, _events) = fresh_receiver();
        let (local, remote) = pair();

        remote.send(offer_frame("t1", 8, 4, "")).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();
        remote.send(chunk_frame("t1", 1, 4, b"4567")).await.unwrap();

        receiver.run(&local).await.unwrap();

        let _accept = next_header(&remote).await;
        let acked: Vec<u64> = [
            next_header(&remote).await,
            next_header(&remote).await,
            next_header(&remote).await,
        ]
        .into_iter()
        .map(|header| match header {
            FrameHeader::Ack(ack) => ack.received_bytes,
            other => panic!("expected ack, got {other:?}"),
        })
        .collect();
        // The duplicate repeats the running total instead of growing it.
        assert_eq!(acked, vec![4, 4, 8]);
    }

    #[tokio::test]
    async fn sequence_gap_aborts_the_transfer() {
        let (mut receiver, _events) = fresh_receiver();
        let (local, remote) = pair();

        remote.send(offer_frame("t1", 12, 4, "")).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();
        remote.send(chunk_frame("t1", 2, 8, b"89ab")).await.unwrap();

        let err = receiver.run(&local).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::SequenceGap { expected: 1, got: 2 }
        ));
        assert_eq!(
            receiver.session().unwrap().status(),
            crate::TransferStatus::Failed
        );

        // Accept, one ack, then the abort that reports the gap.
        let _accept = next_header(&remote).await;
        let _ack = next_header(&remote).await;
        match next_header(&remote).await {
            FrameHeader::Abort(abort) => assert!(abort.reason.contains("sequence gap")),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn corrupt_chunk_fails_the_transfer() {
        let (mut receiver, _events) = fresh_receiver();
        let (local, remote) = pair();

        remote.send(offer_frame("t1", 4, 4, "")).await.unwrap();
        let lying = Frame::chunk(
            ChunkHeader {
                transfer_id: "t1".into(),
                seq: 0,
                offset: 0,
                checksum: checksum_bytes(b"good"),
            },
            b"evil".to_vec(),
        )
        .encode()
        .unwrap();
        remote.send(lying).await.unwrap();

        let err = receiver.run(&local).await.unwrap_err();
        assert!(matches!(err, TransferError::ChecksumMismatch));
    }

    #[tokio::test]
    async fn wrong_file_checksum_fails_at_completion() {
        let (mut receiver, _events) = fresh_receiver();
        let (local, remote) = pair();

        let wrong = checksum_bytes(b"different bytes");
        remote.send(offer_frame("t1", 4, 4, &wrong)).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();

        let err = receiver.run(&local).await.unwrap_err();
        assert!(matches!(err, TransferError::ChecksumMismatch));
    }

    #[tokio::test]
    async fn resumes_on_a_fresh_channel() {
        let (mut receiver, mut events) = fresh_receiver();

        // First channel dies after one chunk lands.
        let (local, remote) = pair();
        remote.send(offer_frame("t1", 10, 4, "")).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();
        let peer = tokio::spawn(close_after_ack(remote, 4));

        let err = receiver.run(&local).await.unwrap_err();
        assert!(err.is_transient());
        assert!(receiver.session().unwrap().is_active());
        peer.await.unwrap();

        // The peer reconnects and re-offers; the accept asks for the rest.
        let (local, remote) = pair();
        remote.send(offer_frame("t1", 10, 4, "")).await.unwrap();
        remote.send(chunk_frame("t1", 1, 4, b"4567")).await.unwrap();
        remote.send(chunk_frame("t1", 2, 8, b"89")).await.unwrap();

        receiver.run(&local).await.unwrap();

        match next_header(&remote).await {
            FrameHeader::Accept(accept) => assert_eq!(accept.resume_from, 4),
            other => panic!("expected accept, got {other:?}"),
        }

        // One Started for the whole transfer, both channels included.
        let mut started = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TransferEvent::Started { .. }) {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(receiver.into_payload().unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn mismatched_reoffer_is_refused() {
        let (mut receiver, _events) = fresh_receiver();

        // The offer is consumed, then the channel dies.
        let (local, remote) = pair();
        remote.send(offer_frame("t1", 10, 4, "")).await.unwrap();
        remote.close().await;
        let err = receiver.run(&local).await.unwrap_err();
        assert!(err.is_transient());

        let (local, remote) = pair();
        remote.send(offer_frame("t1", 999, 4, "")).await.unwrap();
        let err = receiver.run(&local).await.unwrap_err();
        assert!(matches!(err, TransferError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn reoffer_after_completion_reconfirms() {
        let (mut receiver, mut events) = fresh_receiver();

        let (local, remote) = pair();
        remote.send(offer_frame("t1", 4, 4, "")).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();
        receiver.run(&local).await.unwrap();

        // The sender never saw the confirmation and starts over.
        let (local, remote) = pair();
        remote.send(offer_frame("t1", 4, 4, "")).await.unwrap();
        receiver.run(&local).await.unwrap();

        match next_header(&remote).await {
            FrameHeader::Accept(accept) => assert_eq!(accept.resume_from, 4),
            other => panic!("expected accept, got {other:?}"),
        }
        assert!(matches!(
            next_header(&remote).await,
            FrameHeader::Complete(_)
        ));

        // Completion fired exactly once across both runs.
        let mut completions = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TransferEvent::Completed { .. }) {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn empty_file_completes_without_chunks() {
        let (mut receiver, _events) = fresh_receiver();
        let (local, remote) = pair();

        remote.send(offer_frame("t1", 0, 4, "")).await.unwrap();
        receiver.run(&local).await.unwrap();

        let _accept = next_header(&remote).await;
        match next_header(&remote).await {
            FrameHeader::Complete(complete) => assert_eq!(complete.received_bytes, 0),
            other => panic!("expected complete, got {other:?}"),
        }
        assert_eq!(receiver.into_payload().unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn saves_the_assembled_file() {
        let (mut receiver, _events) = fresh_receiver();
        let (local, remote) = pair();

        remote.send(offer_frame("t1", 5, 4, "")).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"hell")).await.unwrap();
        remote.send(chunk_frame("t1", 1, 4, b"o")).await.unwrap();
        receiver.run(&local).await.unwrap();

        let dir = TempDir::new().unwrap();
        let path = receiver.save_to_dir(dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "notes.txt");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn incomplete_payload_is_withheld() {
        let (mut receiver, _events) = fresh_receiver();

        let (local, remote) = pair();
        remote.send(offer_frame("t1", 10, 4, "")).await.unwrap();
        remote.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();
        let peer = tokio::spawn(close_after_ack(remote, 4));
        let _ = receiver.run(&local).await;
        peer.await.unwrap();

        let dir = TempDir::new().unwrap();
        let err = receiver.save_to_dir(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Incomplete {
                received: 4,
                expected: 10
            }
        ));
        let err = receiver.into_payload().unwrap_err();
        assert!(matches!(err, TransferError::Incomplete { .. }));
    }

    #[tokio::test]
    async fn recovery_during_backoff_rearms_the_policy() {
        let (mut receiver, mut events) = fresh_receiver();

        // Two channels die before the offer arrives; the second comes back
        // through `reopened` instead of a redial. The third carries the
        // transfer home.
        let (first, first_peer) = pair();
        let (standby, standby_peer) = pair();
        let (last, last_peer) = pair();
        drop(first_peer);
        drop(standby_peer);
        last_peer.send(offer_frame("t1", 8, 4, "")).await.unwrap();
        last_peer.send(chunk_frame("t1", 0, 0, b"0123")).await.unwrap();
        last_peer.send(chunk_frame("t1", 1, 4, b"4567")).await.unwrap();

        struct FlakyLink {
            dials: Vec<MemoryChannel>,
            standby: Option<MemoryChannel>,
        }
        impl Connector for FlakyLink {
            type Channel = MemoryChannel;
            async fn connect(&mut self) -> Result<Self::Channel, ChannelError> {
                assert!(!self.dials.is_empty(), "dialed more times than scripted");
                Ok(self.dials.remove(0))
            }
            fn reopened(&mut self) -> Option<Self::Channel> {
                self.standby.take()
            }
        }
        let mut connector = FlakyLink {
            dials: vec![first, last],
            standby: Some(standby),
        };

        // One retry per outage suffices only because the recovered channel
        // resets the counter; otherwise the second drop exhausts the policy.
        let policy = RetryPolicy {
            max_retries: 1,
            delay_step: std::time::Duration::from_millis(1),
        };
        receiver.run_with_retry(&mut connector, policy).await.unwrap();

        // Each outage was the first of its streak.
        let mut retry_attempts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransferEvent::Retrying { attempt, .. } = event {
                retry_attempts.push(attempt);
            }
        }
        assert_eq!(retry_attempts, vec![1, 1]);
        assert_eq!(receiver.into_payload().unwrap(), b"01234567");
    }
}
