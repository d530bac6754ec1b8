fn main() {
    println!("Run `cargo test -p linkdrop-e2e` to execute end-to-end transfer tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use linkdrop_channel::{
        ChannelError, MemoryChannel, MessageChannel, TcpChannel, TcpChannelListener, memory,
    };
    use linkdrop_protocol::{
        ChunkAck, Frame, FrameHeader, TransferAbort, TransferAccept, TransferComplete,
        TransferOffer,
    };
    use linkdrop_signaling::{
        ConnectionDescriptor, IceCandidate, MagnetLink, SessionDescription, ShareLink,
        ShareTarget, decode_compact, decode_descriptor, encode_compact, encode_descriptor,
        parse_share_link,
    };
    use linkdrop_store::{ShareStore, StoreError};
    use linkdrop_transfer::{
        ChunkReceiver, ChunkSender, Connector, ReceiveOptions, RetryPolicy, SendOptions,
        TransferError, TransferEvent, TransferStatus, event_stream,
    };

    // ---- helpers ----

    /// Writes a fixture file and returns its path.
    fn fixture(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Deterministic non-repeating payload bytes.
    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn sender_for(
        path: &Path,
        options: SendOptions,
        cancel: CancellationToken,
    ) -> (ChunkSender, mpsc::Receiver<TransferEvent>) {
        let (events, rx) = event_stream();
        let sender = ChunkSender::new(path, options, events, cancel).await.unwrap();
        (sender, rx)
    }

    fn receiver_for(cancel: CancellationToken) -> (ChunkReceiver, mpsc::Receiver<TransferEvent>) {
        let (events, rx) = event_stream();
        let receiver = ChunkReceiver::new(ReceiveOptions::default(), events, cancel);
        (receiver, rx)
    }

    fn drain_events(rx: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count_started(events: &[TransferEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Started { .. }))
            .count()
    }

    fn count_completed(events: &[TransferEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Completed { .. }))
            .count()
    }

    async fn read_frame(channel: &MemoryChannel) -> Frame {
        let message = channel.recv().await.unwrap().expect("peer closed early");
        Frame::decode(&message).unwrap()
    }

    async fn send_control(channel: &MemoryChannel, header: FrameHeader) {
        let frame = Frame::control(header);
        channel.send(frame.encode().unwrap()).await.unwrap();
    }

    /// Forwards frames between two channel halves, cutting the link after
    /// `cut_after_chunks` chunk frames have crossed it.
    async fn proxy(a: MemoryChannel, b: MemoryChannel, cut_after_chunks: usize) {
        let mut chunks = 0;
        loop {
            tokio::select! {
                message = a.recv() => match message {
                    Ok(Some(message)) => {
                        let is_chunk = matches!(
                            Frame::decode(&message),
                            Ok(frame) if matches!(frame.header, FrameHeader::Chunk(_))
                        );
                        if b.send(message).await.is_err() {
                            break;
                        }
                        if is_chunk {
                            chunks += 1;
                            if chunks >= cut_after_chunks {
                                break;
                            }
                        }
                    }
                    _ => break,
                },
                message = b.recv() => match message {
                    Ok(Some(message)) => {
                        if a.send(message).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                },
            }
        }
        a.close().await;
        b.close().await;
    }

    /// Hands out scripted dial results, one per connect call.
    enum Dial {
        Fail,
        Channel(MemoryChannel),
    }

    struct QueueConnector {
        script: VecDeque<Dial>,
    }

    impl Connector for QueueConnector {
        type Channel = MemoryChannel;

        async fn connect(&mut self) -> Result<MemoryChannel, ChannelError> {
            match self.script.pop_front() {
                Some(Dial::Channel(channel)) => Ok(channel),
                Some(Dial::Fail) | None => Err(ChannelError::Timeout),
            }
        }
    }

    // ---- full transfers ----

    #[tokio::test]
    async fn round_trip_over_a_memory_channel() {
        let dir = TempDir::new().unwrap();
        let bytes = patterned(32769);
        let path = fixture(&dir, "payload.txt", &bytes);

        let cancel = CancellationToken::new();
        let (mut sender, mut sender_rx) =
            sender_for(&path, SendOptions::default(), cancel.clone()).await;
        let (mut receiver, mut receiver_rx) = receiver_for(cancel);

        let (local, remote) = memory::pair();
        let (sent, received) = tokio::join!(sender.run(&local), receiver.run(&remote));
        sent.unwrap();
        received.unwrap();

        assert_eq!(sender.session().status(), TransferStatus::Completed);
        let session = receiver.session().unwrap();
        assert_eq!(session.status(), TransferStatus::Completed);
        assert_eq!(session.transferred_bytes(), 32769);

        let sender_events = drain_events(&mut sender_rx);
        assert!(matches!(sender_events.first(), Some(TransferEvent::Started { .. })));
        assert!(matches!(sender_events.last(), Some(TransferEvent::Completed { .. })));
        let mut last_percent = 0.0;
        for event in &sender_events {
            if let TransferEvent::Progress { percent, .. } = event {
                assert!(*percent >= last_percent);
                assert!(*percent <= 100.0);
                last_percent = *percent;
            }
        }

        let receiver_events = drain_events(&mut receiver_rx);
        assert_eq!(count_started(&receiver_events), 1);
        assert_eq!(count_completed(&receiver_events), 1);

        assert_eq!(receiver.into_payload().unwrap(), bytes);
    }

    #[tokio::test]
    async fn sender_splits_the_file_on_the_wire() {
        let dir = TempDir::new().unwrap();
        let bytes = patterned(32769);
        let path = fixture(&dir, "payload.txt", &bytes);

        let cancel = CancellationToken::new();
        let (mut sender, _rx) = sender_for(&path, SendOptions::default(), cancel).await;

        let (local, remote) = memory::pair();
        let run = tokio::spawn(async move {
            let result = sender.run(&local).await;
            (sender, result)
        });

        let offer = match read_frame(&remote).await.header {
            FrameHeader::Offer(offer) => offer,
            other => panic!("expected offer, got {}", other.kind()),
        };
        assert_eq!(offer.file_name, "payload.txt");
        assert_eq!(offer.file_size, 32769);
        assert_eq!(offer.chunk_size, 16384);
        assert_eq!(offer.protocol_version, 1);
        assert!(!offer.checksum.is_empty());

        send_control(
            &remote,
            FrameHeader::Accept(TransferAccept {
                transfer_id: offer.transfer_id.clone(),
                resume_from: 0,
            }),
        )
        .await;

        let mut reassembled = Vec::new();
        for (seq, offset, len) in [(0u64, 0u64, 16384usize), (1, 16384, 16384), (2, 32768, 1)] {
            let frame = read_frame(&remote).await;
            let header = match frame.header {
                FrameHeader::Chunk(header) => header,
                other => panic!("expected chunk, got {}", other.kind()),
            };
            assert_eq!(header.seq, seq);
            assert_eq!(header.offset, offset);
            assert_eq!(frame.payload.len(), len);
            reassembled.extend_from_slice(&frame.payload);

            send_control(
                &remote,
                FrameHeader::Ack(ChunkAck {
                    transfer_id: offer.transfer_id.clone(),
                    seq,
                    received_bytes: offset + len as u64,
                }),
            )
            .await;
        }
        assert_eq!(reassembled, bytes);

        send_control(
            &remote,
            FrameHeader::Complete(TransferComplete {
                transfer_id: offer.transfer_id.clone(),
                received_bytes: 32769,
                checksum: String::new(),
            }),
        )
        .await;

        let (sender, result) = run.await.unwrap();
        result.unwrap();
        assert_eq!(sender.session().status(), TransferStatus::Completed);
        assert_eq!(sender.session().acked_bytes(), 32769);
    }

    #[tokio::test]
    async fn empty_file_transfers_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "empty.txt", b"");

        let cancel = CancellationToken::new();
        let (mut sender, _sender_rx) =
            sender_for(&path, SendOptions::default(), cancel.clone()).await;
        let (mut receiver, mut receiver_rx) = receiver_for(cancel);

        let (local, remote) = memory::pair();
        let (sent, received) = tokio::join!(sender.run(&local), receiver.run(&remote));
        sent.unwrap();
        received.unwrap();

        let events = drain_events(&mut receiver_rx);
        assert_eq!(count_started(&events), 1);
        assert_eq!(count_completed(&events), 1);
        assert!(receiver.into_payload().unwrap().is_empty());
    }

    #[tokio::test]
    async fn round_trip_over_a_tcp_channel() {
        let dir = TempDir::new().unwrap();
        let bytes = patterned(100_000);
        let path = fixture(&dir, "payload.txt", &bytes);

        let cancel = CancellationToken::new();
        let listener = TcpChannelListener::bind(cancel.clone()).await.unwrap();
        let info = listener.info();
        let addr = SocketAddr::from(([127, 0, 0, 1], info.port));

        let (mut receiver, _receiver_rx) = receiver_for(cancel.clone());
        let receive = tokio::spawn(async move {
            let channel = listener.accept().await.unwrap();
            let result = receiver.run(&channel).await;
            channel.close().await;
            (receiver, result)
        });

        let channel = TcpChannel::connect(addr, &info.token, cancel.clone())
            .await
            .unwrap();
        let (mut sender, _sender_rx) =
            sender_for(&path, SendOptions::default(), cancel).await;
        sender.run(&channel).await.unwrap();
        channel.close().await;

        let (receiver, result) = receive.await.unwrap();
        result.unwrap();
        assert_eq!(sender.session().status(), TransferStatus::Completed);
        assert_eq!(receiver.into_payload().unwrap(), bytes);
    }

    #[tokio::test]
    async fn received_file_lands_on_disk() {
        let dir = TempDir::new().unwrap();
        let bytes = patterned(5000);
        let path = fixture(&dir, "report.pdf", &bytes);

        let cancel = CancellationToken::new();
        let (mut sender, _sender_rx) =
            sender_for(&path, SendOptions::default(), cancel.clone()).await;
        let (mut receiver, _receiver_rx) = receiver_for(cancel);

        let (local, remote) = memory::pair();
        let (sent, received) = tokio::join!(sender.run(&local), receiver.run(&remote));
        sent.unwrap();
        received.unwrap();

        let out_dir = TempDir::new().unwrap();
        let saved = receiver.save_to_dir(out_dir.path()).await.unwrap();
        assert_eq!(saved.file_name().unwrap(), "report.pdf");
        assert_eq!(std::fs::read(&saved).unwrap(), bytes);
    }

    // ---- interruption and recovery ----

    #[tokio::test]
    async fn interrupted_transfer_resumes_on_a_new_channel() {
        let dir = TempDir::new().unwrap();
        let bytes = patterned(32769);
        let path = fixture(&dir, "payload.txt", &bytes);

        let cancel = CancellationToken::new();
        let (mut sender, mut sender_rx) =
            sender_for(&path, SendOptions::default(), cancel.clone()).await;
        let (mut receiver, mut receiver_rx) = receiver_for(cancel);

        // First channel dies after two of the three chunks cross it.
        let (sender_half, proxy_a) = memory::pair();
        let (receiver_half, proxy_b) = memory::pair();
        let link = tokio::spawn(proxy(proxy_a, proxy_b, 2));

        let (sent, received) =
            tokio::join!(sender.run(&sender_half), receiver.run(&receiver_half));
        assert!(sent.unwrap_err().is_transient());
        assert!(received.unwrap_err().is_transient());
        link.await.unwrap();

        // Both sessions survive the drop and accept a fresh channel.
        assert!(sender.session().is_active());
        assert!(receiver.session().unwrap().is_active());

        let (local, remote) = memory::pair();
        let (sent, received) = tokio::join!(sender.run(&local), receiver.run(&remote));
        sent.unwrap();
        received.unwrap();

        assert_eq!(sender.session().status(), TransferStatus::Completed);
        assert_eq!(sender.session().acked_bytes(), 32769);

        let sender_events = drain_events(&mut sender_rx);
        assert_eq!(count_started(&sender_events), 1);
        assert_eq!(count_completed(&sender_events), 1);
        let receiver_events = drain_events(&mut receiver_rx);
        assert_eq!(count_started(&receiver_events), 1);
        assert_eq!(count_completed(&receiver_events), 1);

        assert_eq!(receiver.into_payload().unwrap(), bytes);
    }

    #[tokio::test]
    async fn dial_failure_retries_and_recovers() {
        let dir = TempDir::new().unwrap();
        let bytes = patterned(10_000);
        let path = fixture(&dir, "payload.txt", &bytes);

        let cancel = CancellationToken::new();
        let (mut sender, mut sender_rx) =
            sender_for(&path, SendOptions::default(), cancel.clone()).await;
        let (mut receiver, _receiver_rx) = receiver_for(cancel);

        let (local, remote) = memory::pair();
        let receive = tokio::spawn(async move {
            let result = receiver.run(&remote).await;
            (receiver, result)
        });

        let mut connector = QueueConnector {
            script: VecDeque::from([Dial::Fail, Dial::Channel(local)]),
        };
        let policy = RetryPolicy {
            max_retries: 3,
            delay_step: Duration::from_millis(10),
        };
        sender.run_with_retry(&mut connector, policy).await.unwrap();

        let (receiver, result) = receive.await.unwrap();
        result.unwrap();
        assert_eq!(receiver.into_payload().unwrap(), bytes);

        let events = drain_events(&mut sender_rx);
        let retries: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Retrying { attempt, delay, .. } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![(1, Duration::from_millis(10))]);
    }

    #[tokio::test]
    async fn reconnect_resumes_mid_transfer() {
        let dir = TempDir::new().unwrap();
        let bytes = patterned(32769);
        let path = fixture(&dir, "payload.txt", &bytes);

        let cancel = CancellationToken::new();
        let (mut sender, mut sender_rx) =
            sender_for(&path, SendOptions::default(), cancel.clone()).await;
        let (mut receiver, mut receiver_rx) = receiver_for(cancel);

        let (first_sender_half, proxy_a) = memory::pair();
        let (first_receiver_half, proxy_b) = memory::pair();
        let (second_sender_half, second_receiver_half) = memory::pair();
        let link = tokio::spawn(proxy(proxy_a, proxy_b, 2));

        let receive = tokio::spawn(async move {
            let first = receiver.run(&first_receiver_half).await;
            assert!(first.unwrap_err().is_transient());
            let second = receiver.run(&second_receiver_half).await;
            (receiver, second)
        });

        let mut connector = QueueConnector {
            script: VecDeque::from([
                Dial::Channel(first_sender_half),
                Dial::Channel(second_sender_half),
            ]),
        };
        let policy = RetryPolicy {
            max_retries: 3,
            delay_step: Duration::from_millis(10),
        };
        sender.run_with_retry(&mut connector, policy).await.unwrap();
        link.await.unwrap();

        let (receiver, result) = receive.await.unwrap();
        result.unwrap();
        assert_eq!(sender.session().status(), TransferStatus::Completed);
        assert_eq!(receiver.into_payload().unwrap(), bytes);

        let sender_events = drain_events(&mut sender_rx);
        let retry_count = sender_events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Retrying { .. }))
            .count();
        assert_eq!(retry_count, 1);
        let receiver_events = drain_events(&mut receiver_rx);
        assert_eq!(count_started(&receiver_events), 1);
        assert_eq!(count_completed(&receiver_events), 1);
    }

    // ---- cancellation and aborts ----

    #[tokio::test]
    async fn cancellation_reaches_the_peer() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "payload.txt", &patterned(10_000));

        let cancel = CancellationToken::new();
        let (mut sender, mut sender_rx) =
            sender_for(&path, SendOptions::default(), cancel.clone()).await;

        let (local, remote) = memory::pair();
        let run = tokio::spawn(async move {
            let result = sender.run(&local).await;
            (sender, result)
        });

        let offer = match read_frame(&remote).await.header {
            FrameHeader::Offer(offer) => offer,
            other => panic!("expected offer, got {}", other.kind()),
        };
        // Cancel while the sender waits for our accept.
        cancel.cancel();

        let abort = match read_frame(&remote).await.header {
            FrameHeader::Abort(abort) => abort,
            other => panic!("expected abort, got {}", other.kind()),
        };
        assert_eq!(abort.transfer_id, offer.transfer_id);
        assert_eq!(abort.reason, "cancelled");

        let (sender, result) = run.await.unwrap();
        assert!(matches!(
            result,
            Err(TransferError::Channel(ChannelError::Cancelled))
        ));
        assert_eq!(sender.session().status(), TransferStatus::Cancelled);
        assert!(
            drain_events(&mut sender_rx)
                .iter()
                .any(|e| matches!(e, TransferEvent::Cancelled { .. }))
        );
    }

    #[tokio::test]
    async fn abort_fails_the_receiver() {
        let cancel = CancellationToken::new();
        let (mut receiver, mut receiver_rx) = receiver_for(cancel);

        let (local, remote) = memory::pair();
        let run = tokio::spawn(async move {
            let result = receiver.run(&local).await;
            (receiver, result)
        });

        send_control(
            &remote,
            FrameHeader::Offer(TransferOffer {
                transfer_id: "t-abort".into(),
                file_name: "doomed.txt".into(),
                file_size: 100,
                mime_type: "text/plain".into(),
                chunk_size: 16,
                checksum: String::new(),
                protocol_version: 1,
            }),
        )
        .await;
        let accept = read_frame(&remote).await;
        assert!(matches!(accept.header, FrameHeader::Accept(_)));

        send_control(
            &remote,
            FrameHeader::Abort(TransferAbort {
                transfer_id: "t-abort".into(),
                reason: "changed my mind".into(),
            }),
        )
        .await;

        let (receiver, result) = run.await.unwrap();
        assert!(matches!(
            result,
            Err(TransferError::Aborted(reason)) if reason == "changed my mind"
        ));
        assert_eq!(
            receiver.session().unwrap().status(),
            TransferStatus::Failed
        );
        assert!(
            drain_events(&mut receiver_rx)
                .iter()
                .any(|e| matches!(e, TransferEvent::Failed { .. }))
        );
    }

    // ---- share links and signaling ----

    #[test]
    fn stored_file_claims_through_a_share_link() {
        let store = ShareStore::new();
        let bytes = patterned(512);
        let stored = store.insert("photo.png", "image/png", bytes.clone());

        let url = ShareLink::default().file_url(&stored.id);
        let target = parse_share_link(&url).unwrap();
        let id = match target {
            ShareTarget::StoredFile(id) => id,
            other => panic!("unexpected target: {other:?}"),
        };
        assert_eq!(id, stored.id);

        let claimed = store.get(&id).unwrap();
        assert_eq!(claimed.file_name, "photo.png");
        assert_eq!(claimed.mime_type, "image/png");
        assert_eq!(*claimed.data, bytes);
    }

    #[test]
    fn expired_share_link_reports_expired() {
        let store = ShareStore::with_ttl(Duration::ZERO);
        let stored = store.insert("gone.txt", "text/plain", vec![1, 2, 3]);
        std::thread::sleep(Duration::from_millis(5));

        let url = ShareLink::default().file_url(&stored.id);
        let ShareTarget::StoredFile(id) = parse_share_link(&url).unwrap() else {
            panic!("expected stored-file target");
        };
        let err = store.get(&id).unwrap_err();
        assert!(matches!(err, StoreError::Expired(_)));
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn manual_signaling_blobs_ride_share_links() {
        let descriptor = ConnectionDescriptor::new(SessionDescription::offer(
            "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\ns=-\r\n",
        ))
        .with_candidate(IceCandidate {
            candidate: "candidate:1 1 UDP 2122252543 192.168.1.7 51337 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        });

        let blob = encode_descriptor(&descriptor).unwrap();
        let url = ShareLink::default().offer_url(&blob);
        let ShareTarget::Offer(carried) = parse_share_link(&url).unwrap() else {
            panic!("expected offer target");
        };
        assert_eq!(decode_descriptor(&carried).unwrap(), descriptor);

        let answer = SessionDescription::answer("v=0\r\no=- 9021 2 IN IP4 10.0.0.3\r\ns=-\r\n");
        let blob = encode_compact(&answer).unwrap();
        let url = ShareLink::default().answer_url(&blob);
        let ShareTarget::Answer(carried) = parse_share_link(&url).unwrap() else {
            panic!("expected answer target");
        };
        assert_eq!(decode_compact(&carried).unwrap(), answer);
    }

    #[test]
    fn magnet_links_ride_share_links() {
        let magnet = MagnetLink::new("c12fe1c06bba254a9dc9f519b335aa7c1367a88a")
            .unwrap()
            .with_display_name("payload.txt")
            .with_tracker("udp://tracker.example.com:1337/announce");

        let url = ShareLink::default().magnet_url(&magnet.to_uri());
        let ShareTarget::Magnet(uri) = parse_share_link(&url).unwrap() else {
            panic!("expected magnet target");
        };
        let parsed = MagnetLink::parse(&uri).unwrap();
        assert_eq!(parsed, magnet);
    }
}
