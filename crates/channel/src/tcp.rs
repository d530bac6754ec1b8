//! TCP-backed message channel.
//!
//! One side binds an ephemeral listener and publishes its port and token
//! out of band (alongside the signaling blob); the other side connects and
//! authenticates. After the handshake both directions carry length-prefixed
//! messages.
//!
//! # Wire format
//!
//! ```text
//! HANDSHAKE (connector -> listener):     [32 bytes: hex token ASCII]
//! AUTH RESPONSE (listener -> connector): [1 byte: 0x01=OK, 0x00=rejected]
//!
//! PER MESSAGE (either direction):
//!   [4 bytes BE: message_len]
//!   [message_len bytes: message]
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::{DEFAULT_MAX_MESSAGE_LEN, MessageChannel};

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connect and accept.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the authentication handshake.
pub const TCP_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for draining queued messages when closing.
pub const TCP_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Authentication response: accepted.
pub const AUTH_OK: u8 = 0x01;

/// Authentication response: rejected.
pub const AUTH_REJECTED: u8 = 0x00;

/// Token length in hex characters.
pub const TOKEN_LEN: usize = 32;

/// Token length in raw bytes before hex encoding.
const TOKEN_BYTES: usize = 16;

/// Depth of the outbound and inbound message queues, in messages.
const QUEUE_DEPTH: usize = 64;

/// Generates a per-channel CSPRNG token as 32 lowercase hex characters.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time token comparison.
fn validate_token(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in received.bytes().zip(expected.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Handshake info the listening side publishes out of band.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub port: u16,
    pub token: String,
}

/// Ephemeral TCP listener that upgrades exactly one connection into a
/// [`TcpChannel`].
pub struct TcpChannelListener {
    listener: TcpListener,
    token: String,
    cancel: CancellationToken,
}

impl TcpChannelListener {
    /// Binds an ephemeral port and generates the channel token.
    pub async fn bind(cancel: CancellationToken) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind("0.0.0.0:0").await?;
        let port = listener.local_addr()?.port();
        let token = generate_token();

        info!(port, "tcp channel listener bound");

        Ok(TcpChannelListener {
            listener,
            token,
            cancel,
        })
    }

    /// Port and token to hand to the connecting side.
    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            port: self.listener.local_addr().map(|a| a.port()).unwrap_or(0),
            token: self.token.clone(),
        }
    }

    /// Accepts one connection, validates its token, and upgrades it.
    pub async fn accept(self) -> Result<TcpChannel, ChannelError> {
        let TcpChannelListener {
            listener,
            token,
            cancel,
        } = self;

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_CONNECT_TIMEOUT, listener.accept()) => {
                match result {
                    Ok(Ok((stream, addr))) => {
                        info!(%addr, "tcp channel connection accepted");
                        stream
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(ChannelError::Timeout),
                }
            }
        };

        // One connection per listener.
        drop(listener);

        let mut received = [0u8; TOKEN_LEN];
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_AUTH_TIMEOUT, stream.read_exact(&mut received)) => {
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(ChannelError::Timeout),
                }
            }
        }

        let received = std::str::from_utf8(&received).unwrap_or("");
        if !validate_token(received, &token) {
            warn!("tcp channel: invalid token");
            let _ = stream.write_u8(AUTH_REJECTED).await;
            return Err(ChannelError::AuthFailed("invalid token".into()));
        }

        stream.write_u8(AUTH_OK).await?;
        debug!("tcp channel: peer authenticated");

        Ok(TcpChannel::from_stream(stream, &cancel))
    }
}

/// One endpoint of an established TCP message channel.
///
/// Reads and writes run on background pump tasks; the channel handle only
/// talks to their queues, so every method takes `&self`.
pub struct TcpChannel {
    shared: Arc<Shared>,
    /// `None` once `close` has stopped accepting sends.
    outbound: std::sync::Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    inbound: Mutex<mpsc::Receiver<Result<Vec<u8>, ChannelError>>>,
    write_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    peer_addr: Option<SocketAddr>,
    max_message_len: usize,
}

struct Shared {
    /// Bytes accepted by `send` but not yet written to the socket.
    queued: AtomicUsize,
    drained: Notify,
    open: AtomicBool,
    cancel: CancellationToken,
}

impl TcpChannel {
    /// Connects to a listening peer and authenticates with its token.
    pub async fn connect(
        addr: SocketAddr,
        token: &str,
        cancel: CancellationToken,
    ) -> Result<TcpChannel, ChannelError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(addr)) => {
                match result {
                    Ok(Ok(stream)) => {
                        info!(%addr, "tcp channel connected");
                        stream
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(ChannelError::Timeout),
                }
            }
        };

        stream.write_all(token.as_bytes()).await?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_AUTH_TIMEOUT, stream.read_u8()) => {
                match result {
                    Ok(Ok(byte)) => byte,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(ChannelError::Timeout),
                }
            }
        };

        if response != AUTH_OK {
            return Err(ChannelError::AuthFailed("listener rejected token".into()));
        }
        debug!("tcp channel: authenticated");

        Ok(TcpChannel::from_stream(stream, &cancel))
    }

    /// Wraps an authenticated stream and spawns its read and write pumps.
    ///
    /// The channel runs under a child of `parent_cancel`: cancelling the
    /// parent closes the channel, while a transport failure inside the
    /// channel never cancels the caller's token.
    fn from_stream(stream: TcpStream, parent_cancel: &CancellationToken) -> TcpChannel {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::with_capacity(TCP_BUFFER_SIZE, read_half);
        let writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, write_half);

        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let shared = Arc::new(Shared {
            queued: AtomicUsize::new(0),
            drained: Notify::new(),
            open: AtomicBool::new(true),
            cancel: parent_cancel.child_token(),
        });

        let max_message_len = DEFAULT_MAX_MESSAGE_LEN;
        let write_task = tokio::spawn(write_pump(writer, outbound_rx, shared.clone()));
        tokio::spawn(read_pump(reader, inbound_tx, shared.clone(), max_message_len));

        TcpChannel {
            shared,
            outbound: std::sync::Mutex::new(Some(outbound_tx)),
            inbound: Mutex::new(inbound_rx),
            write_task: std::sync::Mutex::new(Some(write_task)),
            peer_addr,
            max_message_len,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl MessageChannel for TcpChannel {
    async fn send(&self, message: Vec<u8>) -> Result<(), ChannelError> {
        if message.len() > self.max_message_len {
            return Err(ChannelError::MessageTooLarge {
                len: message.len(),
                max: self.max_message_len,
            });
        }
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let Some(queue) = self.outbound.lock().unwrap().clone() else {
            return Err(ChannelError::Closed);
        };

        self.shared.queued.fetch_add(message.len(), Ordering::AcqRel);
        if let Err(rejected) = queue.send(message).await {
            self.shared
                .queued
                .fetch_sub(rejected.0.len(), Ordering::AcqRel);
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn buffered_amount(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    async fn wait_buffered_below(&self, threshold: usize) -> Result<(), ChannelError> {
        loop {
            let drained = self.shared.drained.notified();
            if !self.is_open() {
                return Err(ChannelError::Closed);
            }
            if self.buffered_amount() < threshold {
                return Ok(());
            }
            drained.await;
        }
    }

    fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire) && !self.shared.cancel.is_cancelled()
    }

    async fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
        // Dropping the queue handle lets the write pump finish everything
        // `send` already accepted before the socket shuts down.
        drop(self.outbound.lock().unwrap().take());
        let write_task = self.write_task.lock().unwrap().take();
        if let Some(mut task) = write_task {
            if tokio::time::timeout(TCP_CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!("tcp channel: close timed out with messages still queued");
                task.abort();
            }
            self.shared.cancel.cancel();
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::Release);
        self.shared.cancel.cancel();
    }
}

/// Drains the outbound queue onto the socket, one length-prefixed message
/// at a time, flushing per message so a waiting peer sees it promptly.
///
/// The pump ends two ways: the queue closes (a graceful [`MessageChannel::close`],
/// which waits for the backlog to be written) or the cancel token fires (drop
/// or parent cancellation, which abandons whatever is left).
async fn write_pump(
    mut writer: BufWriter<OwnedWriteHalf>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    shared: Arc<Shared>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            result = write_message(&mut writer, &message) => result,
        };

        shared.queued.fetch_sub(message.len(), Ordering::AcqRel);
        shared.drained.notify_waiters();

        if let Err(e) = result {
            warn!(error = %e, "tcp channel: write failed");
            break;
        }
    }

    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
    shared.open.store(false, Ordering::Release);
    shared.drained.notify_waiters();
}

async fn write_message(
    writer: &mut BufWriter<OwnedWriteHalf>,
    message: &[u8],
) -> std::io::Result<()> {
    writer.write_u32(message.len() as u32).await?;
    writer.write_all(message).await?;
    writer.flush().await
}

/// Reads length-prefixed messages off the socket into the inbound queue.
///
/// A clean EOF just closes the queue; a transport error is delivered as the
/// final queue item so `recv` can report it.
async fn read_pump(
    mut reader: BufReader<OwnedReadHalf>,
    inbound: mpsc::Sender<Result<Vec<u8>, ChannelError>>,
    shared: Arc<Shared>,
    max_message_len: usize,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            result = read_message(&mut reader, max_message_len) => result,
        };

        match result {
            Ok(Some(message)) => {
                if inbound.send(Ok(message)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("tcp channel: peer closed");
                break;
            }
            Err(e) => {
                let _ = inbound.send(Err(e)).await;
                break;
            }
        }
    }
    shared.open.store(false, Ordering::Release);
    shared.drained.notify_waiters();
}

async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_message_len: usize,
) -> Result<Option<Vec<u8>>, ChannelError> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > max_message_len {
        return Err(ChannelError::Protocol(format!(
            "inbound message of {len} bytes exceeds limit of {max_message_len}"
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}
