//! Shared transfer session state.

use std::sync::RwLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::progress::percent;

/// Lifecycle of a transfer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Connecting,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Snapshot of a session for UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub transfer_id: String,
    pub status: TransferStatus,
    pub file_name: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Bytes the peer has confirmed receiving.
    pub acked_bytes: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl TransferProgress {
    /// Percentage complete, capped at 100.
    pub fn percent(&self) -> f64 {
        percent(self.transferred_bytes, self.total_bytes)
    }
}

/// Tracks one transfer (thread-safe).
///
/// Both ends keep a session per transfer: the sender counts bytes written
/// to the channel and bytes the peer has acknowledged, the receiver counts
/// bytes accumulated. The session outlives any single channel, which is
/// what makes resume possible.
pub struct TransferSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    id: String,
    file_name: String,
    status: TransferStatus,
    total_bytes: u64,
    transferred_bytes: u64,
    acked_bytes: u64,
    started_at: Option<Instant>,
    updated_at: Instant,
    completed_at: Option<Instant>,
    error: String,
}

impl TransferSession {
    /// Creates a new pending session.
    pub fn new(id: String, file_name: String, total_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                id,
                file_name,
                status: TransferStatus::Pending,
                total_bytes,
                transferred_bytes: 0,
                acked_bytes: 0,
                started_at: None,
                updated_at: Instant::now(),
                completed_at: None,
                error: String::new(),
            }),
        }
    }

    /// Moves the session to `Connecting` while a channel is dialed.
    pub fn connecting(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = TransferStatus::Connecting;
        s.updated_at = Instant::now();
    }

    /// Moves the session to `InProgress`. The start instant is kept from
    /// the first call, so a resumed transfer keeps its original start.
    pub fn start(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = TransferStatus::InProgress;
        let now = Instant::now();
        if s.started_at.is_none() {
            s.started_at = Some(now);
        }
        s.updated_at = now;
    }

    /// Adds transferred bytes.
    pub fn add_progress(&self, bytes: u64) {
        let mut s = self.inner.write().unwrap();
        s.transferred_bytes += bytes;
        s.updated_at = Instant::now();
    }

    /// Positions the transferred counter, for resume.
    pub fn set_transferred(&self, bytes: u64) {
        let mut s = self.inner.write().unwrap();
        s.transferred_bytes = bytes;
        s.updated_at = Instant::now();
    }

    /// Records the peer's confirmed byte count. Never moves backwards.
    pub fn record_ack(&self, acked_bytes: u64) {
        let mut s = self.inner.write().unwrap();
        s.acked_bytes = s.acked_bytes.max(acked_bytes);
        s.updated_at = Instant::now();
    }

    /// Moves the session to `Completed`.
    pub fn complete(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = TransferStatus::Completed;
        let now = Instant::now();
        s.completed_at = Some(now);
        s.updated_at = now;
    }

    /// Records a terminal failure with its error message.
    pub fn fail(&self, err: &str) {
        let mut s = self.inner.write().unwrap();
        s.status = TransferStatus::Failed;
        s.error = err.to_string();
        let now = Instant::now();
        s.completed_at = Some(now);
        s.updated_at = now;
    }

    /// Moves the session to `Cancelled`.
    pub fn cancel(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = TransferStatus::Cancelled;
        let now = Instant::now();
        s.completed_at = Some(now);
        s.updated_at = now;
    }

    /// Returns a snapshot of the current state.
    pub fn progress(&self) -> TransferProgress {
        let s = self.inner.read().unwrap();
        TransferProgress {
            transfer_id: s.id.clone(),
            status: s.status.clone(),
            file_name: s.file_name.clone(),
            total_bytes: s.total_bytes,
            transferred_bytes: s.transferred_bytes,
            acked_bytes: s.acked_bytes,
            error: s.error.clone(),
        }
    }

    /// Returns `true` while the transfer can still make progress.
    pub fn is_active(&self) -> bool {
        let s = self.inner.read().unwrap();
        matches!(
            s.status,
            TransferStatus::Pending | TransferStatus::Connecting | TransferStatus::InProgress
        )
    }

    /// Returns the transfer ID.
    pub fn id(&self) -> String {
        let s = self.inner.read().unwrap();
        s.id.clone()
    }

    /// Returns the offered file name.
    pub fn file_name(&self) -> String {
        let s = self.inner.read().unwrap();
        s.file_name.clone()
    }

    /// Returns the current lifecycle status.
    pub fn status(&self) -> TransferStatus {
        let s = self.inner.read().unwrap();
        s.status.clone()
    }

    /// Total bytes the transfer will move.
    pub fn total_bytes(&self) -> u64 {
        let s = self.inner.read().unwrap();
        s.total_bytes
    }

    /// Bytes moved so far.
    pub fn transferred_bytes(&self) -> u64 {
        let s = self.inner.read().unwrap();
        s.transferred_bytes
    }

    /// Bytes the peer has confirmed.
    pub fn acked_bytes(&self) -> u64 {
        let s = self.inner.read().unwrap();
        s.acked_bytes
    }
}
