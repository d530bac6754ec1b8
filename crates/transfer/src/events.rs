//! Transfer lifecycle events for UIs and logs.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

/// Events emitted while a transfer runs.
///
/// Progress events are delivered best-effort: when the listener lags they
/// are dropped rather than stalling the transfer. Lifecycle events
/// (started, retrying, completed, failed, cancelled) are always delivered
/// while the listener is alive.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Handshake finished; chunks are about to flow.
    Started {
        transfer_id: String,
        file_name: String,
        total_bytes: u64,
    },
    /// Bytes moved. `percent` is capped at 100.
    Progress {
        transfer_id: String,
        transferred_bytes: u64,
        total_bytes: u64,
        percent: f64,
    },
    /// Connection lost; the next attempt starts after `delay`.
    Retrying {
        transfer_id: String,
        attempt: u32,
        delay: Duration,
    },
    Completed {
        transfer_id: String,
        total_bytes: u64,
    },
    Failed {
        transfer_id: String,
        error: String,
    },
    Cancelled {
        transfer_id: String,
    },
}

/// Sending half of a transfer event stream.
pub type EventSender = mpsc::Sender<TransferEvent>;

/// Creates an event stream with a buffer sized for UI consumers.
pub fn event_stream() -> (EventSender, mpsc::Receiver<TransferEvent>) {
    mpsc::channel(64)
}

/// Best-effort delivery for high-frequency progress updates.
pub(crate) fn emit_progress(events: &EventSender, event: TransferEvent) {
    if events.try_send(event).is_err() {
        trace!("progress event dropped: listener busy or gone");
    }
}

/// Delivery for lifecycle events; a dropped listener is not an error.
pub(crate) async fn emit(events: &EventSender, event: TransferEvent) {
    let _ = events.send(event).await;
}
