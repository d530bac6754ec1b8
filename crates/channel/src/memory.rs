//! In-memory channel pair.
//!
//! Both endpoints live in the same process and exchange messages through a
//! pair of shared queues. This is the transport behind same-process demos,
//! and the workhorse of the test suite.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::ChannelError;
use crate::{DEFAULT_MAX_MESSAGE_LEN, MessageChannel};

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Vec<u8>>,
    buffered: usize,
    closed: bool,
}

struct Queue {
    state: Mutex<QueueState>,
    arrived: Notify,
    drained: Notify,
}

impl Queue {
    fn shared() -> Arc<Queue> {
        Arc::new(Queue {
            state: Mutex::new(QueueState::default()),
            arrived: Notify::new(),
            drained: Notify::new(),
        })
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.arrived.notify_waiters();
        self.drained.notify_waiters();
    }
}

/// One endpoint of an in-memory channel pair.
///
/// Dropping an endpoint closes the channel; the peer still drains messages
/// queued before the drop, then sees the close.
pub struct MemoryChannel {
    outbound: Arc<Queue>,
    inbound: Arc<Queue>,
    max_message_len: usize,
}

/// Creates a connected channel pair with the default message limit.
pub fn pair() -> (MemoryChannel, MemoryChannel) {
    pair_with_limit(DEFAULT_MAX_MESSAGE_LEN)
}

/// Creates a connected channel pair with a custom message limit.
pub fn pair_with_limit(max_message_len: usize) -> (MemoryChannel, MemoryChannel) {
    let a_to_b = Queue::shared();
    let b_to_a = Queue::shared();
    (
        MemoryChannel {
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
            max_message_len,
        },
        MemoryChannel {
            outbound: b_to_a,
            inbound: a_to_b,
            max_message_len,
        },
    )
}

impl MessageChannel for MemoryChannel {
    async fn send(&self, message: Vec<u8>) -> Result<(), ChannelError> {
        if message.len() > self.max_message_len {
            return Err(ChannelError::MessageTooLarge {
                len: message.len(),
                max: self.max_message_len,
            });
        }

        {
            let mut state = self.outbound.state.lock().unwrap();
            if state.closed {
                return Err(ChannelError::Closed);
            }
            state.buffered += message.len();
            state.messages.push_back(message);
        }
        self.outbound.arrived.notify_waiters();
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, ChannelError> {
        loop {
            // Register for the wakeup before checking state, so a message
            // arriving in between is not missed.
            let arrived = self.inbound.arrived.notified();
            {
                let mut state = self.inbound.state.lock().unwrap();
                if let Some(message) = state.messages.pop_front() {
                    state.buffered -= message.len();
                    drop(state);
                    self.inbound.drained.notify_waiters();
                    return Ok(Some(message));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            arrived.await;
        }
    }

    fn buffered_amount(&self) -> usize {
        self.outbound.state.lock().unwrap().buffered
    }

    async fn wait_buffered_below(&self, threshold: usize) -> Result<(), ChannelError> {
        loop {
            let drained = self.outbound.drained.notified();
            {
                let state = self.outbound.state.lock().unwrap();
                if state.closed {
                    return Err(ChannelError::Closed);
                }
                if state.buffered < threshold {
                    return Ok(());
                }
            }
            drained.await;
        }
    }

    fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    fn is_open(&self) -> bool {
        !self.outbound.state.lock().unwrap().closed
    }

    async fn close(&self) {
        self.outbound.close();
        self.inbound.close();
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.outbound.close();
        self.inbound.close();
    }
}
