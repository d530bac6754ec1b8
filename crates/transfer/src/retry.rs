//! Linear-backoff retry for channel establishment.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use linkdrop_channel::{ChannelError, MessageChannel};

use crate::TransferError;
use crate::events::{EventSender, TransferEvent, emit};

/// When to give up and how long to wait between attempts.
///
/// The delay grows linearly: attempt `n` waits `n * delay_step`, so 2s,
/// 4s, 6s with the defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n * delay_step`.
    pub delay_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            delay_step: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_step * attempt
    }
}

/// Outcome of recording one failure against a [`RetryState`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    RetryAfter(Duration),
    /// Attempts exhausted.
    GiveUp,
}

/// Counts consecutive failures against a policy.
///
/// The counter resets on success, so a flaky link that recovers between
/// drops starts each outage with all attempts available again.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryState {
            policy,
            attempts: 0,
        }
    }

    /// Consecutive failures recorded since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failure and decides what happens next.
    pub fn record_failure(&mut self) -> RetryDecision {
        if self.attempts >= self.policy.max_retries {
            return RetryDecision::GiveUp;
        }
        self.attempts += 1;
        RetryDecision::RetryAfter(self.policy.delay_for_attempt(self.attempts))
    }

    /// Resets the failure count after a working connection.
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }
}

/// Dials channels for one transfer, attempt after attempt.
pub trait Connector {
    type Channel: MessageChannel;

    /// Establishes a fresh channel to the peer.
    fn connect(&mut self) -> impl Future<Output = Result<Self::Channel, ChannelError>> + Send;

    /// Called after a backoff sleep: when the channel this connector
    /// manages came back on its own while waiting (both sides redialing at
    /// once can do that), return it instead of letting the driver dial a
    /// redundant one.
    fn reopened(&mut self) -> Option<Self::Channel> {
        None
    }
}

/// Dials through `connector` until it yields a channel, the policy gives
/// up, or `cancel` fires.
///
/// Emits [`TransferEvent::Retrying`] before each backoff sleep. A channel
/// recovered through [`Connector::reopened`] counts as a successful open
/// just like a dialed one: adopting it resets the attempt counter, so the
/// next outage starts from the first backoff step again.
pub async fn connect_with_retry<F: Connector>(
    connector: &mut F,
    state: &mut RetryState,
    transfer_id: &str,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Result<F::Channel, TransferError> {
    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Channel(ChannelError::Cancelled));
        }

        match connector.connect().await {
            Ok(channel) => {
                state.record_success();
                debug!(transfer = transfer_id, "channel established");
                return Ok(channel);
            }
            Err(e) => {
                warn!(transfer = transfer_id, error = %e, "channel attempt failed");
                match state.record_failure() {
                    RetryDecision::GiveUp => {
                        info!(
                            transfer = transfer_id,
                            attempts = state.attempts(),
                            "giving up on this transfer"
                        );
                        return Err(TransferError::AttemptsExhausted {
                            attempts: state.attempts(),
                        });
                    }
                    RetryDecision::RetryAfter(delay) => {
                        emit(
                            events,
                            TransferEvent::Retrying {
                                transfer_id: transfer_id.to_string(),
                                attempt: state.attempts(),
                                delay,
                            },
                        )
                        .await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return Err(TransferError::Channel(ChannelError::Cancelled));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        if let Some(channel) = connector.reopened() {
                            state.record_success();
                            debug!(
                                transfer = transfer_id,
                                "channel reopened during backoff; skipping redial"
                            );
                            return Ok(channel);
                        }
                    }
                }
            }
        }
    }
}
