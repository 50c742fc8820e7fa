//! Trigger/acknowledge handshake
//!
//! One attempt sends the trigger frame and then polls the bus for an
//! acknowledgement until a deadline:
//!
//! ```text
//! Idle ──send ok──> Sent ──> Waiting ──match──────> Acknowledged
//!   │                          │  ▲  ──deadline────> TimedOut
//!   │                          └──┘  ──bus error───> Errored
//!   └──send failed──────────────────────────────────> Errored
//! ```
//!
//! Each poll is a bounded `receive` of at most the poll interval, so a
//! shutdown request is noticed within one interval. Non-matching frames are
//! dropped and the wait continues. There is no retry at this level.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{BusChannel, ChannelError};
use crate::config::HandshakeSettings;
use crate::frame::{build_trigger, AckPredicate, CanFrame};

/// Parameters of a single handshake attempt
#[derive(Clone)]
pub struct HandshakeConfig {
    pub trigger: CanFrame,
    pub ack: AckPredicate,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl HandshakeConfig {
    pub fn new(
        trigger: CanFrame,
        ack: AckPredicate,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            trigger,
            ack,
            timeout,
            poll_interval,
        }
    }

    /// Standard trigger frame with the configured policy and timing
    pub fn from_settings(settings: &HandshakeSettings) -> Self {
        Self::new(
            build_trigger(),
            settings.ack.predicate(),
            settings.timeout(),
            settings.poll_interval(),
        )
    }

    /// Replace the acknowledgement predicate
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CanFrame) -> bool + Send + Sync + 'static,
    {
        self.ack = std::sync::Arc::new(predicate);
        self
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("trigger", &self.trigger)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Sent,
    Waiting,
    Acknowledged,
    TimedOut,
    Errored,
    Cancelled,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakeState::Acknowledged
                | HandshakeState::TimedOut
                | HandshakeState::Errored
                | HandshakeState::Cancelled
        )
    }
}

/// Terminal result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The device answered before the deadline
    Acknowledged,
    /// No matching frame before the deadline; the device did not answer
    TimedOut,
    /// The bus failed while sending or waiting
    Errored(ChannelError),
    /// Shutdown was requested mid-wait
    Cancelled,
}

impl HandshakeOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, HandshakeOutcome::Acknowledged)
    }
}

impl fmt::Display for HandshakeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeOutcome::Acknowledged => write!(f, "acknowledged"),
            HandshakeOutcome::TimedOut => write!(f, "no acknowledgement before deadline"),
            HandshakeOutcome::Errored(e) => write!(f, "channel error: {}", e),
            HandshakeOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Drives one handshake attempt over an exclusively owned channel
pub struct HandshakeController<'a> {
    channel: &'a mut dyn BusChannel,
    state: HandshakeState,
    receive_calls: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<'a> HandshakeController<'a> {
    pub fn new(channel: &'a mut dyn BusChannel) -> Self {
        Self {
            channel,
            state: HandshakeState::Idle,
            receive_calls: 0,
            shutdown: None,
        }
    }

    /// Stop waiting once `shutdown` reads `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Receive calls made by the last attempt
    pub fn receive_calls(&self) -> usize {
        self.receive_calls
    }

    /// Run one attempt to a terminal state
    pub async fn attempt(&mut self, config: &HandshakeConfig) -> HandshakeOutcome {
        self.state = HandshakeState::Idle;
        self.receive_calls = 0;

        if let Err(e) = self.channel.send(&config.trigger).await {
            warn!(
                channel = %self.channel.describe(),
                error = %e,
                "Failed to send trigger frame"
            );
            return self.finish(HandshakeOutcome::Errored(e));
        }
        self.transition(HandshakeState::Sent);
        info!(
            channel = %self.channel.describe(),
            can_id = format!("0x{:08X}", config.trigger.id()),
            "Trigger frame sent"
        );

        let deadline = Instant::now() + config.timeout;
        self.transition(HandshakeState::Waiting);

        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested, abandoning handshake");
                return self.finish(HandshakeOutcome::Cancelled);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    timeout_secs = config.timeout.as_secs_f64(),
                    polls = self.receive_calls,
                    "No acknowledgement within timeout"
                );
                return self.finish(HandshakeOutcome::TimedOut);
            }

            self.receive_calls += 1;
            match self
                .channel
                .receive(config.poll_interval.min(remaining))
                .await
            {
                Ok(Some(frame)) if (config.ack)(&frame) => {
                    info!(
                        can_id = format!("0x{:08X}", frame.id()),
                        source_address = frame.source_address(),
                        polls = self.receive_calls,
                        "Acknowledgement received"
                    );
                    return self.finish(HandshakeOutcome::Acknowledged);
                }
                Ok(Some(frame)) => {
                    debug!(?frame, "Ignoring non-matching frame");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Channel failed while waiting for acknowledgement");
                    return self.finish(HandshakeOutcome::Errored(e));
                }
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = ?self.state, to = ?next, "Handshake state transition");
        self.state = next;
    }

    fn finish(&mut self, outcome: HandshakeOutcome) -> HandshakeOutcome {
        let next = match outcome {
            HandshakeOutcome::Acknowledged => HandshakeState::Acknowledged,
            HandshakeOutcome::TimedOut => HandshakeState::TimedOut,
            HandshakeOutcome::Errored(_) => HandshakeState::Errored,
            HandshakeOutcome::Cancelled => HandshakeState::Cancelled,
        };
        self.transition(next);
        outcome
    }
}
