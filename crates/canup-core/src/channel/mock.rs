//! Simulated CAN bus for testing and dry runs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BusChannel, ChannelError, ChannelOpener};
use crate::config::MockConfig;
use crate::frame::{build_frame, CanFrame, ACK_MARKER, TRIGGER_ID};

/// Scripted result of one `receive` call
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Deliver this frame immediately
    Frame(CanFrame),
    /// Nothing arrives; the call waits out its full timeout
    Silence,
    /// The transport fails
    Error(ChannelError),
}

/// Simulated bus shared between a test and the channels opened on it
///
/// Receive calls consume the reply script in order; once it is empty the
/// bus is silent. Every channel handed out by [`ChannelOpener::open`] is
/// counted until it is dropped, so tests can assert the handle was released.
#[derive(Clone)]
pub struct MockBus {
    state: Arc<MockState>,
}

struct MockState {
    config: MockConfig,
    connected: AtomicBool,
    open_error: Mutex<Option<ChannelError>>,
    send_error: Mutex<Option<ChannelError>>,
    script: Mutex<VecDeque<MockReply>>,
    sent: Mutex<Vec<CanFrame>>,
    receive_calls: AtomicUsize,
    opened: AtomicUsize,
    open_handles: AtomicUsize,
}

impl MockBus {
    pub fn new(config: &MockConfig) -> Self {
        Self {
            state: Arc::new(MockState {
                config: config.clone(),
                connected: AtomicBool::new(true),
                open_error: Mutex::new(None),
                send_error: Mutex::new(None),
                script: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                receive_calls: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
                open_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// A bus where nothing answers unless scripted
    pub fn silent() -> Self {
        Self::new(&MockConfig {
            respond_to_trigger: false,
            ..MockConfig::default()
        })
    }

    /// Append replies to the receive script
    pub fn script(&self, replies: impl IntoIterator<Item = MockReply>) {
        self.state.script.lock().extend(replies);
    }

    /// Queue a frame behind any replies already scripted
    pub fn inject(&self, frame: CanFrame) {
        self.state.script.lock().push_back(MockReply::Frame(frame));
    }

    /// Make every subsequent `send` fail with `err`
    pub fn fail_send(&self, err: ChannelError) {
        *self.state.send_error.lock() = Some(err);
    }

    /// Make every subsequent `open` fail with `err`
    pub fn fail_open(&self, err: ChannelError) {
        *self.state.open_error.lock() = Some(err);
    }

    /// Simulate the interface going down or coming back
    pub fn set_connected(&self, connected: bool) {
        self.state.connected.store(connected, Ordering::SeqCst);
    }

    /// Frames sent on any channel of this bus, oldest first
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.state.sent.lock().clone()
    }

    pub fn receive_calls(&self) -> usize {
        self.state.receive_calls.load(Ordering::SeqCst)
    }

    /// Number of channels ever opened
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Number of channels currently open
    pub fn open_handles(&self) -> usize {
        self.state.open_handles.load(Ordering::SeqCst)
    }

    fn simulated_ack(&self) -> Option<CanFrame> {
        let mut payload = [0u8; 8];
        payload[0] = ACK_MARKER;
        build_frame(self.state.config.ack_id, &payload).ok()
    }
}

#[async_trait]
impl ChannelOpener for MockBus {
    async fn open(&self) -> Result<Box<dyn BusChannel>, ChannelError> {
        let open_error = self.state.open_error.lock().clone();
        if let Some(err) = open_error {
            return Err(err);
        }
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("mock bus is down".to_string()));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockBusChannel { bus: self.clone() }))
    }
}

/// One open handle on a [`MockBus`]
pub struct MockBusChannel {
    bus: MockBus,
}

#[async_trait]
impl BusChannel for MockBusChannel {
    async fn send(&mut self, frame: &CanFrame) -> Result<(), ChannelError> {
        let state = &self.bus.state;
        if !state.connected.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("mock bus is down".to_string()));
        }
        let send_error = state.send_error.lock().clone();
        if let Some(err) = send_error {
            return Err(err);
        }

        if state.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(state.config.latency_ms)).await;
        }

        tracing::debug!(?frame, "Mock bus: sent frame");
        state.sent.lock().push(frame.clone());

        if state.config.respond_to_trigger && frame.id() == TRIGGER_ID {
            if let Some(ack) = self.bus.simulated_ack() {
                state.script.lock().push_back(MockReply::Frame(ack));
            }
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<CanFrame>, ChannelError> {
        let state = &self.bus.state;
        state.receive_calls.fetch_add(1, Ordering::SeqCst);

        if !state.connected.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("mock bus is down".to_string()));
        }

        let reply = state.script.lock().pop_front();
        match reply {
            Some(MockReply::Frame(frame)) => Ok(Some(frame)),
            Some(MockReply::Error(err)) => Err(err),
            Some(MockReply::Silence) | None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

impl Drop for MockBusChannel {
    fn drop(&mut self) {
        self.bus.state.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
