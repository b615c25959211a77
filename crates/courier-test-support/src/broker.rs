//! Test broker: in-process `Broker` that records emits and can be scripted
//! to fail.

use std::sync::Mutex;

use async_trait::async_trait;
use courier_core::broker::{Broker, BrokerError, MessageStream};
use courier_core::event::Event;
use futures_util::StreamExt;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct BrokerState {
    connected: bool,
    connect_calls: u32,
    connect_failures_left: u32,
    emit_attempts: u32,
    emit_failures_left: u32,
    fail_containing: Vec<String>,
    emitted: Vec<(String, String)>,
    subscribers: Vec<(String, mpsc::UnboundedSender<String>)>,
}

/// A broker that records every successful emit and fans delivered payloads
/// out to in-process subscribers.
///
/// Like a real client, `emit` and `subscribe` fail with `NotConnected`
/// until `connect` succeeds, and again after `close`.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    state: Mutex<BrokerState>,
}

impl RecordingBroker {
    /// Create a broker on which every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` calls to `connect`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn failing_connects(self, count: u32) -> Self {
        self.state.lock().unwrap().connect_failures_left = count;
        self
    }

    /// Fail the first `count` calls to `emit`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn failing_emits(self, count: u32) -> Self {
        self.state.lock().unwrap().emit_failures_left = count;
        self
    }

    /// Fail every emit whose payload contains `needle`, e.g. an event id.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_emits_containing(&self, needle: impl Into<String>) {
        self.state.lock().unwrap().fail_containing.push(needle.into());
    }

    /// Stop failing emits that were scripted to fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.emit_failures_left = 0;
        state.fail_containing.clear();
    }

    /// Returns a snapshot of successful emits as `(channel, payload)` pairs.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn emitted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().emitted.clone()
    }

    /// Returns successful emits parsed back into events.
    ///
    /// # Panics
    ///
    /// Panics if a payload is not a JSON-encoded event.
    pub fn emitted_events(&self) -> Vec<Event> {
        self.emitted()
            .iter()
            .map(|(_, payload)| serde_json::from_str(payload).unwrap())
            .collect()
    }

    /// Number of `emit` calls, successful or not.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn emit_attempts(&self) -> u32 {
        self.state.lock().unwrap().emit_attempts
    }

    /// Number of `connect` calls, successful or not.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn connect_calls(&self) -> u32 {
        self.state.lock().unwrap().connect_calls
    }

    /// Whether the last `connect` succeeded and `close` has not been called.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Pushes `payload` to every open subscription on `channel` without
    /// recording it as an emit. Returns the number of receivers reached.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn deliver(&self, channel: &str, payload: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(_, sender)| !sender.is_closed());
        state
            .subscribers
            .iter()
            .filter(|(subscribed, _)| subscribed == channel)
            .filter(|(_, sender)| sender.send(payload.to_owned()).is_ok())
            .count()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;
        if state.connect_failures_left > 0 {
            state.connect_failures_left -= 1;
            return Err(BrokerError::Connection("connection refused".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn emit(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.emit_attempts += 1;
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        let scripted = state.emit_failures_left > 0;
        if scripted {
            state.emit_failures_left -= 1;
        }
        if scripted || state.fail_containing.iter().any(|needle| payload.contains(needle.as_str())) {
            return Err(BrokerError::Emit {
                channel: channel.to_owned(),
                reason: "broker unavailable".into(),
            });
        }
        state.emitted.push((channel.to_owned(), payload.to_owned()));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BrokerError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.push((channel.to_owned(), sender));
        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|payload| (payload, receiver))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.subscribers.clear();
        Ok(())
    }
}
