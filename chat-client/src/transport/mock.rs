//! Mock transport for testing.
//!
//! Plays the hub's side of the conversation in memory: acknowledges
//! invocations, optionally echoes published messages back, and lets tests
//! inject inbound frames or simulate dropped connections.

use super::{Transport, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use livechat_types::hub::{self, SEND_MESSAGE};
use livechat_types::{ChatMessage, HubMessage};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Something the mock hands to the next `recv()` call.
#[derive(Debug, Clone)]
enum MockEvent {
    Frame(String),
    Drop,
}

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the live channel
/// owns another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    wake: Arc<Notify>,
}

#[derive(Debug)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_count: usize,
    sent_frames: Vec<String>,
    inbound: VecDeque<MockEvent>,
    fail_connects: VecDeque<String>,
    fail_next_send: Option<String>,
    reject_next_invocation: Option<String>,
    auto_ack: bool,
    echo: bool,
}

impl Default for MockTransportInner {
    fn default() -> Self {
        Self {
            connected: false,
            connected_address: None,
            connect_count: 0,
            sent_frames: Vec::new(),
            inbound: VecDeque::new(),
            fail_connects: VecDeque::new(),
            fail_next_send: None,
            reject_next_invocation: None,
            auto_ack: true,
            echo: false,
        }
    }
}

impl MockTransport {
    /// Create a new mock transport that acknowledges every invocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a `ReceiveMessage` invocation carrying `message`.
    pub fn push_message(&self, message: &ChatMessage) {
        let payload = serde_json::to_value(message).unwrap_or(Value::Null);
        self.push_payload(payload);
    }

    /// Deliver a `ReceiveMessage` invocation with an arbitrary payload.
    pub fn push_payload(&self, payload: Value) {
        let frame = HubMessage::Invocation {
            invocation_id: None,
            target: hub::RECEIVE_MESSAGE.to_string(),
            arguments: vec![payload],
        }
        .to_frame();
        self.queue_frame(frame);
    }

    /// Queue raw text to be returned by `recv()`, one event per record.
    pub fn queue_frame(&self, text: impl Into<String>) {
        let text = text.into();
        let mut inner = self.inner.lock().unwrap();
        for record in hub::split_records(&text) {
            inner.inbound.push_back(MockEvent::Frame(record.to_string()));
        }
        drop(inner);
        self.wake.notify_one();
    }

    /// Simulate the connection dropping once queued frames are consumed.
    pub fn drop_connection(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.inbound.push_back(MockEvent::Drop);
        drop(inner);
        self.wake.notify_one();
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.sent_frames.clone()
    }

    /// Decoded invocations among the sent frames, in send order.
    pub fn sent_invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.sent_frames()
            .iter()
            .flat_map(|frame| {
                hub::split_records(frame)
                    .filter_map(|record| HubMessage::parse(record).ok())
                    .collect::<Vec<_>>()
            })
            .filter_map(|msg| match msg {
                HubMessage::Invocation {
                    target, arguments, ..
                } => Some((target, arguments)),
                _ => None,
            })
            .collect()
    }

    /// Number of `SendMessage` invocations sent.
    pub fn send_count(&self) -> usize {
        self.sent_invocations()
            .iter()
            .filter(|(target, _)| target == SEND_MESSAGE)
            .count()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.connect_count
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.connected_address.clone()
    }

    /// Cause the next connect() to fail with the given error.
    ///
    /// Calls stack: each queued failure is consumed by one attempt.
    pub fn fail_next_connect(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_connects.push_back(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Answer the next invocation with a completion carrying `error`.
    pub fn reject_next_invocation(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.reject_next_invocation = Some(error.to_string());
    }

    /// Whether invocations are answered with a completion (default on).
    ///
    /// With acknowledgements off, senders wait until their timeout.
    pub fn set_auto_ack(&self, enabled: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.auto_ack = enabled;
    }

    /// Whether `SendMessage` invocations are broadcast back as
    /// `ReceiveMessage`, the way the hub echoes to every client.
    pub fn set_echo(&self, enabled: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.echo = enabled;
    }

    /// Clear all state (frames, queue, connection).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
        drop(inner);
        self.wake.notify_one();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            wake: Arc::clone(&self.wake),
        }
    }
}

impl MockTransportInner {
    /// React to one outbound record the way the hub would.
    fn answer(&mut self, record: &str) {
        let Ok(HubMessage::Invocation {
            invocation_id,
            target,
            arguments,
        }) = HubMessage::parse(record)
        else {
            return;
        };

        if let Some(id) = invocation_id {
            let error = self.reject_next_invocation.take();
            if self.auto_ack || error.is_some() {
                let completion = HubMessage::Completion {
                    invocation_id: id,
                    result: None,
                    error: error.clone(),
                };
                self.inbound
                    .push_back(MockEvent::Frame(completion.to_json().to_string()));
            }
            if error.is_some() {
                return;
            }
        }

        if self.echo && target == SEND_MESSAGE && arguments.len() >= 2 {
            let broadcast = HubMessage::Invocation {
                invocation_id: None,
                target: hub::RECEIVE_MESSAGE.to_string(),
                arguments: vec![json!({
                    "sender": arguments[0],
                    "content": arguments[1],
                    "timestamp": Utc::now().to_rfc3339(),
                })],
            };
            self.inbound
                .push_back(MockEvent::Frame(broadcast.to_json().to_string()));
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_connects.pop_front() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        inner.connect_count += 1;
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_frames.push(frame.to_string());
        for record in hub::split_records(frame) {
            inner.answer(record);
        }
        drop(inner);
        self.wake.notify_one();
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }
                match inner.inbound.pop_front() {
                    Some(MockEvent::Frame(record)) => return Ok(record),
                    Some(MockEvent::Drop) => {
                        inner.connected = false;
                        return Err(TransportError::ConnectionClosed);
                    }
                    None => {}
                }
            }
            self.wake.notified().await;
        }
    }

    fn is_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        drop(inner);
        self.wake.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn invocation(id: &str, content: &str) -> String {
        HubMessage::invocation(id, SEND_MESSAGE, vec![json!("alice"), json!(content)]).to_frame()
    }

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("ws://hub/chathub").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(
            transport.connected_address(),
            Some("ws://hub/chathub".to_string())
        );
    }

    #[tokio::test]
    async fn mock_transport_records_sent_frames() {
        let transport = MockTransport::new();
        transport.connect("hub").await.unwrap();

        transport.send(&invocation("1", "one")).await.unwrap();
        transport.send(&HubMessage::Ping.to_frame()).await.unwrap();

        assert_eq!(transport.sent_frames().len(), 2);
        assert_eq!(transport.send_count(), 1);
        let (target, args) = &transport.sent_invocations()[0];
        assert_eq!(target, SEND_MESSAGE);
        assert_eq!(args[1], "one");
    }

    #[tokio::test]
    async fn mock_transport_acknowledges_invocations() {
        let transport = MockTransport::new();
        transport.connect("hub").await.unwrap();
        transport.send(&invocation("5", "hi")).await.unwrap();

        let record = transport.recv().await.unwrap();
        assert_eq!(
            HubMessage::parse(&record).unwrap(),
            HubMessage::Completion {
                invocation_id: "5".into(),
                result: None,
                error: None,
            }
        );
    }

    #[tokio::test]
    async fn mock_transport_echoes_when_enabled() {
        let transport = MockTransport::new();
        transport.set_auto_ack(false);
        transport.set_echo(true);
        transport.connect("hub").await.unwrap();
        transport.send(&invocation("1", "hello")).await.unwrap();

        let record = transport.recv().await.unwrap();
        match HubMessage::parse(&record).unwrap() {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                assert_eq!(target, hub::RECEIVE_MESSAGE);
                let msg = ChatMessage::from_value(&arguments[0]).unwrap();
                assert_eq!(msg.sender, "alice");
                assert_eq!(msg.content, "hello");
            }
            other => panic!("Expected Invocation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_invocation_is_not_echoed() {
        let transport = MockTransport::new();
        transport.set_echo(true);
        transport.reject_next_invocation("hub error");
        transport.connect("hub").await.unwrap();
        transport.send(&invocation("1", "hello")).await.unwrap();

        let record = transport.recv().await.unwrap();
        assert!(matches!(
            HubMessage::parse(&record).unwrap(),
            HubMessage::Completion { error: Some(_), .. }
        ));

        transport.close().await.unwrap();
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn recv_waits_for_pushed_message() {
        let transport = MockTransport::new();
        transport.connect("hub").await.unwrap();

        let pusher = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pusher.push_payload(json!({"sender": "b", "content": "x", "timestamp": "2024-05-01T12:00:00Z"}));
        });

        let record = tokio::time::timeout(Duration::from_secs(2), transport.recv())
            .await
            .expect("recv should wake")
            .unwrap();
        assert!(record.contains("ReceiveMessage"));
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.send("{}\u{1e}").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn recv_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn forced_connect_failures_stack() {
        let transport = MockTransport::new();
        transport.fail_next_connect("refused");
        transport.fail_next_connect("refused again");

        assert!(matches!(
            transport.connect("hub").await,
            Err(TransportError::ConnectionFailed(_))
        ));
        assert!(transport.connect("hub").await.is_err());
        assert!(!transport.is_connected());

        transport.connect("hub").await.unwrap();
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.connect("hub").await.unwrap();
        transport.fail_next_send("buffer full");

        let result = transport.send(&invocation("1", "x")).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        transport.send(&invocation("2", "x")).await.unwrap();
        assert_eq!(transport.send_count(), 1);
    }

    #[tokio::test]
    async fn drop_connection_after_queued_frames() {
        let transport = MockTransport::new();
        transport.connect("hub").await.unwrap();
        transport.queue_frame(HubMessage::Ping.to_frame());
        transport.drop_connection();

        assert!(transport.recv().await.is_ok());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
        assert!(!transport.is_connected());
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect("hub").await.unwrap();
        assert!(transport2.is_connected());

        transport1.send(&invocation("1", "a")).await.unwrap();
        transport2.send(&invocation("2", "b")).await.unwrap();

        assert_eq!(transport1.send_count(), 2);
    }

    #[tokio::test]
    async fn mock_transport_reset_clears_all() {
        let transport = MockTransport::new();
        transport.connect("hub").await.unwrap();
        transport.send(&invocation("1", "a")).await.unwrap();

        transport.reset();

        assert!(!transport.is_connected());
        assert!(transport.sent_frames().is_empty());
        assert!(transport.connected_address().is_none());
        assert_eq!(transport.connect_count(), 0);
    }
}
