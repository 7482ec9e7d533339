//! LiveChannel - the push connection to the chat hub.
//!
//! This module provides [`LiveChannel`], which keeps a hub connection open,
//! delivers published messages to a single consumer, and carries outbound
//! `SendMessage` invocations.
//!
//! # Architecture
//!
//! LiveChannel drives the pure connection state machine from chat-core and
//! interprets its actions to perform I/O via the Transport trait.
//!
//! ```text
//! Hub → Transport → reader task → mpsc → consumer
//!                       ↓
//!              chat-core (pure state machine)
//! ```
//!
//! A reader task is spawned once the first connect succeeds. It pumps
//! inbound frames, sends keep-alive pings, and runs the reconnect loop when
//! the transport drops.
//!
//! # Example
//!
//! ```ignore
//! let channel = LiveChannel::new(WebSocketTransport::new());
//! let mut messages = channel.on_message().await.unwrap();
//! channel.connect("http://localhost:5132/chathub").await;
//!
//! channel.send("alice", "hello").await?;
//! while let Some(message) = messages.recv().await {
//!     println!("{}: {}", message.sender, message.content);
//! }
//! ```

use livechat_core::{Action, ConnectionState, ConnectionStatus, Event, ReconnectPolicy};
use livechat_types::hub::{RECEIVE_MESSAGE, SEND_MESSAGE};
use livechat_types::{ChatMessage, HubMessage, SendError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};

use crate::transport::Transport;

/// Buffered status changes per subscriber before it starts lagging.
const STATUS_CAPACITY: usize = 64;

/// Configuration for LiveChannel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Reconnect attempts and backoff after an established connection drops.
    pub reconnect: ReconnectPolicy,
    /// How long `send()` waits for the hub's completion.
    pub send_timeout: Duration,
    /// Interval between keep-alive pings (`None` disables them).
    pub keep_alive_interval: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            send_timeout: Duration::from_secs(30),
            keep_alive_interval: Some(Duration::from_secs(15)),
        }
    }
}

/// Why the reader stopped pumping frames.
enum Stop {
    /// The connection went away; reconnecting is allowed.
    Dropped(String),
    /// The hub closed the connection and asked us not to come back.
    Closed(String),
}

type PendingSends = HashMap<String, oneshot::Sender<Result<(), SendError>>>;

struct ChannelInner<T: Transport> {
    transport: T,
    config: ChannelConfig,
    state: Mutex<ConnectionState>,
    status_tx: broadcast::Sender<ConnectionStatus>,
    /// Serializes connect and disconnect.
    lifecycle: Mutex<()>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<ChatMessage>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ChatMessage>>>,
    pending: Mutex<PendingSends>,
    next_invocation: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Set once the channel is torn down; never cleared.
    closed: AtomicBool,
}

/// The live push channel.
///
/// Clones share the same connection.
pub struct LiveChannel<T: Transport> {
    inner: Arc<ChannelInner<T>>,
}

impl<T: Transport> Clone for LiveChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> LiveChannel<T> {
    /// Create a channel with default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ChannelConfig::default())
    }

    /// Create a channel with custom configuration.
    pub fn with_config(transport: T, config: ChannelConfig) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ChannelInner {
                transport,
                config,
                state: Mutex::new(ConnectionState::new()),
                status_tx,
                lifecycle: Mutex::new(()),
                inbound_tx: Mutex::new(Some(inbound_tx)),
                inbound_rx: Mutex::new(Some(inbound_rx)),
                pending: Mutex::new(HashMap::new()),
                next_invocation: AtomicU64::new(0),
                reader: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Open the connection to `endpoint`.
    ///
    /// Does nothing while already connecting or connected, and refuses to
    /// revive a disconnected channel. A failed attempt is reported only
    /// through the `Failed` status.
    pub async fn connect(&self, endpoint: &str) {
        let _guard = self.inner.lifecycle.lock().await;

        if self.inner.is_closed() {
            tracing::warn!("Ignoring connect to {}: channel is closed", endpoint);
            return;
        }

        let actions = self.inner.handle(Event::ConnectRequested).await;
        if !actions.contains(&Action::Connect) {
            match self.inner.status().await {
                ConnectionStatus::Disconnected => {
                    tracing::warn!("Ignoring connect to {}: channel is disconnected", endpoint)
                }
                status => tracing::debug!("Ignoring connect to {} while {}", endpoint, status),
            }
            return;
        }

        match self.inner.transport.connect(endpoint).await {
            Ok(()) => {
                self.inner.handle(Event::ConnectSucceeded).await;
                let reader = tokio::spawn(run_reader(
                    Arc::clone(&self.inner),
                    endpoint.to_string(),
                ));
                if let Some(stale) = self.inner.reader.lock().await.replace(reader) {
                    stale.abort();
                }
            }
            Err(e) => {
                tracing::warn!("Hub connection to {} failed: {}", endpoint, e);
                self.inner
                    .handle(Event::ConnectFailed {
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Take the receiving end of the delivery stream.
    ///
    /// Only one consumer may register; later calls return `None`. Messages
    /// that arrived before registration are buffered and delivered first.
    pub async fn on_message(&self) -> Option<mpsc::UnboundedReceiver<ChatMessage>> {
        self.inner.inbound_rx.lock().await.take()
    }

    /// Ask the hub to broadcast a message and wait for its acknowledgement.
    ///
    /// The message itself reaches this client the same way it reaches every
    /// other one: as a `ReceiveMessage` delivery.
    pub async fn send(&self, sender: &str, content: &str) -> Result<(), SendError> {
        if self.inner.is_closed() || !self.inner.state.lock().await.is_connected() {
            return Err(SendError::NotConnected);
        }

        let invocation_id = self
            .inner
            .next_invocation
            .fetch_add(1, Ordering::SeqCst)
            .to_string();
        let (done_tx, done_rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .await
            .insert(invocation_id.clone(), done_tx);

        let frame = HubMessage::invocation(
            invocation_id.clone(),
            SEND_MESSAGE,
            vec![json!(sender), json!(content)],
        )
        .to_frame();

        if let Err(e) = self.inner.transport.send(&frame).await {
            self.inner.pending.lock().await.remove(&invocation_id);
            return Err(SendError::Rejected(e.to_string()));
        }

        match tokio::time::timeout(self.inner.config.send_timeout, done_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SendError::Rejected(
                "connection lost before completion".into(),
            )),
            Err(_) => {
                self.inner.pending.lock().await.remove(&invocation_id);
                Err(SendError::Rejected("timed out waiting for completion".into()))
            }
        }
    }

    /// Tear the channel down.
    ///
    /// Safe from any state, including before `connect`. When this returns,
    /// the reader task has stopped and no further messages will be
    /// delivered.
    pub async fn disconnect(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.closed.store(true, Ordering::SeqCst);

        if let Some(reader) = self.inner.reader.lock().await.take() {
            reader.abort();
            let _ = reader.await;
        }

        self.inner.shut_down().await;
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.inner.status().await
    }

    /// Subscribe to status changes.
    ///
    /// Each actual change is published once.
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Tear the channel down without waiting, for use from `Drop`.
    ///
    /// Sends are refused from the moment this returns. The state change and
    /// the transport close finish on a spawned task.
    pub(crate) fn abort(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Ok(mut reader) = self.inner.reader.try_lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(&self.inner);
                runtime.spawn(async move {
                    if let Some(reader) = inner.reader.lock().await.take() {
                        reader.abort();
                    }
                    inner.shut_down().await;
                });
            }
            Err(_) => tracing::warn!("Live channel dropped outside a runtime; transport left open"),
        }
    }
}

impl<T: Transport> ChannelInner<T> {
    async fn status(&self) -> ConnectionStatus {
        self.state.lock().await.status()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Move to `Disconnected`, close the transport and end delivery.
    async fn shut_down(&self) {
        self.handle(Event::DisconnectRequested).await;
        self.fail_pending("channel disconnected").await;
        self.inbound_tx.lock().await.take();
    }

    /// Feed one event through the state machine.
    ///
    /// Status changes are published and the transport closed here; the
    /// remaining actions are returned for the caller to carry out.
    async fn handle(&self, event: Event) -> Vec<Action> {
        let actions = {
            let mut state = self.state.lock().await;
            let (next, actions) = state.clone().on_event(event, &self.config.reconnect);
            *state = next;
            for action in &actions {
                if let Action::EmitStatus(status) = action {
                    tracing::info!("Live channel {}", status);
                    let _ = self.status_tx.send(*status);
                }
            }
            actions
        };

        let mut remaining = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                Action::EmitStatus(_) => {}
                Action::CloseTransport => {
                    if let Err(e) = self.transport.close().await {
                        tracing::debug!("Error closing transport: {}", e);
                    }
                }
                other => remaining.push(other),
            }
        }
        remaining
    }

    async fn fail_pending(&self, reason: &str) {
        let waiters: Vec<_> = self.pending.lock().await.drain().collect();
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(SendError::Rejected(reason.to_string())));
        }
    }

    /// Read frames until the connection stops.
    async fn pump_frames(&self) -> Stop {
        let mut keep_alive = self
            .config
            .keep_alive_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            let received = tokio::select! {
                received = self.transport.recv() => received,
                _ = next_tick(&mut keep_alive) => {
                    if let Err(e) = self.transport.send(&HubMessage::Ping.to_frame()).await {
                        tracing::debug!("Keep-alive ping failed: {}", e);
                    }
                    continue;
                }
            };

            match received {
                Ok(record) => {
                    if let Some(stop) = self.handle_record(&record).await {
                        return stop;
                    }
                }
                Err(e) => return Stop::Dropped(e.to_string()),
            }
        }
    }

    async fn handle_record(&self, record: &str) -> Option<Stop> {
        let message = match HubMessage::parse(record) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping undecodable hub frame: {}", e);
                return None;
            }
        };

        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } if target == RECEIVE_MESSAGE => match arguments.first().map(ChatMessage::from_value) {
                Some(Ok(message)) => self.deliver(message).await,
                Some(Err(e)) => tracing::warn!("Skipping invalid live message: {}", e),
                None => tracing::warn!("{} invocation without arguments", RECEIVE_MESSAGE),
            },
            HubMessage::Invocation { target, .. } => {
                tracing::debug!("Ignoring invocation of unknown target {}", target);
            }
            HubMessage::Completion {
                invocation_id,
                error,
                ..
            } => {
                let waiter = self.pending.lock().await.remove(&invocation_id);
                match waiter {
                    Some(waiter) => {
                        let result = match error {
                            Some(error) => Err(SendError::Rejected(error)),
                            None => Ok(()),
                        };
                        let _ = waiter.send(result);
                    }
                    None => tracing::debug!("Completion for unknown invocation {}", invocation_id),
                }
            }
            HubMessage::Ping => {}
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                let reason = error.unwrap_or_else(|| "closed by hub".to_string());
                tracing::info!("Hub closed the connection: {}", reason);
                return Some(if allow_reconnect {
                    Stop::Dropped(reason)
                } else {
                    Stop::Closed(reason)
                });
            }
            HubMessage::Other(frame_type) => {
                tracing::debug!("Ignoring hub frame type {}", frame_type);
            }
        }
        None
    }

    async fn deliver(&self, message: ChatMessage) {
        let inbound = self.inbound_tx.lock().await;
        let delivered = match inbound.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        };
        if !delivered {
            tracing::debug!("No message consumer; dropping delivery");
        }
    }

    /// Run reconnect attempts after a drop.
    ///
    /// Returns `true` once connected again, `false` when the policy gives up.
    async fn reconnect(&self, endpoint: &str, mut actions: Vec<Action>) -> bool {
        loop {
            let Some(delay) = actions.iter().find_map(|action| match action {
                Action::StartReconnectTimer { delay } => Some(*delay),
                _ => None,
            }) else {
                return false;
            };

            tracing::debug!("Reconnecting to {} in {:?}", endpoint, delay);
            tokio::time::sleep(delay).await;

            if !self
                .handle(Event::ReconnectTimer)
                .await
                .contains(&Action::Connect)
            {
                return false;
            }

            match self.transport.connect(endpoint).await {
                Ok(()) => {
                    self.handle(Event::ConnectSucceeded).await;
                    return true;
                }
                Err(e) => {
                    tracing::warn!("Reconnect to {} failed: {}", endpoint, e);
                    actions = self
                        .handle(Event::ConnectFailed {
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_reader<T: Transport>(inner: Arc<ChannelInner<T>>, endpoint: String) {
    loop {
        match inner.pump_frames().await {
            Stop::Dropped(reason) => {
                tracing::warn!("Hub connection lost: {}", reason);
                inner.fail_pending(&reason).await;
                let actions = inner.handle(Event::TransportDropped { reason }).await;
                if !inner.reconnect(&endpoint, actions).await {
                    inner.inbound_tx.lock().await.take();
                    return;
                }
            }
            Stop::Closed(reason) => {
                inner.fail_pending(&reason).await;
                inner.handle(Event::DisconnectRequested).await;
                inner.inbound_tx.lock().await.take();
                return;
            }
        }
    }
}
