//! Synchronizer - one chat session for one local identity.
//!
//! This module provides [`Synchronizer`], which owns the message store and
//! wires both sources into it:
//!
//! ```text
//! HistorySource → SnapshotLoader ──┐
//!                                  ├→ merge → MessageStore → current_view()
//! Transport → LiveChannel → pump ──┘
//! ```
//!
//! The snapshot load and the hub connection start together. Live messages
//! are merged as they arrive, even while the load is still in flight; the
//! store's dedup makes the arrival order irrelevant.
//!
//! # Example
//!
//! ```ignore
//! let config = ChatConfig::default();
//! let history = HttpHistory::new(config.history_url(), config.request_timeout())?;
//! let transport = WebSocketTransport::with_config(config.transport_config());
//! let identities = Arc::new(MemoryIdentityStore::new());
//!
//! let session = Synchronizer::start(
//!     Identity::new("alice")?,
//!     &config,
//!     transport,
//!     history,
//!     identities,
//! )
//! .await?;
//!
//! session.dispatcher().dispatch("hello").await?;
//! let view = session.current_view().await;
//! session.shutdown().await;
//! ```

use chrono::{DateTime, Utc};
use livechat_core::{ConnectionStatus, MessageStore};
use livechat_types::{ChatMessage, FetchError, Identity, IdentityError, InvalidMessage, USERNAME_KEY};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::channel::LiveChannel;
use crate::config::{ChatConfig, ConfigError};
use crate::dispatcher::OutboundDispatcher;
use crate::identity::IdentityStore;
use crate::snapshot::{HistorySource, SnapshotLoader};
use crate::transport::Transport;

/// Buffered session events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another session already holds the identity slot.
    #[error("a session is already active for {0}")]
    AlreadyActive(String),

    /// The username is unusable.
    #[error("invalid identity: {0}")]
    Identity(#[from] IdentityError),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// The identity bound to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The local username.
    pub identity: Identity,
    /// When the session started.
    pub started_at: DateTime<Utc>,
}

/// Progress of the one-shot history load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotState {
    /// Still fetching.
    Pending,
    /// Merged into the store.
    Loaded {
        /// Valid messages in the snapshot, duplicates included.
        count: usize,
    },
    /// The load failed; the session carries on with live messages only.
    Failed(FetchError),
}

/// Something observers of a session may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New messages entered the view.
    Inserted(Vec<ChatMessage>),
    /// A message was refused by the store.
    Rejected(InvalidMessage),
    /// The history load failed.
    SnapshotFailed(FetchError),
    /// The live channel changed status.
    Status(ConnectionStatus),
}

/// A running chat session.
///
/// Dropping a Synchronizer aborts its tasks and closes the connection in
/// the background; [`shutdown`](Self::shutdown) waits for both.
pub struct Synchronizer<T: Transport> {
    session: Session,
    channel: LiveChannel<T>,
    store: Arc<Mutex<MessageStore>>,
    snapshot: Arc<watch::Sender<SnapshotState>>,
    events: broadcast::Sender<SessionEvent>,
    identity_store: Arc<dyn IdentityStore>,
    load_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
    status_task: Option<JoinHandle<()>>,
}

impl<T: Transport> Synchronizer<T> {
    /// Start a session.
    ///
    /// Claims the identity slot, kicks off the history load and connects
    /// the live channel. Returns once the connect attempt has settled;
    /// a failed connect shows up as [`ConnectionStatus::Failed`], not as
    /// an error.
    pub async fn start<H: HistorySource>(
        identity: Identity,
        config: &ChatConfig,
        transport: T,
        history: H,
        identity_store: Arc<dyn IdentityStore>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        identity_store
            .claim(USERNAME_KEY, identity.as_str())
            .map_err(SessionError::AlreadyActive)?;
        tracing::info!("Starting session for {}", identity);

        let channel = LiveChannel::with_config(transport, config.channel_config());
        let store = Arc::new(Mutex::new(MessageStore::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let snapshot = Arc::new(watch::channel(SnapshotState::Pending).0);

        let status_task = tokio::spawn(forward_status(
            channel.subscribe_status(),
            events.clone(),
        ));

        let pump_task = channel.on_message().await.map(|inbound| {
            tokio::spawn(pump_live(inbound, Arc::clone(&store), events.clone()))
        });

        let load_task = tokio::spawn(load_snapshot(
            SnapshotLoader::new(history),
            Arc::clone(&store),
            events.clone(),
            Arc::clone(&snapshot),
        ));

        channel.connect(&config.hub_url()).await;

        Ok(Self {
            session: Session {
                identity,
                started_at: Utc::now(),
            },
            channel,
            store,
            snapshot,
            events,
            identity_store,
            load_task: Some(load_task),
            pump_task,
            status_task: Some(status_task),
        })
    }

    /// The session's identity and start time.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The local username.
    pub fn identity(&self) -> &Identity {
        &self.session.identity
    }

    /// Snapshot of the ordered, deduplicated view.
    pub async fn current_view(&self) -> Vec<ChatMessage> {
        self.store.lock().await.view().to_vec()
    }

    /// Current live channel status.
    pub async fn status(&self) -> ConnectionStatus {
        self.channel.status().await
    }

    /// Current history load state.
    pub fn snapshot(&self) -> SnapshotState {
        self.snapshot.borrow().clone()
    }

    /// Wait until the history load has either merged or failed.
    pub async fn snapshot_settled(&self) -> SnapshotState {
        let mut rx = self.snapshot.subscribe();
        let settled = match rx
            .wait_for(|state| !matches!(state, SnapshotState::Pending))
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }

    /// Subscribe to view changes, rejections and status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// A dispatcher sending as this session's identity.
    pub fn dispatcher(&self) -> OutboundDispatcher<T> {
        OutboundDispatcher::new(self.channel.clone(), self.session.identity.clone())
    }

    /// End the session.
    ///
    /// Abandons an in-flight history load, disconnects the channel, drops
    /// the view and releases the identity slot. No merges happen after
    /// this returns.
    pub async fn shutdown(mut self) {
        if let Some(load) = self.load_task.take() {
            load.abort();
            let _ = load.await;
        }

        self.channel.disconnect().await;

        if let Some(pump) = self.pump_task.take() {
            pump.abort();
            let _ = pump.await;
        }
        if let Some(status) = self.status_task.take() {
            status.abort();
            let _ = status.await;
        }

        *self.store.lock().await = MessageStore::new();
        self.identity_store.remove(USERNAME_KEY);
        tracing::info!("Session for {} ended", self.session.identity);
    }
}

impl<T: Transport> Drop for Synchronizer<T> {
    fn drop(&mut self) {
        let tasks = [
            self.load_task.take(),
            self.pump_task.take(),
            self.status_task.take(),
        ];
        let mut was_running = false;
        for task in tasks.into_iter().flatten() {
            task.abort();
            was_running = true;
        }
        if was_running {
            self.channel.abort();
            self.identity_store.remove(USERNAME_KEY);
        }
    }
}

/// Merge one batch and publish what happened.
async fn merge_batch(
    store: &Mutex<MessageStore>,
    events: &broadcast::Sender<SessionEvent>,
    batch: Vec<ChatMessage>,
) {
    let outcome = store.lock().await.merge(batch);

    for rejected in outcome.rejected {
        tracing::warn!("Rejected message: {}", rejected);
        let _ = events.send(SessionEvent::Rejected(rejected));
    }
    if outcome.duplicates > 0 {
        tracing::debug!("Skipped {} duplicate messages", outcome.duplicates);
    }
    if !outcome.inserted.is_empty() {
        let _ = events.send(SessionEvent::Inserted(outcome.inserted));
    }
}

async fn pump_live(
    mut inbound: mpsc::UnboundedReceiver<ChatMessage>,
    store: Arc<Mutex<MessageStore>>,
    events: broadcast::Sender<SessionEvent>,
) {
    while let Some(message) = inbound.recv().await {
        merge_batch(&store, &events, vec![message]).await;
    }
    tracing::debug!("Live message stream ended");
}

async fn load_snapshot<H: HistorySource>(
    loader: SnapshotLoader<H>,
    store: Arc<Mutex<MessageStore>>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: Arc<watch::Sender<SnapshotState>>,
) {
    match loader.load().await {
        Ok(page) => {
            let count = page.messages.len();
            for (_, invalid) in page.invalid {
                let _ = events.send(SessionEvent::Rejected(invalid));
            }
            merge_batch(&store, &events, page.messages).await;
            snapshot.send_replace(SnapshotState::Loaded { count });
        }
        Err(e) => {
            tracing::warn!("History load failed: {}", e);
            let _ = events.send(SessionEvent::SnapshotFailed(e.clone()));
            snapshot.send_replace(SnapshotState::Failed(e));
        }
    }
}

async fn forward_status(
    mut statuses: broadcast::Receiver<ConnectionStatus>,
    events: broadcast::Sender<SessionEvent>,
) {
    loop {
        match statuses.recv().await {
            Ok(status) => {
                let _ = events.send(SessionEvent::Status(status));
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!("Status forwarder lagged by {} events", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
