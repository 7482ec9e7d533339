//! Snapshot loading from the history endpoint.
//!
//! [`HistorySource`] abstracts where the raw body comes from ([`HttpHistory`]
//! in production, [`MockHistory`] in tests). [`SnapshotLoader`] fetches it
//! once and normalizes it with `chat-core::history`.

use async_trait::async_trait;
use livechat_core::{parse_history, HistoryPage};
use livechat_types::{ChatMessage, FetchError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Where history bodies come from.
#[async_trait]
pub trait HistorySource: Send + Sync + 'static {
    /// Fetch the raw response body.
    async fn fetch(&self) -> Result<String, FetchError>;
}

/// History over HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpHistory {
    client: reqwest::Client,
    url: String,
}

impl HttpHistory {
    /// Create a source for `url` with a whole-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The endpoint being fetched.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HistorySource for HttpHistory {
    async fn fetch(&self) -> Result<String, FetchError> {
        tracing::debug!("GET {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))
    }
}

/// Mock history source for testing.
///
/// Responses are served in queue order; an empty queue serves `[]`. Clones
/// share state.
#[derive(Debug, Clone)]
pub struct MockHistory {
    responses: Arc<Mutex<VecDeque<Result<String, FetchError>>>>,
    calls: Arc<AtomicUsize>,
    gate: Arc<watch::Sender<bool>>,
}

impl Default for MockHistory {
    fn default() -> Self {
        Self {
            responses: Arc::default(),
            calls: Arc::default(),
            gate: Arc::new(watch::channel(false).0),
        }
    }
}

impl MockHistory {
    /// Create a mock with no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose first response is `messages` as a bare array.
    pub fn with_messages(messages: &[ChatMessage]) -> Self {
        let mock = Self::new();
        mock.push_messages(messages);
        mock
    }

    /// Queue a raw body.
    pub fn push_body(&self, body: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(body.into()));
    }

    /// Queue a bare array of messages.
    pub fn push_messages(&self, messages: &[ChatMessage]) {
        let body = serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string());
        self.push_body(body);
    }

    /// Queue a failure.
    pub fn push_error(&self, error: FetchError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Make `fetch()` wait until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    /// Let held and future fetches proceed.
    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    /// Number of `fetch()` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for MockHistory {
    async fn fetch(&self) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|held| !*held).await.is_err() {
            return Err(FetchError::Unreachable("mock history dropped".into()));
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()))
    }
}

/// One-shot history loader.
#[derive(Debug)]
pub struct SnapshotLoader<H: HistorySource> {
    source: H,
}

impl<H: HistorySource> SnapshotLoader<H> {
    /// Create a loader over `source`.
    pub fn new(source: H) -> Self {
        Self { source }
    }

    /// Fetch and normalize the history.
    ///
    /// Elements that fail to decode are logged and reported in
    /// [`HistoryPage::invalid`]; they never fail the load.
    pub async fn load(&self) -> Result<HistoryPage, FetchError> {
        let body = self.source.fetch().await?;
        let page = parse_history(&body)?;

        for (index, error) in &page.invalid {
            tracing::warn!("Skipping history element {}: {}", index, error);
        }
        tracing::info!(
            "Loaded {} history messages ({} skipped)",
            page.messages.len(),
            page.invalid.len()
        );
        Ok(page)
    }

    /// Fetch the history as a plain message list.
    pub async fn load_messages(&self) -> Result<Vec<ChatMessage>, FetchError> {
        self.load().await.map(|page| page.messages)
    }
}
