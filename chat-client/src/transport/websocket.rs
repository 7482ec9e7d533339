//! WebSocketTransport - hub connection over a WebSocket.
//!
//! Opens the socket, performs the JSON hub protocol handshake, and splits
//! incoming payloads into records. A single payload may carry several
//! records; the extras are buffered for subsequent `recv()` calls.

use super::{Transport, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use livechat_types::hub;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for WebSocketTransport.
#[derive(Clone, Debug)]
pub struct WebSocketTransportConfig {
    /// Upper bound on opening the socket plus the protocol handshake.
    pub handshake_timeout: Duration,
    /// Send operation timeout.
    pub operation_timeout: Duration,
}

impl Default for WebSocketTransportConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(15),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Read half plus records already split off a payload.
struct Reader {
    stream: SplitStream<WsStream>,
    pending: VecDeque<String>,
}

/// WebSocketTransport implements the Transport trait over a WebSocket
/// speaking the JSON hub protocol.
///
/// # Example
///
/// ```ignore
/// let transport = WebSocketTransport::new();
/// transport.connect("http://localhost:5132/chathub").await?;
/// let record = transport.recv().await?;
/// ```
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<Reader>>,
    connected: AtomicBool,
    config: WebSocketTransportConfig,
}

impl WebSocketTransport {
    /// Create a transport with default timeouts.
    pub fn new() -> Self {
        Self::with_config(WebSocketTransportConfig::default())
    }

    /// Create a transport with custom configuration.
    pub fn with_config(config: WebSocketTransportConfig) -> Self {
        Self {
            sink: Mutex::new(None),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &WebSocketTransportConfig {
        &self.config
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an `http(s)` hub URL onto its `ws(s)` equivalent.
///
/// Addresses already using a WebSocket scheme pass through unchanged.
pub fn websocket_url(address: &str) -> String {
    if let Some(rest) = address.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = address.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        address.to_string()
    }
}

fn payload_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text),
        Message::Binary(data) => Some(String::from_utf8_lossy(&data).into_owned()),
        _ => None,
    }
}

/// Wait for the handshake response, buffering any records that follow it.
async fn read_handshake(
    stream: &mut SplitStream<WsStream>,
    pending: &mut VecDeque<String>,
) -> Result<(), TransportError> {
    loop {
        let message = match stream.next().await {
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(TransportError::HandshakeFailed(e.to_string())),
        };
        let Some(text) = payload_text(message) else {
            continue;
        };
        let mut records = hub::split_records(&text);
        let Some(first) = records.next() else {
            continue;
        };
        hub::parse_handshake_response(first)
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        pending.extend(records.map(str::to_string));
        return Ok(());
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let url = websocket_url(address);
        tracing::debug!("Opening hub socket at {}", url);

        let handshake = async {
            let (ws, _) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            let (mut sink, mut stream) = ws.split();

            sink.send(Message::Text(hub::handshake_request()))
                .await
                .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

            let mut pending = VecDeque::new();
            read_handshake(&mut stream, &mut pending).await?;
            Ok::<_, TransportError>((sink, Reader { stream, pending }))
        };

        let (sink, reader) = tokio::time::timeout(self.config.handshake_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout)??;

        *self.sink.lock().await = Some(sink);
        *self.reader.lock().await = Some(reader);
        self.connected.store(true, Ordering::SeqCst);

        tracing::debug!("Hub handshake completed with {}", url);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;

        tokio::time::timeout(
            self.config.operation_timeout,
            sink.send(Message::Text(frame.to_string())),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            if let Some(record) = reader.pending.pop_front() {
                return Ok(record);
            }

            match reader.stream.next().await {
                Some(Ok(Message::Close(_))) | None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Ok(message)) => {
                    if let Some(text) = payload_text(message) {
                        reader
                            .pending
                            .extend(hub::split_records(&text).map(str::to_string));
                    }
                }
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);

        // Closing the sink first lets a blocked recv() observe the close.
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        self.reader.lock().await.take();
        Ok(())
    }
}
