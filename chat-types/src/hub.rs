//! JSON hub protocol frames spoken on the push channel.
//!
//! Every frame is a JSON object terminated by the ASCII record separator
//! (`0x1E`). A WebSocket text message may carry several frames.
//!
//! # Handshake
//!
//! ```text
//! client → {"protocol":"json","version":1}\x1e
//! server → {}\x1e                  (or {"error":"..."}\x1e)
//! ```
//!
//! After the handshake, frames are discriminated by their numeric `type`.

use serde_json::{json, Map, Value};

use crate::ProtocolError;

/// Terminator appended to every frame.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Inbound invocation target carrying one published message.
pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";

/// Outbound invocation target requesting a broadcast.
pub const SEND_MESSAGE: &str = "SendMessage";

/// Frame type discriminators.
mod kind {
    pub const INVOCATION: u64 = 1;
    pub const COMPLETION: u64 = 3;
    pub const PING: u64 = 6;
    pub const CLOSE: u64 = 7;
}

/// A decoded hub protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Call a method on the other side.
    Invocation {
        /// Present when the caller expects a completion.
        invocation_id: Option<String>,
        /// Method name.
        target: String,
        /// Positional arguments.
        arguments: Vec<Value>,
    },
    /// Result of an invocation that carried an id.
    Completion {
        /// Id of the invocation being completed.
        invocation_id: String,
        /// Return value, if any.
        result: Option<Value>,
        /// Failure reported by the hub.
        error: Option<String>,
    },
    /// Keep-alive.
    Ping,
    /// The server is closing the connection.
    Close {
        /// Reason reported by the server.
        error: Option<String>,
        /// Whether the client may reconnect.
        allow_reconnect: bool,
    },
    /// Stream frames and anything newer; not used by this client.
    Other(u64),
}

impl HubMessage {
    /// Build an invocation that expects a completion.
    pub fn invocation(invocation_id: impl Into<String>, target: &str, arguments: Vec<Value>) -> Self {
        Self::Invocation {
            invocation_id: Some(invocation_id.into()),
            target: target.to_string(),
            arguments,
        }
    }

    /// Encode as a terminated frame ready for the wire.
    pub fn to_frame(&self) -> String {
        let mut text = self.to_json().to_string();
        text.push(RECORD_SEPARATOR);
        text
    }

    /// Encode as a JSON object (no terminator).
    pub fn to_json(&self) -> Value {
        match self {
            Self::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!(kind::INVOCATION));
                if let Some(id) = invocation_id {
                    obj.insert("invocationId".into(), json!(id));
                }
                obj.insert("target".into(), json!(target));
                obj.insert("arguments".into(), Value::Array(arguments.clone()));
                Value::Object(obj)
            }
            Self::Completion {
                invocation_id,
                result,
                error,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!(kind::COMPLETION));
                obj.insert("invocationId".into(), json!(invocation_id));
                if let Some(result) = result {
                    obj.insert("result".into(), result.clone());
                }
                if let Some(error) = error {
                    obj.insert("error".into(), json!(error));
                }
                Value::Object(obj)
            }
            Self::Ping => json!({ "type": kind::PING }),
            Self::Close {
                error,
                allow_reconnect,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!(kind::CLOSE));
                if let Some(error) = error {
                    obj.insert("error".into(), json!(error));
                }
                obj.insert("allowReconnect".into(), json!(allow_reconnect));
                Value::Object(obj)
            }
            Self::Other(frame_type) => json!({ "type": frame_type }),
        }
    }

    /// Decode a single frame (terminator already stripped).
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(record).map_err(ProtocolError::Malformed)?;
        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidFrame("frame is not an object".into()))?;
        let frame_type = obj
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| ProtocolError::InvalidFrame("missing type".into()))?;

        match frame_type {
            kind::INVOCATION => {
                let target = obj
                    .get("target")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProtocolError::InvalidFrame("invocation without target".into()))?
                    .to_string();
                let arguments = match obj.get("arguments") {
                    Some(Value::Array(args)) => args.clone(),
                    None | Some(Value::Null) => Vec::new(),
                    Some(_) => {
                        return Err(ProtocolError::InvalidFrame(
                            "arguments is not an array".into(),
                        ))
                    }
                };
                Ok(Self::Invocation {
                    invocation_id: obj.get("invocationId").and_then(id_string),
                    target,
                    arguments,
                })
            }
            kind::COMPLETION => {
                let invocation_id = obj
                    .get("invocationId")
                    .and_then(id_string)
                    .ok_or_else(|| {
                        ProtocolError::InvalidFrame("completion without invocationId".into())
                    })?;
                Ok(Self::Completion {
                    invocation_id,
                    result: obj.get("result").cloned(),
                    error: obj.get("error").and_then(Value::as_str).map(str::to_string),
                })
            }
            kind::PING => Ok(Self::Ping),
            kind::CLOSE => Ok(Self::Close {
                error: obj.get("error").and_then(Value::as_str).map(str::to_string),
                allow_reconnect: obj
                    .get("allowReconnect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            other => Ok(Self::Other(other)),
        }
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Split a transport text payload into individual frames.
pub fn split_records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

/// The client's opening handshake frame.
pub fn handshake_request() -> String {
    let mut text = json!({ "protocol": "json", "version": 1 }).to_string();
    text.push(RECORD_SEPARATOR);
    text
}

/// Interpret the server's handshake response record.
pub fn parse_handshake_response(record: &str) -> Result<(), ProtocolError> {
    let value: Value = serde_json::from_str(record).map_err(ProtocolError::Malformed)?;
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(ProtocolError::HandshakeRejected(error.to_string())),
        None => Ok(()),
    }
}
