//! Normalization of history endpoint bodies.
//!
//! The history endpoint has shipped several response shapes. All of these
//! normalize to the same list of messages:
//!
//! ```text
//! [ {message}, ... ]
//! { "result": [ {message}, ... ] }
//! { "result": { "messages": [ {message}, ... ] } }
//! ```
//!
//! Anything else is [`FetchError::UnexpectedShape`]. Collapse this to one
//! shape if the backend contract is ever pinned down.

use livechat_types::{ChatMessage, FetchError, InvalidMessage};
use serde_json::Value;

/// Messages extracted from one history response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    /// Elements that decoded into messages, in response order.
    pub messages: Vec<ChatMessage>,
    /// Elements that did not, with their position in the array.
    pub invalid: Vec<(usize, InvalidMessage)>,
}

/// Parse a raw response body.
pub fn parse_history(body: &str) -> Result<HistoryPage, FetchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::UnexpectedShape(format!("body is not JSON: {}", e)))?;
    normalize(&value)
}

/// Normalize an already-decoded response body.
pub fn normalize(body: &Value) -> Result<HistoryPage, FetchError> {
    let items = locate_array(body)?;

    let mut page = HistoryPage::default();
    for (index, item) in items.iter().enumerate() {
        match ChatMessage::from_value(item) {
            Ok(message) => page.messages.push(message),
            Err(err) => page.invalid.push((index, err)),
        }
    }
    Ok(page)
}

fn locate_array(body: &Value) -> Result<&Vec<Value>, FetchError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(obj) => match obj.get("result") {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Object(result)) => match result.get("messages") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(FetchError::UnexpectedShape(
                    "result object has no messages array".into(),
                )),
            },
            _ => Err(FetchError::UnexpectedShape(
                "object has no result field".into(),
            )),
        },
        other => Err(FetchError::UnexpectedShape(format!(
            "expected array or object, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
