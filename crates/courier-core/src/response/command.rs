//! Outbound commands.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the implicit command used for bare text.
pub const MESSAGE: &str = "message";
/// Name of the presence command.
pub const PRESENCE: &str = "presence";
/// Name of the iq command.
pub const IQ: &str = "iq";

/// One outbound command: a name and its payload.
///
/// A bare string payload is stored as `{"body": text}`. Other non-mapping
/// payloads are kept as-is and rejected by the server when executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name (`message`, `presence`, `iq`, or a capability command).
    pub name: String,
    /// Command payload.
    pub payload: Value,
}

impl Command {
    /// Creates a command, normalizing a string payload into `{"body": ...}`.
    pub fn new(name: impl Into<String>, payload: impl Into<Value>) -> Self {
        let payload = match payload.into() {
            Value::String(body) => body_payload(body),
            other => other,
        };
        Self {
            name: name.into(),
            payload,
        }
    }

    /// A `message` command with the given body.
    pub fn message(body: impl Into<String>) -> Self {
        Self::new(MESSAGE, body_payload(body.into()))
    }

    /// A `presence` command with the given payload.
    pub fn presence(payload: Map<String, Value>) -> Self {
        Self::new(PRESENCE, Value::Object(payload))
    }

    /// An `iq` command with the given payload.
    pub fn iq(payload: Map<String, Value>) -> Self {
        Self::new(IQ, Value::Object(payload))
    }

    /// Sets `key` in a mapping payload. Has no effect on other payloads.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// The payload as a mapping, if it is one.
    pub fn payload_map(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }

    /// The `body` entry of the payload, if any.
    pub fn body(&self) -> Option<&str> {
        self.payload.get("body").and_then(Value::as_str)
    }
}

fn body_payload(body: String) -> Value {
    let mut map = Map::new();
    map.insert("body".to_owned(), Value::String(body));
    Value::Object(map)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.payload)
    }
}

impl From<&str> for Command {
    fn from(body: &str) -> Self {
        Self::message(body)
    }
}

impl From<String> for Command {
    fn from(body: String) -> Self {
        Self::message(body)
    }
}

impl<N: Into<String>> From<(N, Value)> for Command {
    fn from((name, payload): (N, Value)) -> Self {
        Self::new(name, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_text_is_message() {
        let cmd = Command::from("pong");
        assert_eq!(cmd.name, MESSAGE);
        assert_eq!(cmd.payload, json!({"body": "pong"}));
        assert_eq!(cmd.body(), Some("pong"));
    }

    #[test]
    fn test_string_payload_normalized() {
        let cmd = Command::new("presence", "away");
        assert_eq!(cmd.payload, json!({"body": "away"}));
    }

    #[test]
    fn test_with_sets_payload_keys() {
        let cmd = Command::message("hi").with("to", "bob@example.com");
        assert_eq!(cmd.payload, json!({"body": "hi", "to": "bob@example.com"}));
        let odd = Command::new("iq", json!(5)).with("to", "x");
        assert_eq!(odd.payload, json!(5));
    }
}
