use serde_json::{Map, Value};

/// Tag of incremental text events.
pub const TOKEN_EVENT: &str = "token";
/// Tag of message events carrying content blocks and tool-call descriptors.
pub const ADD_MESSAGE_EVENT: &str = "add_message";
/// Tag of the terminal event carrying final outputs.
pub const END_EVENT: &str = "end";

/// One reconstructed `{event, data}` record from a run response.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamEvent {
    pub event: String,
    pub data: Map<String, Value>,
}

impl StreamEvent {
    pub fn new(event: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Builds an event from a record that must carry a string `event` and an
    /// object `data`.
    pub(crate) fn from_tagged(record: Value) -> Option<Self> {
        let Value::Object(mut obj) = record else {
            return None;
        };
        let Some(Value::String(event)) = obj.remove("event") else {
            return None;
        };
        let Some(Value::Object(data)) = obj.remove("data") else {
            return None;
        };
        Some(Self { event, data })
    }

    /// Builds an event from any parsed object, defaulting a missing tag to an
    /// empty string and a missing or non-object `data` to an empty map.
    pub(crate) fn from_lenient(record: Value) -> Self {
        let mut obj = match record {
            Value::Object(obj) => obj,
            _ => Map::new(),
        };
        let event = match obj.remove("event") {
            Some(Value::String(event)) => event,
            _ => String::new(),
        };
        let data = match obj.remove("data") {
            Some(Value::Object(data)) => data,
            _ => Map::new(),
        };
        Self { event, data }
    }

    pub fn is(&self, tag: &str) -> bool {
        self.event == tag
    }

    /// Returns `data.chunk` for `token` events.
    pub fn token_chunk(&self) -> Option<&str> {
        if !self.is(TOKEN_EVENT) {
            return None;
        }
        self.data.get("chunk").and_then(Value::as_str)
    }

    /// Returns `data.result.session_id` for `end` events.
    pub fn session_id(&self) -> Option<&str> {
        if !self.is(END_EVENT) {
            return None;
        }
        self.data
            .get("result")
            .and_then(|r| r.get("session_id"))
            .and_then(Value::as_str)
    }
}
