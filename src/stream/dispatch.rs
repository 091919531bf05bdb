//! Named event routing.
//!
//! Handlers are registered once per `connect` and survive transport
//! replacement; the connection only forwards events from the current
//! generation, so the registry itself is generation-agnostic.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;
use tracing::debug;

/// Event names emitted by the flag stream service.
///
/// Equality and hashing follow the wire name, so `Other("put")` and `Put`
/// are the same key.
#[derive(Clone, Debug)]
pub enum StreamEventName {
    /// Full flag set replacement.
    Put,
    /// Single flag update.
    Patch,
    /// Single flag removal.
    Delete,
    /// Signal to re-fetch flags out of band.
    Ping,
    /// Any other event name.
    Other(String),
}

impl StreamEventName {
    /// Returns the name as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::Ping => "ping",
            Self::Other(name) => name,
        }
    }
}

impl PartialEq for StreamEventName {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StreamEventName {}

impl Hash for StreamEventName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl From<&str> for StreamEventName {
    fn from(name: &str) -> Self {
        match name {
            "put" => Self::Put,
            "patch" => Self::Patch,
            "delete" => Self::Delete,
            "ping" => Self::Ping,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StreamEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type RawCallback = Box<dyn FnMut(&str) + Send>;
type JsonCallback = Box<dyn FnMut(Value) + Send>;

/// Callback for a named event. The variant decides how the payload is
/// delivered.
pub enum EventHandler {
    /// Receives the payload text unchanged.
    Raw(RawCallback),
    /// Receives the payload parsed as JSON. Payloads that fail to parse are
    /// dropped.
    Json(JsonCallback),
}

impl EventHandler {
    /// Wraps a callback that takes the raw payload.
    pub fn raw<F>(callback: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        Self::Raw(Box::new(callback))
    }

    /// Wraps a callback that takes the parsed JSON payload.
    pub fn json<F>(callback: F) -> Self
    where
        F: FnMut(Value) + Send + 'static,
    {
        Self::Json(Box::new(callback))
    }

    fn invoke(&mut self, name: &str, data: &str) {
        match self {
            Self::Raw(callback) => callback(data),
            Self::Json(callback) => match serde_json::from_str(data) {
                Ok(value) => callback(value),
                Err(err) => {
                    debug!(event = "stream_payload_invalid", name, error = %err);
                }
            },
        }
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(_) => f.write_str("EventHandler::Raw"),
            Self::Json(_) => f.write_str("EventHandler::Json"),
        }
    }
}

/// Event name to handler mapping supplied at `connect`.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StreamEventName, EventHandler>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name`, replacing any previous handler.
    pub fn on(mut self, name: impl Into<StreamEventName>, handler: EventHandler) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Whether a handler exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&StreamEventName::from(name))
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invokes the handler registered for `name`. Returns `false` when no
    /// handler matched.
    pub fn dispatch(&mut self, name: &str, data: &str) -> bool {
        match self.handlers.get_mut(&StreamEventName::from(name)) {
            Some(handler) => {
                handler.invoke(name, data);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::{EventHandler, HandlerRegistry, StreamEventName};

    #[test]
    fn known_names_round_trip() {
        for name in ["put", "patch", "delete", "ping"] {
            let parsed = StreamEventName::from(name);
            assert!(!matches!(parsed, StreamEventName::Other(_)));
            assert_eq!(parsed.as_str(), name);
        }
        assert_eq!(
            StreamEventName::from("custom"),
            StreamEventName::Other("custom".to_string())
        );
    }

    #[test]
    fn raw_handler_receives_payload_unchanged() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new().on(
            StreamEventName::Ping,
            EventHandler::raw(move |data| sink.lock().expect("lock").push(data.to_string())),
        );

        assert!(registry.dispatch("ping", "not json"));
        assert_eq!(*seen.lock().expect("lock"), vec!["not json".to_string()]);
    }

    #[test]
    fn json_handler_receives_parsed_value() {
        let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
        let sink = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new().on(
            "patch",
            EventHandler::json(move |value| sink.lock().expect("lock").push(value)),
        );

        assert!(registry.dispatch("patch", r#"{"key":"flag-a","value":true}"#));
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![json!({"key": "flag-a", "value": true})]
        );
    }

    #[test]
    fn json_handler_skips_malformed_payload() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let mut registry = HandlerRegistry::new().on(
            "put",
            EventHandler::json(move |_| *counter.lock().expect("lock") += 1),
        );

        assert!(registry.dispatch("put", "{truncated"));
        assert_eq!(*calls.lock().expect("lock"), 0);
    }

    #[test]
    fn unknown_names_are_discarded() {
        let mut registry = HandlerRegistry::new().on("put", EventHandler::raw(|_| {}));
        assert!(!registry.dispatch("delete", "{}"));
        assert!(!registry.dispatch("PUT", "{}"));
        assert!(registry.contains("put"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn other_variant_matches_known_wire_name() {
        let hits = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&hits);
        let mut registry = HandlerRegistry::new().on(
            StreamEventName::Other("put".to_string()),
            EventHandler::raw(move |_| *counter.lock().expect("lock") += 1),
        );

        assert_eq!(StreamEventName::Other("put".to_string()), StreamEventName::Put);
        assert!(registry.contains("put"));
        assert!(registry.dispatch("put", "{}"));
        assert_eq!(*hits.lock().expect("lock"), 1);
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let seen = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new()
            .on("put", EventHandler::raw(move |_| first.lock().expect("lock").push("first")))
            .on("put", EventHandler::raw(move |_| second.lock().expect("lock").push("second")));

        registry.dispatch("put", "{}");
        assert_eq!(*seen.lock().expect("lock"), vec!["second"]);
    }
}
