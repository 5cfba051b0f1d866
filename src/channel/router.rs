//! Inbound frame dispatch by `type` tag

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// What happened to one inbound text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered to this many handlers
    Handled(usize),
    /// Valid frame, nobody registered for its type
    Unhandled(String),
    /// Not JSON, not an object, or no string `type`
    Malformed,
}

/// Registry of frame handlers keyed by the frame's `type`
#[derive(Default)]
pub struct Router {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler receiving the whole frame object
    pub fn on_raw<F>(&self, frame_type: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(frame_type.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Registers a typed handler. Frames that do not decode into `T` are
    /// logged and dropped.
    pub fn on<T, F>(&self, frame_type: &str, handler: F)
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = frame_type.to_string();
        self.on_raw(frame_type, move |value| {
            match serde_json::from_value::<T>(value) {
                Ok(frame) => handler(frame),
                Err(e) => tracing::warn!("Dropping malformed '{}' frame: {}", name, e),
            }
        });
    }

    /// Parses one text frame and hands it to the handlers of its type
    pub fn dispatch(&self, text: &str) -> Dispatch {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Dropping unparsable frame: {}", e);
                return Dispatch::Malformed;
            }
        };

        let Some(frame_type) = value.get("type").and_then(Value::as_str) else {
            tracing::warn!("Dropping frame without type tag");
            return Dispatch::Malformed;
        };
        let frame_type = frame_type.to_string();

        // Handlers run without the lock held
        let handlers = self.handlers.read().get(&frame_type).cloned();

        match handlers {
            Some(handlers) if !handlers.is_empty() => {
                for handler in &handlers {
                    handler(value.clone());
                }
                Dispatch::Handled(handlers.len())
            }
            _ => {
                tracing::trace!("No handler for frame type '{}'", frame_type);
                Dispatch::Unhandled(frame_type)
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("Router")
            .field("types", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn test_typed_dispatch() {
        let router = Router::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        router.on("ping", move |ping: Ping| sink.lock().push(ping.seq));

        assert_eq!(router.dispatch(r#"{"type":"ping","seq":1}"#), Dispatch::Handled(1));
        assert_eq!(router.dispatch(r#"{"type":"ping","seq":2}"#), Dispatch::Handled(1));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let router = Router::new();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        router.on("ping", move |_: Ping| *sink.lock() += 1);

        assert_eq!(router.dispatch("{not json"), Dispatch::Malformed);
        assert_eq!(router.dispatch(r#"["type","ping"]"#), Dispatch::Malformed);
        assert_eq!(router.dispatch(r#"{"seq":1}"#), Dispatch::Malformed);
        assert_eq!(router.dispatch(r#"{"type":3}"#), Dispatch::Malformed);
        // Payload does not fit the handler type: handler skipped
        assert_eq!(router.dispatch(r#"{"type":"ping","seq":"x"}"#), Dispatch::Handled(1));
        assert_eq!(*seen.lock(), 0);

        assert_eq!(router.dispatch(r#"{"type":"ping","seq":5}"#), Dispatch::Handled(1));
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let router = Router::new();
        assert_eq!(
            router.dispatch(r#"{"type":"mystery"}"#),
            Dispatch::Unhandled("mystery".to_string())
        );
    }
}
