//! Registry of locally-registered handlers for server-initiated invocations.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// A handler for a server-initiated `Invocation` targeting some named method.
pub type Handler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Ordered `(target, handler)` pairs. `on` appends, `off` removes every entry for a target;
/// multiple handlers registered for the same target fire in registration order.
#[derive(Default)]
pub struct EventHandlerRegistry {
    entries: Mutex<Vec<(String, Handler)>>,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, target: &str, handler: Handler) {
        self.entries.lock().push((target.to_owned(), handler));
    }

    pub fn off(&self, target: &str) {
        self.entries.lock().retain(|(name, _)| name != target);
    }

    /// Handlers registered for `target`, in registration order. Snapshot taken under the lock so
    /// dispatch can run the handlers without holding it.
    pub fn handlers_for(&self, target: &str) -> Vec<Handler> {
        self.entries
            .lock()
            .iter()
            .filter(|(name, _)| name == target)
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }
}
