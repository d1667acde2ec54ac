//! Correlates `Completion` messages back to the `invoke` call awaiting them.
//!
//! The source scans a list of `{invocationId, queue}` pairs; this is the typed-language
//! generalization spec.md §9 asks for: a map from `invocationId` to a single-slot rendezvous
//! (here a `tokio::sync::oneshot`).

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

/// What a `Completion` delivers to the waiting `invoke` call: the `result` field on success, or
/// the `error` field when no result was given (see spec.md §4.4 and the open question in §9).
#[derive(Debug, Clone)]
pub enum InvocationOutcome {
    Result(Value),
    Error(String),
}

#[derive(Default)]
pub struct PendingInvocations {
    entries: Mutex<HashMap<String, oneshot::Sender<InvocationOutcome>>>,
}

impl PendingInvocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh invocation, returning the receiving half of its rendezvous.
    pub fn register(&self, invocation_id: String) -> oneshot::Receiver<InvocationOutcome> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(invocation_id, tx);
        rx
    }

    /// Remove a registration without delivering anything, e.g. after an invoke timeout.
    pub fn remove(&self, invocation_id: &str) {
        self.entries.lock().remove(invocation_id);
    }

    /// Deliver a `Completion`'s outcome to its matching pending invocation, if any is still
    /// registered. Unknown invocation ids (already timed out, or never ours) are dropped silently.
    pub fn complete(&self, invocation_id: &str, outcome: InvocationOutcome) {
        if let Some(tx) = self.entries.lock().remove(invocation_id) {
            // the receiver may have already timed out and been dropped; that's fine, there's
            // nothing left to deliver to.
            let _ = tx.send(outcome);
        }
    }

    /// Drop every pending invocation, e.g. on entering `Connected` (spec.md §4.4) or on stop.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn completion_delivers_result_to_registered_invocation() {
        let pending = PendingInvocations::new();
        let rx = pending.register("abc".into());
        pending.complete("abc", InvocationOutcome::Result(json!(42)));
        match rx.await.unwrap() {
            InvocationOutcome::Result(v) => assert_eq!(v, json!(42)),
            InvocationOutcome::Error(_) => panic!("expected result"),
        }
    }

    #[test]
    fn unknown_invocation_id_is_dropped_silently() {
        let pending = PendingInvocations::new();
        pending.complete("nope", InvocationOutcome::Result(json!(1)));
    }

    #[test]
    fn removed_invocation_is_not_completable() {
        let pending = PendingInvocations::new();
        let rx = pending.register("abc".into());
        pending.remove("abc");
        pending.complete("abc", InvocationOutcome::Result(json!(1)));
        drop(rx);
    }

    #[test]
    fn clear_drops_all_pending() {
        let pending = PendingInvocations::new();
        let _rx1 = pending.register("a".into());
        let _rx2 = pending.register("b".into());
        pending.clear();
        // after clear, completions for either id are silently dropped
        pending.complete("a", InvocationOutcome::Result(json!(1)));
    }
}
