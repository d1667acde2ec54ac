//! Connection state.
//!
//! The source represents `Handshaking`/`Running` as bitflag unions over the five states. Spec.md
//! §9 allows either a bitset or membership predicates over a single enum; this crate picks
//! predicates, since Rust's exhaustive `match` makes the five-state enum easy to keep honest and
//! a predicate method reads no worse than a flag check at call sites.

/// One of the five states a [`crate::Session`] can be in. Exactly one is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// `Connecting` or `Reconnecting`: a handshake response is still expected.
    pub fn is_handshaking(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }

    /// `Connecting`, `Reconnecting`, or `Connected`: `start()` has run and `stop()` hasn't
    /// finished tearing things down.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting | ConnectionState::Connected
        )
    }
}
