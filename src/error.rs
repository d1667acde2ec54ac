//! Public error taxonomy.

use thiserror::Error;

/// Errors surfaced across the public API of [`crate::Session`].
///
/// Connection-level failures (negotiate rejection, handshake rejection, transport errors) aren't
/// among these: they never abort a synchronous call, they surface asynchronously as the reason
/// string passed to [`crate::Session::on_close`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// No `Completion` arrived for an invocation within the invoke timeout.
    #[error("invoke timed out waiting for a result")]
    InvokeTimeout,

    /// Encoding or writing a frame to the transport failed.
    #[error("failed to send message to transport")]
    SendTransport(#[source] anyhow::Error),

    /// `invoke`/`send` called while the session isn't in the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// `stop()` was called from another task and the worker didn't exit after 5 join attempts.
    #[error("failed to close connection")]
    ConnectionClosing,

    /// A builder/caller-supplied value failed validation before any I/O was attempted.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// `target` passed to `on`/`invoke`/`send` was empty.
    #[error("target name must not be empty")]
    InvalidTarget,

    /// `invoke`/`send` called with something other than a JSON array of arguments.
    #[error("arguments must be a JSON array")]
    InvalidArguments,
}

pub type Result<T> = std::result::Result<T, SessionError>;
