//! Logging helpers.
//!
//! This crate only calls into `tracing`; installing a subscriber is left to the embedding
//! application, the same split the teacher crate makes between its library modules (which just
//! call `info!`/`debug!`/etc.) and its `main.rs` (which installs a `tracing_subscriber::Registry`).
//!
//! `configureLogging`'s `socketTrace` knob from the source becomes "enable `trace!` on the
//! `signalr_client::transport` target", which `tracing_subscriber::EnvFilter` already supports
//! (`RUST_LOG=signalr_client::transport=trace`) with no code here at all.

use std::borrow::Cow;

const SLICE_HEAD: usize = 100;
const SLICE_TAIL: usize = 100;
const SLICE_THRESHOLD: usize = 300;

/// Truncate a long payload for a debug-level log line, keeping a head and tail window. Mirrors
/// `Util.getSliced`, but driven by `tracing`'s own level check at each call site rather than a
/// hand-rolled global log-level comparison.
///
/// Slices by character, not by byte: a byte-offset slice can land inside a multibyte UTF-8
/// character and panic, which `Util.getSliced`'s character-based slicing never could.
pub fn truncate_for_log(payload: &str) -> Cow<'_, str> {
    if payload.chars().count() < SLICE_THRESHOLD {
        return Cow::Borrowed(payload);
    }
    let head: String = payload.chars().take(SLICE_HEAD).collect();
    let tail: String = payload
        .chars()
        .rev()
        .take(SLICE_TAIL)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    Cow::Owned(format!("{head} ... {tail}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payloads_pass_through_unchanged() {
        assert_eq!(truncate_for_log("short"), "short");
    }

    #[test]
    fn long_payloads_are_truncated() {
        let payload = "x".repeat(500);
        let truncated = truncate_for_log(&payload);
        assert!(truncated.len() < payload.len());
        assert!(truncated.contains("..."));
    }

    #[test]
    fn does_not_panic_on_multibyte_chars_at_the_slice_boundary() {
        let mut payload = "x".repeat(99);
        payload.push('🎉');
        payload.push_str(&"x".repeat(400));
        let truncated = truncate_for_log(&payload);
        assert!(truncated.contains("..."));
    }
}
