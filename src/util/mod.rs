//! Utility modules

pub mod paths;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use paths::{default_log_dir, log_file_path};

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `true` when the full duration elapsed and `false` when the sleep
/// was cut short by cancellation.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Truncate `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render a duration as `"{m}m {s}s"`.
pub fn format_minutes(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// Render a duration as `"{h}h {m}m {s}s"`.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, rem) = (secs / 3600, secs % 3600);
    format!("{}h {}m {}s", hours, rem / 60, rem % 60)
}
