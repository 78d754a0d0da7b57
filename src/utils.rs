//! Utility functions for the race room bot

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

/// Generate a correlation id for an outbound chat message
pub fn generate_guid() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Truncate text to at most `max_chars` characters without splitting a character
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Build an absolute URL from a scheme, host and path fragment
pub fn build_uri(scheme: &str, host: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}://{}{}", scheme, host, path)
    } else {
        format!("{}://{}/{}", scheme, host, path)
    }
}

/// Resolves once shutdown is signalled or the sending side is gone
///
/// The borrow guard from `wait_for` is dropped here so callers can race this
/// inside `select!` loops that await in their other arms.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
