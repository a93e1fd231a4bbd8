//! Time utilities and constants for the wallet ledger.

use chrono::{DateTime, Duration, Utc};

/// Timing constants.
pub mod constants {
    use super::Duration;

    /// How long a fetched rate snapshot is served without refreshing (24 hours).
    pub fn rate_freshness_window() -> Duration {
        Duration::hours(24)
    }

    /// Upstream rate fetch timeout (10 seconds).
    pub fn rate_fetch_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check if `timestamp` is less than `window` old.
pub fn is_within(timestamp: Timestamp, window: Duration) -> bool {
    now().signed_duration_since(timestamp) < window
}
