use chrono::{TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Retrieves the current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    let since_the_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch");
    since_the_epoch.as_secs()
}

/// Renders a Unix timestamp as RFC3339, the format lifecycle events use on
/// the wire (`start_time`, `timestamp`).
pub fn to_rfc3339(timestamp: u64) -> String {
    Utc.timestamp_opt(timestamp as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "invalid timestamp".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_timestamp_is_monotonic_enough() {
        let first = current_timestamp();
        let second = current_timestamp();
        assert!(second >= first);
    }

    #[test]
    fn rfc3339_round_trips_a_known_instant() {
        assert_eq!(to_rfc3339(0), "1970-01-01T00:00:00+00:00");
    }
}
