//! ID generation utilities for Cadence
//!
//! Provides functions for generating unique identifiers for executions,
//! reservations, merge requests, and events.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn stamped(prefix: &str) -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("{}-{}-{:04x}", prefix, timestamp, random)
}

/// Generate a unique execution ID
///
/// Format: `exe-{timestamp_ms}-{random_hex}`
/// Example: `exe-1738300800123-a1b2`
pub fn generate_execution_id() -> String {
    stamped("exe")
}

/// Generate a reservation ID
///
/// Format: `rsv-{timestamp_ms}-{random_hex}`
pub fn generate_reservation_id() -> String {
    stamped("rsv")
}

/// Generate a merge request ID
///
/// Format: `mrg-{timestamp_ms}-{random_hex}`
pub fn generate_merge_id() -> String {
    stamped("mrg")
}

/// Generate an event ID
///
/// Format: `evt-{timestamp_ms}-{random_hex}`
pub fn generate_event_id() -> String {
    stamped("evt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        // Should be after 2020-01-01 and before 2100-01-01
        assert!(ts > 1577836800000);
        assert!(ts < 4102444800000);
    }

    #[test]
    fn test_generate_execution_id_format() {
        let id = generate_execution_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "exe");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_execution_id_uniqueness() {
        let id1 = generate_execution_id();
        let id2 = generate_execution_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_generate_reservation_id_prefix() {
        assert!(generate_reservation_id().starts_with("rsv-"));
    }

    #[test]
    fn test_generate_merge_id_prefix() {
        assert!(generate_merge_id().starts_with("mrg-"));
    }

    #[test]
    fn test_generate_event_id_prefix() {
        assert!(generate_event_id().starts_with("evt-"));
    }
}
