//! Deterministic document IDs. Every write is keyed so retries and
//! replays land on the same document instead of duplicating it.

use md5::{Digest, Md5};

use crate::model::LogEntry;

fn hex_digest(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `md5(host:container_id:ts_iso:first_100_chars_of_message)`
pub fn log_id(entry: &LogEntry) -> String {
    let truncated: String = entry.message.chars().take(100).collect();
    hex_digest(&format!("{}:{}:{}:{}", entry.host, entry.container_id, entry.timestamp.to_rfc3339(), truncated))
}

/// `md5(host:id:ts)` for container stats.
pub fn container_stats_id(host: &str, container_id: &str, ts: &chrono::DateTime<chrono::Utc>) -> String {
    hex_digest(&format!("{}:{}:{}", host, container_id, ts.to_rfc3339()))
}

/// `md5(host:ts)` for host metrics.
pub fn host_metrics_id(host: &str, ts: &chrono::DateTime<chrono::Utc>) -> String {
    hex_digest(&format!("{}:{}", host, ts.to_rfc3339()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogStream;
    use chrono::TimeZone;

    fn sample_entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            host: "host-a".to_string(),
            container_id: "abc123".to_string(),
            container_name: "web".to_string(),
            stack_project: None,
            stack_service: None,
            stream: LogStream::Stdout,
            message: message.to_string(),
            level: None,
            http_status: None,
            parsed_fields: None,
        }
    }

    #[test]
    fn log_id_is_deterministic() {
        let a = sample_entry("hello world");
        let b = sample_entry("hello world");
        assert_eq!(log_id(&a), log_id(&b));
    }

    #[test]
    fn log_id_only_considers_first_100_chars_of_message() {
        let long_message = "x".repeat(200);
        let a = sample_entry(&format!("{}tail-one", long_message));
        let b = sample_entry(&format!("{}tail-two", long_message));
        assert_eq!(log_id(&a), log_id(&b));
    }

    #[test]
    fn container_stats_id_changes_with_timestamp() {
        let ts_a = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ts_b = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        assert_ne!(container_stats_id("host-a", "c1", &ts_a), container_stats_id("host-a", "c1", &ts_b));
    }
}
