//! Single-pass log line scanner: detects a severity level and an HTTP
//! status code in one walk over the line, since the collector's log loop
//! runs this once per ingested line and can't afford independent
//! regex passes (or regex recompilation) on a hot path.

const LEVELS: &[(&str, &str)] = &[
    ("CRITICAL", "CRITICAL"),
    ("FATAL", "FATAL"),
    ("ERROR", "ERROR"),
    ("WARNING", "WARN"),
    ("WARN", "WARN"),
    ("INFO", "INFO"),
    ("DEBUG", "DEBUG"),
    ("TRACE", "TRACE"),
];

/// Scans a log message for a severity level keyword and a standalone
/// 3-digit HTTP status code (100-599), returning whichever is found.
/// Case-insensitive on the level keyword; the status code must be
/// bounded by non-digit characters (or line edges) to avoid matching
/// into a longer number.
pub fn scan(message: &str) -> (Option<String>, Option<u16>) {
    let mut level = None;
    let upper_checked = message.len() < 4096; // guard against pathological lines
    if upper_checked {
        for (needle, canonical) in LEVELS {
            if contains_ignore_case(message, needle) {
                level = Some((*canonical).to_string());
                break;
            }
        }
    }

    let status = find_status_code(message);
    (level, status)
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    let haystack_bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    if needle_bytes.len() > haystack_bytes.len() {
        return false;
    }
    haystack_bytes
        .windows(needle_bytes.len())
        .any(|w| w.eq_ignore_ascii_case(needle_bytes))
}

fn find_status_code(message: &str) -> Option<u16> {
    let bytes = message.as_bytes();
    let mut i = 0;
    while i + 3 <= bytes.len() {
        let is_digit_run = bytes[i..i + 3].iter().all(|b| b.is_ascii_digit());
        let boundary_before = i == 0 || !bytes[i - 1].is_ascii_digit();
        let boundary_after = i + 3 == bytes.len() || !bytes[i + 3].is_ascii_digit();
        if is_digit_run && boundary_before && boundary_after {
            let code: u16 = std::str::from_utf8(&bytes[i..i + 3]).ok()?.parse().ok()?;
            if (100..600).contains(&code) {
                return Some(code);
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_error_level() {
        let (level, _) = scan("2024 ERROR something broke");
        assert_eq!(level.as_deref(), Some("ERROR"));
    }

    #[test]
    fn detects_level_case_insensitively() {
        let (level, _) = scan("request failed: error connecting to db");
        assert_eq!(level.as_deref(), Some("ERROR"));
    }

    #[test]
    fn warning_normalizes_to_warn() {
        let (level, _) = scan("WARNING: disk almost full");
        assert_eq!(level.as_deref(), Some("WARN"));
    }

    #[test]
    fn detects_standalone_status_code() {
        let (_, status) = scan("GET /api/users 404 15ms");
        assert_eq!(status, Some(404));
    }

    #[test]
    fn does_not_match_digits_inside_a_longer_number() {
        let (_, status) = scan("processed 14045 records");
        assert_eq!(status, None);
    }

    #[test]
    fn ignores_status_code_outside_valid_range() {
        let (_, status) = scan("port 8080 opened");
        assert_eq!(status, None);
    }

    #[test]
    fn returns_none_for_plain_message() {
        let (level, status) = scan("server started on port 3000");
        assert_eq!(level, None);
        assert_eq!(status, None);
    }
}
