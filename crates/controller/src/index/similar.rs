//! Similar-log-count query normalization. Strips the volatile parts of a
//! message (timestamps, UUIDs, hashes, IPs, bare numbers) down to a
//! handful of stable keywords. No regex crate in the dependency
//! stack — matched the way `scanner.rs` scans, by hand, over bytes.

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "her", "was", "one", "our", "out", "http",
    "https", "info", "get", "post", "put", "delete", "from", "has", "been", "moved", "will", "that", "this",
    "with", "have", "your", "usr", "local", "lib", "python", "site", "packages",
];

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn boundary_ok(bytes: &[u8], start: usize, end: usize) -> bool {
    let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
    let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
    before_ok && after_ok
}

/// `2024-01-17T15:30:00.000Z` or with a space separator, optional
/// fractional seconds, optional trailing `Z`.
fn match_iso_timestamp(bytes: &[u8], i: usize) -> Option<usize> {
    let digits_at = |pos: usize, n: usize| pos + n <= bytes.len() && bytes[pos..pos + n].iter().all(|b| b.is_ascii_digit());
    if !digits_at(i, 4) || bytes.get(i + 4) != Some(&b'-') || !digits_at(i + 5, 2) || bytes.get(i + 7) != Some(&b'-') || !digits_at(i + 8, 2) {
        return None;
    }
    let sep = bytes.get(i + 10)?;
    if *sep != b'T' && *sep != b' ' {
        return None;
    }
    if !digits_at(i + 11, 2) || bytes.get(i + 13) != Some(&b':') || !digits_at(i + 14, 2) || bytes.get(i + 16) != Some(&b':') || !digits_at(i + 17, 2) {
        return None;
    }
    let mut end = i + 19;
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            end += 1;
        }
    }
    if bytes.get(end) == Some(&b'Z') {
        end += 1;
    }
    Some(end - i)
}

/// `15:30:00` or `15:30:00.123`, word-bounded.
fn match_bare_time(bytes: &[u8], i: usize) -> Option<usize> {
    let digits_at = |pos: usize, n: usize| pos + n <= bytes.len() && bytes[pos..pos + n].iter().all(|b| b.is_ascii_digit());
    if !digits_at(i, 2) || bytes.get(i + 2) != Some(&b':') || !digits_at(i + 3, 2) || bytes.get(i + 5) != Some(&b':') || !digits_at(i + 6, 2) {
        return None;
    }
    let mut end = i + 8;
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            end += 1;
        }
    }
    if !boundary_ok(bytes, i, end) {
        return None;
    }
    Some(end - i)
}

/// `2024-01-17`, `2024/01/17`, `17-01-2024`, `17/01/2024`, word-bounded.
fn match_date(bytes: &[u8], i: usize) -> Option<usize> {
    let digits_at = |pos: usize, n: usize| pos + n <= bytes.len() && bytes[pos..pos + n].iter().all(|b| b.is_ascii_digit());
    let is_sep = |b: &u8| *b == b'-' || *b == b'/';

    if digits_at(i, 4) && bytes.get(i + 4).map(is_sep).unwrap_or(false) && digits_at(i + 5, 2) && bytes.get(i + 7).map(is_sep).unwrap_or(false) && digits_at(i + 8, 2) {
        let end = i + 10;
        if boundary_ok(bytes, i, end) {
            return Some(10);
        }
    }
    if digits_at(i, 2) && bytes.get(i + 2).map(is_sep).unwrap_or(false) && digits_at(i + 3, 2) && bytes.get(i + 5).map(is_sep).unwrap_or(false) && digits_at(i + 6, 4) {
        let end = i + 10;
        if boundary_ok(bytes, i, end) {
            return Some(10);
        }
    }
    None
}

/// `8-4-4-4-12` hex groups, case-insensitive.
fn match_uuid(bytes: &[u8], i: usize) -> Option<usize> {
    let hex_at = |pos: usize, n: usize| pos + n <= bytes.len() && bytes[pos..pos + n].iter().all(|b| b.is_ascii_hexdigit());
    if !hex_at(i, 8) || bytes.get(i + 8) != Some(&b'-') {
        return None;
    }
    if !hex_at(i + 9, 4) || bytes.get(i + 13) != Some(&b'-') {
        return None;
    }
    if !hex_at(i + 14, 4) || bytes.get(i + 18) != Some(&b'-') {
        return None;
    }
    if !hex_at(i + 19, 4) || bytes.get(i + 23) != Some(&b'-') {
        return None;
    }
    if !hex_at(i + 24, 12) {
        return None;
    }
    let end = i + 36;
    if !boundary_ok(bytes, i, end) {
        return None;
    }
    Some(36)
}

/// A standalone word-character run, length >= 12, entirely hex digits.
fn match_hex_id(bytes: &[u8], i: usize) -> Option<usize> {
    if i > 0 && is_word_byte(bytes[i - 1]) {
        return None;
    }
    let mut end = i;
    while end < bytes.len() && is_word_byte(bytes[end]) {
        end += 1;
    }
    let run = &bytes[i..end];
    if run.len() >= 12 && run.iter().all(|b| b.is_ascii_hexdigit()) {
        Some(run.len())
    } else {
        None
    }
}

/// `10.0.0.1`, word-bounded dotted quad.
fn match_ip(bytes: &[u8], i: usize) -> Option<usize> {
    let mut pos = i;
    for group in 0..4 {
        if group > 0 {
            if bytes.get(pos) != Some(&b'.') {
                return None;
            }
            pos += 1;
        }
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() && pos - start < 3 {
            pos += 1;
        }
        if pos == start {
            return None;
        }
    }
    if !boundary_ok(bytes, i, pos) {
        return None;
    }
    Some(pos - i)
}

/// A standalone run of digits, word-bounded.
fn match_standalone_number(bytes: &[u8], i: usize) -> Option<usize> {
    if i > 0 && is_word_byte(bytes[i - 1]) {
        return None;
    }
    let mut end = i;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == i || (end < bytes.len() && is_word_byte(bytes[end])) {
        return None;
    }
    Some(end - i)
}

type Matcher = fn(&[u8], usize) -> Option<usize>;

fn strip(input: &str, matcher: Matcher) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if let Some(len) = matcher(bytes, i) {
            out.push(b' ');
            i += len;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    // Safe: every matcher only ever consumes ASCII byte runs, so UTF-8
    // continuation bytes outside a match are untouched and still valid.
    String::from_utf8(out).unwrap_or_default()
}

fn blank_non_alphanumeric(input: &str) -> String {
    input.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' }).collect()
}

/// Normalizes a log message into a list of stable, meaningful keywords
/// (lowercase, length >= 3, stop-words removed), capped at 6.
pub fn extract_keywords(message: &str) -> Vec<String> {
    let mut s = message.to_string();
    s = strip(&s, match_iso_timestamp);
    s = strip(&s, match_bare_time);
    s = strip(&s, match_date);
    s = strip(&s, match_uuid);
    s = strip(&s, match_hex_id);
    s = strip(&s, match_ip);
    s = strip(&s, match_standalone_number);
    s = blank_non_alphanumeric(&s);

    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .take(6)
        .collect()
}

pub struct SimilarQuery {
    pub keywords: Vec<String>,
    pub minimum_should_match: usize,
}

/// Returns `None` when fewer than 2 meaningful words remain — the caller
/// should report a count of 0 rather than issue an overly broad query.
pub fn build_similar_query(message: &str) -> Option<SimilarQuery> {
    let keywords = extract_keywords(message);
    if keywords.len() < 2 {
        return None;
    }
    let minimum_should_match = (keywords.len() / 2).max(2);
    Some(SimilarQuery { keywords, minimum_should_match })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_iso_timestamp_and_keeps_words() {
        let kws = extract_keywords("2024-01-17T15:30:00.123Z connection refused to database");
        assert!(kws.contains(&"connection".to_string()));
        assert!(kws.contains(&"refused".to_string()));
        assert!(kws.contains(&"database".to_string()));
    }

    #[test]
    fn strips_uuid_and_hex_id_and_ip() {
        let kws = extract_keywords("request 550e8400-e29b-41d4-a716-446655440000 from 10.0.0.5 container a1b2c3d4e5f60708 failed validation");
        assert!(!kws.iter().any(|w| w.contains('-') || w.chars().all(|c| c.is_ascii_hexdigit())));
        assert!(kws.contains(&"request".to_string()) || kws.contains(&"failed".to_string()));
    }

    #[test]
    fn only_stopwords_and_digits_and_uuid_yields_zero_keywords() {
        let kws = extract_keywords("the and for 12345 550e8400-e29b-41d4-a716-446655440000");
        assert!(kws.is_empty());
        assert!(build_similar_query("the and for 12345 550e8400-e29b-41d4-a716-446655440000").is_none());
    }

    #[test]
    fn minimum_should_match_is_half_rounded_down_floored_at_two() {
        let q = build_similar_query("timeout waiting connection pool exhausted retry later").unwrap();
        assert_eq!(q.keywords.len(), 6);
        assert_eq!(q.minimum_should_match, 3);
    }

    #[test]
    fn single_meaningful_word_returns_none() {
        assert!(build_similar_query("error").is_none());
    }
}
