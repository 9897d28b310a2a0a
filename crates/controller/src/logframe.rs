//! Parsing for Docker's raw log formats: the multiplexed stream frame
//! format used when talking to the daemon's HTTP API directly, and the
//! RFC3339-prefixed plain-text lines `docker logs --timestamps` produces.
//!
//! Also home to the small host-metrics text scrapers (`/proc/stat`, GPU
//! vendor tool output) since they share the same "parse one blob of text
//! into a typed sample" shape.

use chrono::{DateTime, Utc};

use crate::model::GpuSample;

pub struct RawLogFrame {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

pub struct DemuxedFrame {
    pub stderr: bool,
    pub payload: Vec<u8>,
}

/// Splits a Docker multiplexed stream into its component frames.
///
/// Frame layout: `[1-byte stream type][3 bytes padding][4-byte big-endian
/// size][size bytes payload]`. Stream type 2 is stderr; everything else
/// (0 = stdin, 1 = stdout) is treated as stdout. Returns an empty vec if
/// the header doesn't parse as a frame sequence — callers should fall
/// back to treating the blob as single-stream plain text.
pub fn demux_frames(data: &[u8]) -> Vec<DemuxedFrame> {
    let mut frames = Vec::new();
    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        let stream_type = data[offset];
        if stream_type > 2 {
            return Vec::new();
        }
        let size = u32::from_be_bytes([data[offset + 4], data[offset + 5], data[offset + 6], data[offset + 7]]) as usize;
        let payload_start = offset + 8;
        let payload_end = payload_start + size;
        if payload_end > data.len() {
            return Vec::new();
        }
        frames.push(DemuxedFrame {
            stderr: stream_type == 2,
            payload: data[payload_start..payload_end].to_vec(),
        });
        offset = payload_end;
    }
    if offset != data.len() {
        return Vec::new();
    }
    frames
}

/// Splits a blob of (possibly multi-line) timestamped log text into
/// individual entries, decoding as UTF-8 with lossy replacement and
/// truncating fractional seconds to microsecond precision.
pub fn split_timestamped_lines(data: &[u8]) -> Vec<RawLogFrame> {
    let text = String::from_utf8_lossy(data);
    text.lines()
        .filter(|l| !l.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((ts, rest)) => match parse_rfc3339_flexible(ts) {
                Some(dt) => RawLogFrame { timestamp: dt, message: rest.to_string() },
                None => RawLogFrame { timestamp: Utc::now(), message: line.to_string() },
            },
            None => RawLogFrame { timestamp: Utc::now(), message: line.to_string() },
        })
        .collect()
}

fn parse_rfc3339_flexible(ts: &str) -> Option<DateTime<Utc>> {
    // Truncate fractional-seconds precision beyond microseconds before
    // parsing — chrono rejects some nanosecond-precision variants with
    // trailing zeros Docker emits.
    let truncated = match ts.split_once('.') {
        Some((whole, frac_and_zone)) => {
            let zone_start = frac_and_zone.find(|c: char| c == 'Z' || c == '+' || c == '-').unwrap_or(frac_and_zone.len());
            let (frac, zone) = frac_and_zone.split_at(zone_start);
            let frac = &frac[..frac.len().min(6)];
            format!("{whole}.{frac}{zone}")
        }
        None => ts.to_string(),
    };
    DateTime::parse_from_rfc3339(&truncated).map(|dt| dt.with_timezone(&Utc)).ok()
}

/// Known-noise lines dropped before indexing: empty after trimming, or a
/// small set of daemon-injected keepalive/healthcheck chatter.
pub fn is_noise(message: &str) -> bool {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return true;
    }
    const NOISE_PATTERNS: &[&str] = &["\u{0}", "healthcheck: ok"];
    NOISE_PATTERNS.iter().any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Computes the fraction of CPU time spent non-idle from two `/proc/stat`
/// `cpu ` lines sampled a short interval apart isn't available remotely in
/// one shot, so this parses a single snapshot and estimates busy fraction
/// from the instantaneous idle/total ratio it contains.
pub fn parse_proc_stat_busy_fraction(line: &str) -> Option<f64> {
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse::<u64>().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3];
    let total: u64 = fields.iter().sum();
    if total == 0 {
        return None;
    }
    Some(1.0 - (idle as f64 / total as f64))
}

pub fn parse_rocm_smi(json: &str) -> Option<GpuSample> {
    let v: serde_json::Value = serde_json::from_str(json).ok()?;
    let card = v.as_object()?.values().next()?;
    let utilization_percent = card
        .get("GPU use (%)")
        .and_then(|x| x.as_str())
        .and_then(|s| s.parse::<f64>().ok())?;
    let vram_used_mb = card
        .get("GPU memory use (%)")
        .and_then(|x| x.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(GpuSample {
        utilization_percent,
        vram_used_mb,
        vram_total_mb: 0.0,
    })
}

pub fn parse_nvidia_smi(csv: &str) -> Option<GpuSample> {
    let line = csv.lines().next()?;
    let mut parts = line.split(',').map(|s| s.trim());
    let utilization_percent = parts.next()?.parse::<f64>().ok()?;
    let vram_used_mb = parts.next()?.parse::<f64>().ok()?;
    let vram_total_mb = parts.next()?.parse::<f64>().ok()?;
    Some(GpuSample { utilization_percent, vram_used_mb, vram_total_mb })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demux_round_trip_stdout_and_stderr() {
        let mut data = Vec::new();
        let push_frame = |data: &mut Vec<u8>, stream: u8, payload: &[u8]| {
            data.push(stream);
            data.extend_from_slice(&[0, 0, 0]);
            data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            data.extend_from_slice(payload);
        };
        push_frame(&mut data, 1, b"hello stdout\n");
        push_frame(&mut data, 2, b"oops stderr\n");

        let frames = demux_frames(&data);
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].stderr);
        assert_eq!(frames[0].payload, b"hello stdout\n");
        assert!(frames[1].stderr);
        assert_eq!(frames[1].payload, b"oops stderr\n");
    }

    #[test]
    fn demux_returns_empty_on_truncated_frame() {
        let data = vec![1, 0, 0, 0, 0, 0, 0, 50, b'x'];
        assert!(demux_frames(&data).is_empty());
    }

    #[test]
    fn split_timestamped_lines_splits_rfc3339_prefix() {
        let data = b"2024-01-02T03:04:05.123456789Z hello world\n";
        let lines = split_timestamped_lines(data);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].message, "hello world");
    }

    #[test]
    fn split_timestamped_lines_handles_no_timestamp() {
        let lines = split_timestamped_lines(b"plain line with no prefix\n");
        assert_eq!(lines[0].message, "plain line with no prefix");
    }

    #[test]
    fn noise_filters_blank_and_known_patterns() {
        assert!(is_noise(""));
        assert!(is_noise("   "));
        assert!(is_noise("healthcheck: ok"));
        assert!(!is_noise("real log line"));
    }

    #[test]
    fn proc_stat_busy_fraction_computes_from_idle_ratio() {
        // user nice system idle
        let line = "cpu  100 0 100 800";
        let busy = parse_proc_stat_busy_fraction(line).unwrap();
        assert!((busy - 0.2).abs() < 0.001);
    }

    #[test]
    fn nvidia_smi_csv_parses() {
        let csv = "23, 1024, 8192\n";
        let sample = parse_nvidia_smi(csv).unwrap();
        assert_eq!(sample.utilization_percent, 23.0);
        assert_eq!(sample.vram_used_mb, 1024.0);
        assert_eq!(sample.vram_total_mb, 8192.0);
    }
}
