//! Human-readable sizes, rates and durations for progress output

use indicatif::{HumanBytes, HumanDuration};
use std::time::Duration;

/// Placeholder shown while throughput cannot be measured yet
pub const UNKNOWN: &str = "--";

pub fn format_size(bytes: u64) -> String {
    HumanBytes(bytes).to_string()
}

/// Bytes per second over `elapsed`, or [`UNKNOWN`] when nothing can be measured
pub fn format_speed(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return UNKNOWN.to_string();
    }
    format!("{}/s", HumanBytes((bytes as f64 / secs) as u64))
}

/// Remaining time at the average rate so far. Unknown totals have no ETA.
pub fn format_eta(downloaded: u64, total: u64, elapsed: Duration) -> String {
    if total == 0 || downloaded == 0 || elapsed.is_zero() {
        return UNKNOWN.to_string();
    }
    if downloaded >= total {
        return "0s".to_string();
    }

    let rate = downloaded as f64 / elapsed.as_secs_f64();
    let remaining = (total - downloaded) as f64 / rate;
    HumanDuration(Duration::from_secs_f64(remaining)).to_string()
}
