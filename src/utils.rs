//! Utility functions for logging, backoff, LLM response cleanup and the file system.

use rand::{Rng, rng};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Cuts on a character boundary at or below `max` bytes and appends
/// `"…(+N bytes)"` with the number of bytes dropped.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// A reply cut off by the token limit fails with an EOF error; callers
/// re-ask once in that case.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Exponential backoff with jitter.
///
/// `base * 2^(attempt-1)`, capped at `max`, plus 0-250ms of jitter.
/// `attempt` is 1-based.
pub fn jittered_backoff(base: Duration, attempt: usize, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31) as u32;
    let delay = base.saturating_mul(1u32 << shift).min(max);
    let jitter_ms: u64 = rng().random_range(0..=250);
    delay + Duration::from_millis(jitter_ms)
}

/// Longest delay or timeout a config value may ask for, in seconds.
pub const MAX_CONFIG_SECS: f64 = 86_400.0;

/// Seconds from a config value as a [`Duration`].
///
/// Negative and NaN become zero; anything above [`MAX_CONFIG_SECS`] (infinity
/// included) is clamped to it.
pub fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(value.min(MAX_CONFIG_SECS))
}

/// Cut the JSON payload out of a model reply.
///
/// Models wrap answers in ```json fences or add a sentence before them; this
/// returns the slice from the first `[`/`{` to the last matching closer.
pub fn json_payload(reply: &str) -> &str {
    let start = reply.find(['[', '{']);
    let Some(start) = start else {
        return reply.trim();
    };
    let closer = if reply[start..].starts_with('[') { ']' } else { '}' };
    match reply.rfind(closer) {
        Some(end) if end > start => &reply[start..=end],
        _ => &reply[start..],
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and deletes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
