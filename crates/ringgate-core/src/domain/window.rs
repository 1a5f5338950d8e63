//! Time windows read from configuration.
//!
//! Config values are plain seconds. They are bounded so that adding one to
//! a timestamp can never overflow.

use super::error::{Result, RolloutError};

/// Longest accepted window: ten years.
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 3600;

/// `secs` as a chrono duration, clamped to [`MAX_WINDOW_SECS`].
pub fn window(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// Reject a configured window above [`MAX_WINDOW_SECS`].
pub fn check_window(name: &str, secs: u64) -> Result<()> {
    if secs > MAX_WINDOW_SECS {
        return Err(RolloutError::InvalidConfig(format!(
            "{name} = {secs}s exceeds the {MAX_WINDOW_SECS}s maximum"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn huge_values_are_clamped() {
        assert_eq!(window(90), chrono::Duration::seconds(90));
        assert_eq!(window(u64::MAX), window(MAX_WINDOW_SECS));
        let t: DateTime<Utc> = Utc::now();
        assert!(t + window(20_000_000_000_000_000) > t);
    }

    #[test]
    fn check_rejects_out_of_range() {
        assert!(check_window("min_dwell_secs", MAX_WINDOW_SECS).is_ok());
        let err = check_window("min_dwell_secs", 20_000_000_000_000_000).unwrap_err();
        assert!(err.to_string().contains("min_dwell_secs"), "{err}");
    }
}
