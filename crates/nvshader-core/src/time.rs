//! Epoch-nanosecond helpers shared by scanning and retention.

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds in one day.
pub const NANOS_PER_DAY: u64 = 86_400 * 1_000_000_000;

/// Current wall-clock time in nanoseconds since the Unix epoch.
#[must_use]
pub fn now_nanos() -> u64 {
    system_time_nanos(SystemTime::now())
}

/// Convert a [`SystemTime`] to epoch nanoseconds, clamping pre-epoch
/// times to zero.
#[must_use]
pub fn system_time_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// Modification time of a file in epoch nanoseconds.
///
/// Filesystems that do not report mtime yield zero, which sorts such
/// entries as oldest.
#[must_use]
pub fn modified_nanos(meta: &Metadata) -> u64 {
    meta.modified().map_or(0, system_time_nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_now_is_after_2020() {
        // 2020-01-01 in nanoseconds.
        assert!(now_nanos() > 1_577_836_800 * 1_000_000_000);
    }

    #[test]
    fn test_pre_epoch_clamps_to_zero() {
        let t = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(system_time_nanos(t), 0);
    }
}
