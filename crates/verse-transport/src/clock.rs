//! Wall-clock timestamps carried in handshake messages.
//!
//! Resend timing uses [`std::time::Instant`]; this type only exists to put
//! the host's notion of "now" on the wire as `seconds` plus a binary
//! `fraction` of a second (units of 2^-32 s).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch plus a 32-bit binary fraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Whole seconds (wraps in 2106)
    pub seconds: u32,
    /// Fraction of a second in units of 2^-32 s
    pub fraction: u32,
}

impl Timestamp {
    /// Sample the system clock
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_duration(since_epoch)
    }

    /// Convert a duration since the epoch
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_duration(since_epoch: Duration) -> Self {
        let fraction = (u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000;
        Self {
            seconds: since_epoch.as_secs() as u32,
            fraction: fraction as u32,
        }
    }

    /// Convert back to a duration since the epoch (nanosecond precision)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_duration(self) -> Duration {
        let nanos = (u64::from(self.fraction) * 1_000_000_000) >> 32;
        Duration::new(u64::from(self.seconds), nanos as u32)
    }
}
