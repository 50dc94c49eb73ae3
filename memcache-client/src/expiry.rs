//! Expiration handling.
//!
//! memcached reads an exptime up to 30 days as seconds from now and anything
//! larger as an absolute UNIX timestamp. Callers always think in relative
//! durations, so long TTLs are converted before they reach the wire.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Largest exptime memcached treats as relative: 30 days in seconds.
pub const MAX_RELATIVE_EXPTIME: u64 = 60 * 60 * 24 * 30;

/// Time-to-live for a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the client's configured `default_ttl`.
    #[default]
    Default,
    /// Never expire.
    Never,
    /// Expire after this many seconds. `Seconds(0)` never expires.
    Seconds(u64),
}

impl From<Duration> for Ttl {
    /// Fractional seconds round up, so a sub-second duration still expires
    /// instead of turning into "never".
    fn from(duration: Duration) -> Self {
        let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        Ttl::Seconds(secs)
    }
}

impl From<u64> for Ttl {
    fn from(secs: u64) -> Self {
        Ttl::Seconds(secs)
    }
}

impl From<Option<Duration>> for Ttl {
    /// `None` selects the default TTL.
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Ttl::Default, Ttl::from)
    }
}

impl Ttl {
    /// Encode as a wire exptime using the current clock.
    pub fn exptime(self, default_ttl: u32) -> u32 {
        self.exptime_at(default_ttl, unix_now())
    }

    /// Encode as a wire exptime relative to `now` (seconds since the epoch).
    pub fn exptime_at(self, default_ttl: u32, now: u64) -> u32 {
        let secs = match self {
            Ttl::Default => u64::from(default_ttl),
            Ttl::Never => 0,
            Ttl::Seconds(secs) => secs,
        };
        if secs > MAX_RELATIVE_EXPTIME {
            // exptime is 32 bits on the wire; clamp rather than wrap
            u32::try_from(secs.saturating_add(now)).unwrap_or(u32::MAX)
        } else {
            secs as u32
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn relative_ttls_pass_through() {
        assert_eq!(Ttl::Seconds(1).exptime_at(300, NOW), 1);
        assert_eq!(
            Ttl::Seconds(MAX_RELATIVE_EXPTIME).exptime_at(300, NOW),
            2_592_000
        );
        assert_eq!(Ttl::Default.exptime_at(300, NOW), 300);
    }

    #[test]
    fn zero_and_never_mean_forever() {
        assert_eq!(Ttl::Never.exptime_at(300, NOW), 0);
        assert_eq!(Ttl::Seconds(0).exptime_at(300, NOW), 0);
        assert_eq!(Ttl::Default.exptime_at(0, NOW), 0);
    }

    #[test]
    fn long_ttls_become_absolute() {
        let ttl = Ttl::Seconds(MAX_RELATIVE_EXPTIME + 1);
        assert_eq!(ttl.exptime_at(300, NOW), (NOW + MAX_RELATIVE_EXPTIME + 1) as u32);

        let default = Ttl::Default.exptime_at(3_000_000, NOW);
        assert_eq!(default, (NOW + 3_000_000) as u32);
    }

    #[test]
    fn absolute_exptime_saturates() {
        assert_eq!(Ttl::Seconds(u64::MAX).exptime_at(0, NOW), u32::MAX);
    }

    #[test]
    fn durations_round_up() {
        assert_eq!(Ttl::from(Duration::from_millis(1)), Ttl::Seconds(1));
        assert_eq!(Ttl::from(Duration::from_millis(100_200)), Ttl::Seconds(101));
        assert_eq!(Ttl::from(Duration::from_secs(60)), Ttl::Seconds(60));
        assert_eq!(Ttl::from(Duration::ZERO), Ttl::Seconds(0));
        assert_eq!(Ttl::from(None::<Duration>), Ttl::Default);
    }

    #[test]
    fn current_clock_is_used() {
        let exptime = Ttl::Seconds(MAX_RELATIVE_EXPTIME + 10).exptime(0);
        assert!(u64::from(exptime) > unix_now());
    }
}
