//! The loop's steady, millisecond clock.

use std::ops::{Add, Sub};
use std::time::Duration;

/// A point on the loop's monotonic clock, in milliseconds since the loop
/// was constructed. Obtained from [`Scheduler::now`](crate::Scheduler::now);
/// there is no ambient `now()` — time is always the loop's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LoopInstant {
    millis: u64,
}

impl LoopInstant {
    /// Constructs from raw milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Milliseconds since the loop epoch.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.millis
    }

    /// Duration since `earlier`, zero if `earlier` is in the future.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis))
    }
}

impl Add<Duration> for LoopInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self {
            millis: self
                .millis
                .saturating_add(u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl Sub<LoopInstant> for LoopInstant {
    type Output = Duration;

    fn sub(self, rhs: LoopInstant) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_saturates() {
        let t = LoopInstant::from_millis(100);
        assert_eq!((t + Duration::from_millis(50)).as_millis(), 150);
        assert_eq!(t - LoopInstant::from_millis(150), Duration::ZERO);
        assert_eq!(
            LoopInstant::from_millis(150) - t,
            Duration::from_millis(50)
        );
    }
}
