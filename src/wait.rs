//! Timeouts for lock acquisition and blocking waits

use std::time::{Duration, Instant};

/// How long a call may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    /// Return immediately if the condition does not already hold.
    NoWait,
    /// Block until the condition holds.
    #[default]
    Forever,
    /// Block for at most the given duration.
    Timeout(Duration),
}

impl Wait {
    pub fn from_millis(ms: u64) -> Wait {
        Wait::Timeout(Duration::from_millis(ms))
    }

    /// Absolute deadline for this wait, measured from `now`.
    ///
    /// `None` means wait forever. A timeout too large to represent also
    /// waits forever.
    pub fn deadline(self, now: Instant) -> Option<Instant> {
        match self {
            Wait::NoWait => Some(now),
            Wait::Forever => None,
            Wait::Timeout(d) => now.checked_add(d),
        }
    }

    /// Time left until `deadline`, as a `Wait`.
    pub fn until(deadline: Option<Instant>) -> Wait {
        match deadline {
            None => Wait::Forever,
            Some(d) => Wait::from(d.saturating_duration_since(Instant::now())),
        }
    }
}

impl From<Duration> for Wait {
    fn from(d: Duration) -> Wait {
        if d.is_zero() {
            Wait::NoWait
        } else {
            Wait::Timeout(d)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_is_no_wait() {
        assert_eq!(Wait::from(Duration::ZERO), Wait::NoWait);
        assert_eq!(
            Wait::from(Duration::from_millis(5)),
            Wait::Timeout(Duration::from_millis(5))
        );
    }

    #[test]
    fn deadlines() {
        let now = Instant::now();
        assert_eq!(Wait::NoWait.deadline(now), Some(now));
        assert_eq!(Wait::Forever.deadline(now), None);
        assert_eq!(
            Wait::from_millis(10).deadline(now),
            Some(now + Duration::from_millis(10))
        );
    }
}
