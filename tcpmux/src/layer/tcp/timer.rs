use crate::time::{Duration, Expiration, Instant};

use super::Config;

/// Drives the fast and slow engine timers.
///
/// There is a single pending wakeup at most. It is only armed while the engine has work that needs
/// the timers, and the host is told each time it gets armed.
#[derive(Debug)]
pub(crate) struct TickScheduler {
    fast: Duration,
    slow: Duration,
    grid: Duration,
    next: Expiration,
}

/// The timers to run for one wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticks {
    pub(crate) slow: bool,
}

impl TickScheduler {
    pub(crate) fn new(config: &Config) -> Self {
        TickScheduler {
            fast: config.fast_interval,
            slow: config.slow_interval,
            grid: config.grid,
            next: Expiration::Never,
        }
    }

    /// Consume the pending wakeup if it is due.
    ///
    /// The slow timer joins when the scheduled instant lies on the slow grid. A wakeup before the
    /// scheduled time runs nothing.
    pub(crate) fn fire(&mut self, now: Instant) -> Option<Ticks> {
        let at = match self.next {
            Expiration::When(at) if at <= now => at,
            _ => return None,
        };
        self.next = Expiration::Never;
        Some(Ticks { slow: at.is_aligned(self.slow) })
    }

    /// Arm the next wakeup if none is pending and the engine is busy.
    ///
    /// Returns the instant when a new wakeup was armed.
    pub(crate) fn rearm(&mut self, now: Instant, busy: bool) -> Option<Instant> {
        if self.next != Expiration::Never || !busy {
            return None;
        }
        let at = (now + self.fast).round_down(self.grid);
        self.next = Expiration::When(at);
        Some(at)
    }

    /// Drop the pending wakeup. Returns whether one was pending.
    pub(crate) fn cancel(&mut self) -> bool {
        let pending = self.next != Expiration::Never;
        self.next = Expiration::Never;
        pending
    }

    pub(crate) fn next(&self) -> Expiration {
        self.next
    }
}
