use crate::time::Duration;

/// Tunables of the bridge.
///
/// The defaults match the timer contract of the engine, a fast tick every 250 ms with every
/// second one on the 500 ms grid also driving the slow timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Interval of the fast engine timer.
    pub fast_interval: Duration,

    /// Interval of the slow engine timer, a multiple of `fast_interval`.
    ///
    /// A fast tick that falls on a multiple of this interval also runs the slow timer.
    pub slow_interval: Duration,

    /// The grid that rescheduled ticks are rounded down onto.
    pub grid: Duration,

    /// Longest inbound segment, header included, handed to the engine.
    ///
    /// Longer segments are dropped. The engine frames inbound segments behind a 20 octet network
    /// header in a 4096 octet buffer.
    pub max_segment_len: usize,

    /// Largest single write into the engine's send buffer.
    pub write_chunk: usize,
}

/// A configuration that cannot drive the engine timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The fast interval or the grid is zero.
    #[error("timer intervals must be non-zero")]
    ZeroInterval,

    /// The slow interval is not a positive multiple of the fast interval.
    #[error("slow interval must be a multiple of the fast interval")]
    SlowNotMultiple,

    /// The grid is coarser than the fast interval, ticks could be scheduled in the past.
    #[error("grid must not exceed the fast interval")]
    CoarseGrid,

    /// Nothing could ever be written or received.
    #[error("segment and write sizes must be non-zero")]
    ZeroSize,
}

impl Config {
    /// Set the fast timer interval.
    pub fn fast_interval(self, fast_interval: Duration) -> Self {
        Config { fast_interval, ..self }
    }

    /// Set the slow timer interval.
    pub fn slow_interval(self, slow_interval: Duration) -> Self {
        Config { slow_interval, ..self }
    }

    /// Set the rescheduling grid.
    pub fn grid(self, grid: Duration) -> Self {
        Config { grid, ..self }
    }

    /// Set the longest accepted inbound segment.
    pub fn max_segment_len(self, max_segment_len: usize) -> Self {
        Config { max_segment_len, ..self }
    }

    /// Set the largest single write.
    pub fn write_chunk(self, write_chunk: usize) -> Self {
        Config { write_chunk, ..self }
    }

    /// Check that the timers are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fast = self.fast_interval.as_millis();
        let slow = self.slow_interval.as_millis();
        let grid = self.grid.as_millis();

        if fast == 0 || grid == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if slow == 0 || slow % fast != 0 {
            return Err(ConfigError::SlowNotMultiple);
        }
        if grid > fast {
            return Err(ConfigError::CoarseGrid);
        }
        if self.max_segment_len == 0 || self.write_chunk == 0 {
            return Err(ConfigError::ZeroSize);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fast_interval: Duration::from_millis(250),
            slow_interval: Duration::from_millis(500),
            grid: Duration::from_millis(250),
            max_segment_len: 4096 - 20,
            // Eight segments of the default MSS.
            write_chunk: 8 * 536,
        }
    }
}
