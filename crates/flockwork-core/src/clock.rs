//! Simulation clock.
//!
//! The clock is the single source of truth for simulation time. It counts
//! ticks and accumulates elapsed seconds; the tick counter is also what the
//! neighbor cache uses to detect a new tick.

/// Errors that can occur when advancing the clock.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// The timestep was negative or not finite.
    #[error("invalid timestep {0}: must be a non-negative finite number")]
    InvalidTimestep(f32),
}

/// Tick counter plus elapsed simulation time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimulationClock {
    /// Number of ticks completed.
    tick: u64,
    /// Elapsed simulation seconds.
    time: f64,
    /// Duration of the most recent tick.
    last_dt: f32,
}

impl SimulationClock {
    /// A clock at tick 0, time 0.
    pub const fn new() -> Self {
        Self {
            tick: 0,
            time: 0.0,
            last_dt: 0.0,
        }
    }

    /// A clock restored to the given tick and time.
    pub const fn from_parts(tick: u64, time: f64) -> Self {
        Self {
            tick,
            time,
            last_dt: 0.0,
        }
    }

    /// Number of ticks completed.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Elapsed simulation seconds.
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Duration of the most recent tick.
    pub const fn last_dt(&self) -> f32 {
        self.last_dt
    }

    /// Advance by one tick of `dt` seconds and return the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidTimestep`] for a negative or non-finite
    /// `dt`, and [`ClockError::TickOverflow`] if the counter is exhausted.
    /// The clock is unchanged on error.
    pub fn advance(&mut self, dt: f32) -> Result<u64, ClockError> {
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(ClockError::InvalidTimestep(dt));
        }
        let next = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        self.tick = next;
        self.time += f64::from(dt);
        self.last_dt = dt;
        Ok(next)
    }
}
