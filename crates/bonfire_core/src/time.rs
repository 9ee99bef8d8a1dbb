//! Fixed-rate simulation time
//!
//! The consuming loop runs at a fixed 20 Hz tick; queued network events and
//! dispatched tasks are drained once per tick.

use std::time::Duration;

/// Fixed consumer tick rate (20 Hz = 50ms per tick)
pub const TICK_RATE_HZ: u32 = 20;
pub const TICK_DURATION: Duration = Duration::from_millis(50);

/// Tick counter for the consuming loop
pub struct SimulationTime {
    tick_count: u64,
    accumulated_time: Duration,
}

impl SimulationTime {
    pub fn new() -> Self {
        Self {
            tick_count: 0,
            accumulated_time: Duration::ZERO,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn advance_tick(&mut self) {
        self.tick_count += 1;
        self.accumulated_time += TICK_DURATION;
    }

    pub fn total_time(&self) -> Duration {
        self.accumulated_time
    }
}

impl Default for SimulationTime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_accumulation() {
        let mut time = SimulationTime::new();
        assert_eq!(time.tick_count(), 0);

        time.advance_tick();
        time.advance_tick();

        assert_eq!(time.tick_count(), 2);
        assert_eq!(time.total_time(), TICK_DURATION * 2);
    }
}
