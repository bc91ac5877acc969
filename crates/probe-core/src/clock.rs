//! Wall-clock collaborator and the sync-anchored clock state.
//!
//! The probe has no real-time clock. Absolute time is learned from the control
//! server on every successful sync, and every stored reading is kept as a
//! delta from that moment ([`ClockState::base`]).

use embassy_time::Instant;

/// Source of absolute time (seconds since the Unix epoch).
pub trait Clock {
    /// Current absolute time, or `None` while the time has never been set.
    fn now(&self) -> Option<u32>;

    /// Set the current absolute time.
    fn set_now(&mut self, now: u32);
}

/// [`Clock`] backed by the embassy monotonic timer.
///
/// Stores the offset between the timer and absolute time; the timer itself is
/// never adjusted.
#[derive(Debug, Default)]
pub struct EmbassyClock {
    offset: Option<u64>,
}

impl EmbassyClock {
    pub const fn new() -> Self {
        Self { offset: None }
    }
}

impl Clock for EmbassyClock {
    fn now(&self) -> Option<u32> {
        let offset = self.offset?;
        let now = offset.saturating_add(Instant::now().as_secs());
        Some(now.min(u32::MAX as u64) as u32)
    }

    fn set_now(&mut self, now: u32) {
        let uptime = Instant::now().as_secs();
        self.offset = Some((now as u64).saturating_sub(uptime));
    }
}

/// Absolute time anchored at the last successful sync.
#[derive(Debug)]
pub struct ClockState<C> {
    clock: C,
    base: Option<u32>,
}

impl<C: Clock> ClockState<C> {
    pub const fn new(clock: C) -> Self {
        Self { clock, base: None }
    }

    /// Absolute time of the last successful sync, if any.
    pub fn base(&self) -> Option<u32> {
        self.base
    }

    /// True once a sync has established the time.
    pub fn is_synced(&self) -> bool {
        self.base.is_some()
    }

    /// Current absolute time, or 0 while the time is unknown.
    pub fn now(&self) -> u32 {
        self.clock.now().unwrap_or(0)
    }

    /// Seconds since the last sync, clamped to 0 when no sync happened yet.
    pub fn elapsed(&self) -> u32 {
        match (self.base, self.clock.now()) {
            (Some(base), Some(now)) => now.saturating_sub(base),
            _ => 0,
        }
    }

    /// Adopt `server_time` as the new base and set the wall clock to it.
    pub fn resync(&mut self, server_time: u32) {
        self.clock.set_now(server_time);
        self.base = Some(server_time);
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    #[test]
    fn test_elapsed_is_zero_before_first_sync() {
        let clock = ClockState::new(ManualClock::at(500));
        assert_eq!(clock.elapsed(), 0);
        assert!(!clock.is_synced());
        assert_eq!(clock.base(), None);
    }

    #[test]
    fn test_resync_moves_base_and_wall_clock() {
        let mut clock = ClockState::new(ManualClock::unset());
        assert_eq!(clock.now(), 0);

        clock.resync(1000);
        assert_eq!(clock.base(), Some(1000));
        assert_eq!(clock.now(), 1000);

        clock.clock().advance(42);
        assert_eq!(clock.elapsed(), 42);
        assert_eq!(clock.base(), Some(1000), "base only moves on resync");
    }

    #[test]
    fn test_elapsed_saturates_when_clock_is_behind_base() {
        let mut clock = ClockState::new(ManualClock::unset());
        clock.resync(1000);
        clock.clock().rewind(10);
        assert_eq!(clock.elapsed(), 0);
    }
}
