//! Rolling per-sensor reading buffers kept between two syncs.
//!
//! All sensors are sampled together, so every per-sensor array is written at
//! the same position: one [`WriteCursor`] drives all of them and index `i`
//! holds the readings of one acquisition cycle for every sensor.
//!
//! Memory usage (default capacities): 5 sensors x 20 readings x 8 bytes = 800 bytes.

use log::debug;

use crate::clock::{Clock, ClockState};
use crate::config::{MAX_DATA_POINTS, MAX_SENSORS};
use crate::sensors::{SensorDescriptor, SensorRegistry};

/// One sensor value, timestamped relative to the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reading {
    /// Seconds since [`ClockState::base`]
    pub timestamp_delta: u32,
    /// Raw count, 0/1, or 1/100 degree depending on the sensor kind
    pub value: i32,
}

/// Write position shared by every per-sensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteCursor {
    index: usize,
    wrapped: bool,
}

impl WriteCursor {
    /// Move to the next slot, wrapping to 0 after `capacity - 1`.
    fn advance(&mut self, capacity: usize) {
        self.index += 1;
        if self.index >= capacity {
            self.index = 0;
            self.wrapped = true;
        }
    }

    /// Number of readings each buffer logically holds.
    fn count(&self, capacity: usize) -> usize {
        if self.wrapped { capacity } else { self.index }
    }
}

/// Fixed-capacity reading buffers, one per sensor slot.
///
/// Once a buffer is full the oldest readings are overwritten (works like a
/// rolling buffer). Readings are exposed in storage order, so after a wrap the
/// oldest reading sits at [`write_index`](Self::write_index), not at 0.
#[derive(Debug)]
pub struct ReadingStore<const SENSORS: usize = MAX_SENSORS, const CAPACITY: usize = MAX_DATA_POINTS> {
    readings: [[Reading; CAPACITY]; SENSORS],
    cursor: WriteCursor,
}

impl<const SENSORS: usize, const CAPACITY: usize> Default for ReadingStore<SENSORS, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SENSORS: usize, const CAPACITY: usize> ReadingStore<SENSORS, CAPACITY> {
    pub const fn new() -> Self {
        Self {
            readings: [[Reading {
                timestamp_delta: 0,
                value: 0,
            }; CAPACITY]; SENSORS],
            cursor: WriteCursor {
                index: 0,
                wrapped: false,
            },
        }
    }

    /// Store `value` for sensor `slot` at the current write position.
    ///
    /// The timestamp is taken from `clock` as seconds since the last sync. The
    /// write position only moves on [`advance`](Self::advance), so every sensor
    /// of one cycle lands on the same index. Slots beyond `SENSORS` are ignored.
    /// Returns the timestamp delta that was stored.
    pub fn append<C: Clock>(&mut self, slot: usize, value: i32, clock: &ClockState<C>) -> u32 {
        let timestamp_delta = clock.elapsed();
        if let Some(buffer) = self.readings.get_mut(slot) {
            buffer[self.cursor.index] = Reading {
                timestamp_delta,
                value,
            };
        }
        timestamp_delta
    }

    /// Close the current cycle and move every buffer to the next position.
    pub fn advance(&mut self) {
        self.cursor.advance(CAPACITY);
        debug!(
            "Reading buffer at {} (wrapped: {})",
            self.cursor.index, self.cursor.wrapped
        );
    }

    /// Forget all buffered readings. Storage is overwritten lazily by later appends.
    pub fn clear(&mut self) {
        self.cursor = WriteCursor::default();
    }

    /// Readings of sensor `slot` in storage order.
    pub fn readings(&self, slot: usize) -> &[Reading] {
        match self.readings.get(slot) {
            Some(buffer) => &buffer[..self.len()],
            None => &[],
        }
    }

    /// Every buffered reading, grouped by sensor in registration order, each
    /// group in storage order.
    pub fn snapshot<'a, const N: usize>(
        &'a self,
        registry: &'a SensorRegistry<N>,
    ) -> impl Iterator<Item = (&'a SensorDescriptor, Reading)> + 'a {
        registry
            .iter()
            .enumerate()
            .flat_map(move |(slot, sensor)| {
                self.readings(slot)
                    .iter()
                    .map(move |reading| (sensor, *reading))
            })
    }

    /// Readings held per sensor.
    pub fn len(&self) -> usize {
        self.cursor.count(CAPACITY)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_index(&self) -> usize {
        self.cursor.index
    }

    pub fn has_wrapped(&self) -> bool {
        self.cursor.wrapped
    }

    pub const fn capacity(&self) -> usize {
        CAPACITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorKind;
    use crate::testing::ManualClock;

    fn registry() -> SensorRegistry<2> {
        let mut registry = SensorRegistry::new();
        registry.register("light", 14, SensorKind::Analog).unwrap();
        registry.register("door", 2, SensorKind::Digital).unwrap();
        registry
    }

    fn synced_clock(base: u32) -> ClockState<ManualClock> {
        let mut clock = ClockState::new(ManualClock::unset());
        clock.resync(base);
        clock
    }

    /// One acquisition cycle: sensor 0 gets `value`, sensor 1 gets `-value`.
    fn cycle<const C: usize>(
        store: &mut ReadingStore<2, C>,
        value: i32,
        clock: &ClockState<ManualClock>,
    ) {
        store.append(0, value, clock);
        store.append(1, -value, clock);
        store.advance();
    }

    #[test]
    fn test_snapshot_matches_insertion_order_until_full() {
        let registry = registry();
        let clock = synced_clock(1000);
        let mut store = ReadingStore::<2, 4>::new();

        for value in 1..=3 {
            clock.clock().advance(10);
            cycle(&mut store, value, &clock);
        }

        assert_eq!(store.len(), 3);
        assert!(!store.has_wrapped());

        let values: heapless::Vec<(&str, i32, u32), 8> = store
            .snapshot(&registry)
            .map(|(s, r)| (s.id.as_str(), r.value, r.timestamp_delta))
            .collect();
        assert_eq!(
            values.as_slice(),
            &[
                ("light", 1, 10),
                ("light", 2, 20),
                ("light", 3, 30),
                ("door", -1, 10),
                ("door", -2, 20),
                ("door", -3, 30),
            ]
        );
    }

    #[test]
    fn test_wraps_and_overwrites_oldest() {
        let clock = synced_clock(0);
        let mut store = ReadingStore::<2, 4>::new();

        // CAPACITY + 2 cycles
        for value in 1..=6 {
            cycle(&mut store, value, &clock);
        }

        assert!(store.has_wrapped());
        assert_eq!(store.len(), 4);
        assert_eq!(store.write_index(), 2);
        // Storage order, not chronological: 5 and 6 replaced 1 and 2
        let light: heapless::Vec<i32, 4> = store.readings(0).iter().map(|r| r.value).collect();
        assert_eq!(light.as_slice(), &[5, 6, 3, 4]);
        assert_eq!(store.readings(1)[1].value, -6, "most recent cycle sits at k - 1");
    }

    #[test]
    fn test_same_index_for_all_sensors_of_a_cycle() {
        let clock = synced_clock(0);
        let mut store = ReadingStore::<2, 4>::new();

        store.append(0, 7, &clock);
        clock.clock().advance(5);
        store.append(1, 8, &clock);
        assert_eq!(store.write_index(), 0, "index only moves on advance");
        store.advance();

        assert_eq!(store.readings(0)[0].value, 7);
        assert_eq!(store.readings(1)[0].value, 8);
        assert_eq!(store.readings(1)[0].timestamp_delta, 5);
    }

    #[test]
    fn test_clear_empties_and_restarts_at_zero() {
        let registry = registry();
        let clock = synced_clock(0);
        let mut store = ReadingStore::<2, 4>::new();
        for value in 1..=5 {
            cycle(&mut store, value, &clock);
        }

        store.clear();
        assert!(store.is_empty());
        assert!(!store.has_wrapped());
        assert_eq!(store.snapshot(&registry).count(), 0);

        cycle(&mut store, 42, &clock);
        assert_eq!(store.len(), 1);
        assert_eq!(store.readings(0)[0].value, 42);
    }

    #[test]
    fn test_append_before_first_sync_uses_zero_delta() {
        let clock = ClockState::new(ManualClock::at(5000));
        let mut store = ReadingStore::<2, 4>::new();
        assert_eq!(store.append(0, 1, &clock), 0);
    }

    #[test]
    fn test_unknown_slot_is_ignored() {
        let clock = synced_clock(0);
        let mut store = ReadingStore::<2, 4>::new();
        store.append(9, 1, &clock);
        store.advance();
        assert!(store.readings(9).is_empty());
        assert_eq!(store.readings(0)[0], Reading::default());
    }
}
