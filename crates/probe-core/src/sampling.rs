//! One acquisition pass over every registered sensor.

use embedded_hal_async::delay::DelayNs;
use log::debug;

use crate::clock::{Clock, ClockState};
use crate::config::TemperatureUnit;
use crate::errors;
use crate::onewire::{BusError, OneWire, SingleWireBus};
use crate::sensors::{Channel, PinInput, SensorDescriptor, SensorKind, SensorRegistry};
use crate::storage::ReadingStore;

/// Stored in place of a value that could not be read. Uploaded as 0.
pub const READ_FAILED: i32 = i32::MIN;

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleSummary {
    pub sampled: usize,
    pub failed: usize,
}

/// Samples every sensor once and appends the values to the store.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionCycle {
    unit: TemperatureUnit,
}

impl AcquisitionCycle {
    pub const fn new(unit: TemperatureUnit) -> Self {
        Self { unit }
    }

    /// Read each sensor in registration order, then advance the store.
    ///
    /// A failed bus read is stored as [`READ_FAILED`] and reported; the
    /// remaining sensors are still read.
    #[allow(clippy::too_many_arguments)]
    pub async fn run<const N: usize, const S: usize, const C: usize, P, B, K, D>(
        &self,
        registry: &SensorRegistry<N>,
        pins: &mut P,
        bus: &mut SingleWireBus<B>,
        store: &mut ReadingStore<S, C>,
        clock: &ClockState<K>,
        delay: &mut D,
    ) -> CycleSummary
    where
        P: PinInput,
        B: OneWire,
        K: Clock,
        D: DelayNs,
    {
        let mut summary = CycleSummary::default();

        for (slot, sensor) in registry.iter().enumerate() {
            let value = match self.read(sensor, pins, bus, delay).await {
                Ok(value) => value,
                Err(e) => {
                    errors::report(&e);
                    summary.failed += 1;
                    READ_FAILED
                }
            };
            store.append(slot, value, clock);
            summary.sampled += 1;
            debug!("{}:{} = {}", sensor.id, sensor.channel.pin(), value);
        }

        store.advance();
        summary
    }

    async fn read<P, B, D>(
        &self,
        sensor: &SensorDescriptor,
        pins: &mut P,
        bus: &mut SingleWireBus<B>,
        delay: &mut D,
    ) -> Result<i32, BusError>
    where
        P: PinInput,
        B: OneWire,
        D: DelayNs,
    {
        match sensor.channel {
            Channel::Bus { slot } => {
                let temperature = bus.read_temperature(slot, delay).await?;
                Ok(temperature.centi(self.unit))
            }
            Channel::Pin(pin) if sensor.kind == SensorKind::Analog => {
                Ok(i32::from(pins.read_analog(pin)))
            }
            Channel::Pin(pin) => Ok(i32::from(pins.read_digital(pin))),
        }
    }
}
