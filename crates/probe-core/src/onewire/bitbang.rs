use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use super::OneWire;

/// Standard-speed slot timings in microseconds
const RESET_LOW_US: u32 = 480;
const PRESENCE_SAMPLE_US: u32 = 70;
const RESET_RECOVERY_US: u32 = 410;
const WRITE_ONE_LOW_US: u32 = 6;
const WRITE_ONE_RELEASE_US: u32 = 64;
const WRITE_ZERO_LOW_US: u32 = 60;
const WRITE_ZERO_RELEASE_US: u32 = 10;
const READ_LOW_US: u32 = 6;
const READ_SAMPLE_US: u32 = 9;
const READ_RECOVERY_US: u32 = 55;

/// Single-wire master driving one open-drain GPIO.
///
/// `set_high` must release the line (open drain with an external pull-up) and
/// `is_low`/`is_high` must read the actual line level. Each slot runs inside a
/// critical section so an interrupt cannot stretch it past its timing window.
pub struct BitBangBus<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> BitBangBus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    pub fn release(self) -> (P, D) {
        (self.pin, self.delay)
    }
}

impl<P, D> OneWire for BitBangBus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    type Error = P::Error;

    fn reset(&mut self) -> Result<bool, Self::Error> {
        critical_section::with(|_| -> Result<bool, Self::Error> {
            self.pin.set_low()?;
            self.delay.delay_us(RESET_LOW_US);
            self.pin.set_high()?;
            self.delay.delay_us(PRESENCE_SAMPLE_US);
            let presence = self.pin.is_low()?;
            self.delay.delay_us(RESET_RECOVERY_US);
            Ok(presence)
        })
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error> {
        let (low, release) = if bit {
            (WRITE_ONE_LOW_US, WRITE_ONE_RELEASE_US)
        } else {
            (WRITE_ZERO_LOW_US, WRITE_ZERO_RELEASE_US)
        };
        critical_section::with(|_| -> Result<(), Self::Error> {
            self.pin.set_low()?;
            self.delay.delay_us(low);
            self.pin.set_high()?;
            self.delay.delay_us(release);
            Ok(())
        })
    }

    fn read_bit(&mut self) -> Result<bool, Self::Error> {
        critical_section::with(|_| -> Result<bool, Self::Error> {
            self.pin.set_low()?;
            self.delay.delay_us(READ_LOW_US);
            self.pin.set_high()?;
            self.delay.delay_us(READ_SAMPLE_US);
            let bit = self.pin.is_high()?;
            self.delay.delay_us(READ_RECOVERY_US);
            Ok(bit)
        })
    }
}
