//! Single-wire (1-Wire) bus: bit-level seam, ROM search, and the DS18B20
//! temperature transaction.
//!
//! The layering is:
//!
//! - [`OneWire`]: reset / write-bit / read-bit on the physical line. Implemented
//!   by [`BitBangBus`] over an open-drain `embedded-hal` pin, and by
//!   [`BusEmulator`] for host tests and the simulator.
//! - [`SingleWireBus`]: enumeration of device ROM codes with the binary-tree
//!   search, and the read-temperature transaction for one enumerated slot.
//!
//! Only DS18B20 thermometers (family 0x28) are decoded.

mod bitbang;
mod checksum;
mod ds18b20;
mod emulator;

pub use bitbang::BitBangBus;
pub use checksum::crc8;
pub use ds18b20::*;
pub use emulator::{BusEmulator, EmulatedDevice};

use core::fmt::Debug;

use embedded_hal_async::delay::DelayNs;
use log::{debug, error};
use thiserror_no_std::Error;

use crate::errors::OperatorCode;

/// ROM command: enumerate devices with the binary-tree search
pub const SEARCH_ROM: u8 = 0xF0;
/// ROM command: address one device by its ROM code
pub const MATCH_ROM: u8 = 0x55;
/// ROM command: address every device at once
pub const SKIP_ROM: u8 = 0xCC;

/// Bit-level access to a single-wire bus.
///
/// Bytes travel least significant bit first.
pub trait OneWire {
    type Error: Debug;

    /// Issue a reset pulse. Returns true if at least one device answered with
    /// a presence pulse.
    fn reset(&mut self) -> Result<bool, Self::Error>;

    fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error>;

    fn read_bit(&mut self) -> Result<bool, Self::Error>;

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        for i in 0..8 {
            self.write_bit((byte >> i) & 0x01 == 0x01)?;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, Self::Error> {
        let mut byte = 0;
        for i in 0..8 {
            if self.read_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    /// Address the device with ROM code `rom`; the next byte is a function command.
    fn select(&mut self, rom: &RomCode) -> Result<(), Self::Error> {
        self.write_byte(MATCH_ROM)?;
        for byte in rom.0 {
            self.write_byte(byte)?;
        }
        Ok(())
    }
}

/// 64-bit device identity: family code, 48-bit serial, CRC-8 of the first 7 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomCode(pub [u8; 8]);

impl RomCode {
    pub const fn family(&self) -> u8 {
        self.0[0]
    }

    pub const fn crc(&self) -> u8 {
        self.0[7]
    }

    /// True if the trailing byte matches the CRC of the first seven.
    pub fn is_crc_valid(&self) -> bool {
        crc8(&self.0[..7]) == self.crc()
    }

    /// Bit `n` (0..64) in transmission order.
    pub const fn bit(&self, n: usize) -> bool {
        (self.0[n / 8] >> (n % 8)) & 0x01 == 0x01
    }
}

impl core::fmt::Display for RomCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("no single-wire device in slot {slot}")]
    DeviceNotFound { slot: u8 },
    #[error("invalid CRC from single-wire device")]
    ChecksumInvalid,
    #[error("unsupported single-wire device family {0:#04x}")]
    UnsupportedDeviceFamily(u8),
    #[error("single-wire line failure during {operation}")]
    Io { operation: &'static str },
}

impl OperatorCode for BusError {
    fn code(&self) -> u16 {
        match self {
            Self::DeviceNotFound { .. } => 200,
            Self::ChecksumInvalid => 201,
            Self::UnsupportedDeviceFamily(_) => 202,
            Self::Io { .. } => 203,
        }
    }
}

/// Progress of one ROM search pass.
#[derive(Debug, Clone, Copy, Default)]
struct SearchState {
    rom: [u8; 8],
    /// 1-based bit position where the last pass took the 0 branch of a conflict
    last_discrepancy: u8,
    last_device: bool,
}

impl SearchState {
    /// Find the next device, or `None` once every branch has been visited.
    fn next<B: OneWire>(&mut self, bus: &mut B) -> Result<Option<RomCode>, B::Error> {
        if self.last_device {
            return Ok(None);
        }
        if !bus.reset()? {
            self.last_device = true;
            return Ok(None);
        }
        bus.write_byte(SEARCH_ROM)?;

        let mut last_zero = 0;
        for bit_number in 1..=64u8 {
            let byte = usize::from((bit_number - 1) / 8);
            let mask = 1u8 << ((bit_number - 1) % 8);

            let id_bit = bus.read_bit()?;
            let complement = bus.read_bit()?;
            if id_bit && complement {
                // Nobody answered: devices left the bus mid-search
                self.last_device = true;
                return Ok(None);
            }

            let direction = if id_bit != complement {
                id_bit
            } else if bit_number < self.last_discrepancy {
                self.rom[byte] & mask != 0
            } else {
                bit_number == self.last_discrepancy
            };

            if !id_bit && !complement && !direction {
                last_zero = bit_number;
            }

            if direction {
                self.rom[byte] |= mask;
            } else {
                self.rom[byte] &= !mask;
            }
            bus.write_bit(direction)?;
        }

        self.last_discrepancy = last_zero;
        if last_zero == 0 {
            self.last_device = true;
        }
        Ok(Some(RomCode(self.rom)))
    }
}

/// Lazy enumeration of the ROM codes on a bus, in search order.
///
/// Ends after the last device or after the first line error (which is yielded).
pub struct Devices<'a, B> {
    bus: &'a mut B,
    search: SearchState,
}

impl<B: OneWire> Iterator for Devices<'_, B> {
    type Item = Result<RomCode, B::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.search.next(self.bus) {
            Ok(rom) => rom.map(Ok),
            Err(e) => {
                self.search.last_device = true;
                Some(Err(e))
            }
        }
    }
}

/// Single-wire bus driver for DS18B20 temperature sensors.
///
/// Devices are addressed by slot: their position in a fresh enumeration. The
/// search order only depends on the ROM codes present, so slots are stable for
/// as long as the set of attached devices does not change.
pub struct SingleWireBus<B> {
    bus: B,
}

impl<B: OneWire> SingleWireBus<B> {
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Restart the device search from the beginning.
    pub fn enumerate(&mut self) -> Devices<'_, B> {
        Devices {
            bus: &mut self.bus,
            search: SearchState::default(),
        }
    }

    /// ROM code of the `slot`-th enumerated device.
    pub fn find(&mut self, slot: u8) -> Result<RomCode, BusError> {
        for (index, rom) in self.enumerate().enumerate() {
            let rom = rom.map_err(|e| {
                error!("Single-wire search failed: {:?}", e);
                BusError::Io {
                    operation: "search",
                }
            })?;
            if index == usize::from(slot) {
                return Ok(rom);
            }
        }
        Err(BusError::DeviceNotFound { slot })
    }

    /// Run a temperature conversion on the device in `slot` and read it back.
    ///
    /// `delay` provides the conversion wait, so it is the only suspension point.
    pub async fn read_temperature<D: DelayNs>(
        &mut self,
        slot: u8,
        delay: &mut D,
    ) -> Result<Temperature, BusError> {
        let rom = self.find(slot)?;
        debug!("Bus slot {} is {}", slot, rom);

        if !rom.is_crc_valid() {
            return Err(BusError::ChecksumInvalid);
        }
        if rom.family() != DS18B20_FAMILY {
            return Err(BusError::UnsupportedDeviceFamily(rom.family()));
        }

        self.command(&rom, CONVERT_T)?;
        delay.delay_ms(CONVERSION_TIME_MS).await;
        self.command(&rom, READ_SCRATCHPAD)?;

        let mut scratchpad = [0u8; SCRATCHPAD_LEN];
        for byte in scratchpad.iter_mut() {
            *byte = self.bus.read_byte().map_err(|e| {
                error!("Reading scratchpad of {} failed: {:?}", rom, e);
                BusError::Io {
                    operation: "read scratchpad",
                }
            })?;
        }
        if crc8(&scratchpad[..SCRATCHPAD_LEN - 1]) != scratchpad[SCRATCHPAD_LEN - 1] {
            return Err(BusError::ChecksumInvalid);
        }

        Ok(Temperature::from_scratchpad(&scratchpad))
    }

    /// Reset, select `rom`, then send the function command `function`.
    fn command(&mut self, rom: &RomCode, function: u8) -> Result<(), BusError> {
        let line_error = |e: B::Error| {
            error!("Single-wire command {:#04x} to {} failed: {:?}", function, rom, e);
            BusError::Io {
                operation: "command",
            }
        };

        if !self.bus.reset().map_err(line_error)? {
            return Err(BusError::Io {
                operation: "presence",
            });
        }
        self.bus.select(rom).map_err(line_error)?;
        self.bus.write_byte(function).map_err(line_error)
    }

    pub fn inner(&mut self) -> &mut B {
        &mut self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NoDelay;
    use embassy_futures::block_on;

    fn serial(n: u8) -> [u8; 6] {
        [n, 0x6E, 0x91, 0x16, 0x04, 0x00]
    }

    fn bus_with(devices: &[EmulatedDevice]) -> SingleWireBus<BusEmulator> {
        let mut emulator = BusEmulator::new();
        for device in devices {
            emulator.attach(device.clone()).unwrap();
        }
        SingleWireBus::new(emulator)
    }

    #[test]
    fn test_enumerate_visits_every_device_in_search_order() {
        let mut bus = bus_with(&[
            EmulatedDevice::ds18b20(serial(0x01), 0),
            EmulatedDevice::ds18b20(serial(0x02), 0),
            EmulatedDevice::ds18b20(serial(0x03), 0),
        ]);

        let found: heapless::Vec<u8, 4> = bus
            .enumerate()
            .map(|rom| rom.unwrap().0[1])
            .collect();
        // Search takes the 0 branch first, least significant bit first
        assert_eq!(found.as_slice(), &[0x02, 0x01, 0x03]);

        // Restartable and stable
        let again: heapless::Vec<u8, 4> = bus
            .enumerate()
            .map(|rom| rom.unwrap().0[1])
            .collect();
        assert_eq!(found, again);
    }

    #[test]
    fn test_enumerate_empty_bus() {
        let mut bus = bus_with(&[]);
        assert_eq!(bus.enumerate().count(), 0);
        assert_eq!(bus.find(0), Err(BusError::DeviceNotFound { slot: 0 }));
    }

    #[test]
    fn test_read_temperature_of_each_slot() {
        let mut bus = bus_with(&[
            EmulatedDevice::ds18b20(serial(0x01), 340),
            EmulatedDevice::ds18b20(serial(0x02), -162),
        ]);
        let mut delay = NoDelay::default();

        // Slot 0 is serial 0x02 (see search order above)
        let first = block_on(bus.read_temperature(0, &mut delay)).unwrap();
        assert_eq!(first.raw(), -162);
        let second = block_on(bus.read_temperature(1, &mut delay)).unwrap();
        assert_eq!(second.raw(), 340);
        assert_eq!(second.centi_celsius(), 2125);

        assert_eq!(delay.total_ms(), 2 * CONVERSION_TIME_MS);
    }

    #[test]
    fn test_corrupted_rom_crc_is_rejected() {
        let mut rom = EmulatedDevice::ds18b20(serial(0x01), 340).rom().0;
        rom[7] ^= 0xFF;
        let mut bus = bus_with(&[EmulatedDevice::with_rom(rom, 340)]);

        let result = block_on(bus.read_temperature(0, &mut NoDelay::default()));
        assert_eq!(result, Err(BusError::ChecksumInvalid));
    }

    #[test]
    fn test_unsupported_family_is_rejected() {
        // DS18S20 (0x10) with a valid CRC
        let mut rom = [0x10, 0x01, 0x6E, 0x91, 0x16, 0x04, 0x00, 0x00];
        rom[7] = crc8(&rom[..7]);
        let mut bus = bus_with(&[EmulatedDevice::with_rom(rom, 340)]);

        let result = block_on(bus.read_temperature(0, &mut NoDelay::default()));
        assert_eq!(result, Err(BusError::UnsupportedDeviceFamily(0x10)));
    }

    #[test]
    fn test_slot_beyond_enumeration_is_not_found() {
        let mut bus = bus_with(&[EmulatedDevice::ds18b20(serial(0x01), 340)]);
        let result = block_on(bus.read_temperature(1, &mut NoDelay::default()));
        assert_eq!(result, Err(BusError::DeviceNotFound { slot: 1 }));
    }

    #[test]
    fn test_corrupted_scratchpad_is_rejected() {
        let mut device = EmulatedDevice::ds18b20(serial(0x01), 340);
        device.corrupt_scratchpad();
        let mut bus = bus_with(&[device]);

        let result = block_on(bus.read_temperature(0, &mut NoDelay::default()));
        assert_eq!(result, Err(BusError::ChecksumInvalid));
    }

    #[test]
    fn test_rom_code_display() {
        let rom = RomCode([0x28, 0xFF, 0x4C, 0x6E, 0x91, 0x16, 0x04, 0xA1]);
        let mut text = heapless::String::<32>::new();
        core::fmt::write(&mut text, format_args!("{}", rom)).unwrap();
        assert_eq!(text.as_str(), "28 FF 4C 6E 91 16 04 A1");
        assert!(rom.is_crc_valid());
    }
}
