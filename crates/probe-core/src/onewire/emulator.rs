use core::convert::Infallible;

use heapless::Vec;

use super::{
    CONVERT_T, DS18B20_FAMILY, MATCH_ROM, OneWire, READ_SCRATCHPAD, RomCode, SCRATCHPAD_LEN,
    SEARCH_ROM, SKIP_ROM, Temperature, crc8,
};

/// A DS18B20 as seen from the bus: ROM code and current scratchpad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatedDevice {
    rom: RomCode,
    scratchpad: [u8; SCRATCHPAD_LEN],
}

impl EmulatedDevice {
    /// DS18B20 with the given 48-bit serial (least significant byte first)
    /// currently reading `raw` sixteenths of a degree.
    pub fn ds18b20(serial: [u8; 6], raw: i16) -> Self {
        let mut rom = [0u8; 8];
        rom[0] = DS18B20_FAMILY;
        rom[1..7].copy_from_slice(&serial);
        rom[7] = crc8(&rom[..7]);
        Self::with_rom(rom, raw)
    }

    /// Device answering to an arbitrary ROM code, CRC and family unchecked.
    pub fn with_rom(rom: [u8; 8], raw: i16) -> Self {
        Self {
            rom: RomCode(rom),
            scratchpad: Temperature::from_raw(raw).to_scratchpad(),
        }
    }

    pub fn rom(&self) -> RomCode {
        self.rom
    }

    pub fn temperature(&self) -> Temperature {
        Temperature::from_scratchpad(&self.scratchpad)
    }

    /// Update the reading served by the next scratchpad read.
    pub fn set_raw(&mut self, raw: i16) {
        self.scratchpad = Temperature::from_raw(raw).to_scratchpad();
    }

    /// Flip the scratchpad CRC, as a noisy line would.
    pub fn corrupt_scratchpad(&mut self) {
        self.scratchpad[SCRATCHPAD_LEN - 1] ^= 0xFF;
    }

    fn scratchpad_bit(&self, n: usize) -> bool {
        (self.scratchpad[n / 8] >> (n % 8)) & 0x01 == 0x01
    }
}

/// What the devices expect next on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing until the next reset
    Idle,
    RomCommand,
    Search { bit: usize, step: SearchStep },
    Match { bit: usize },
    FunctionCommand,
    ReadScratchpad { bit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchStep {
    Bit,
    Complement,
    Direction,
}

/// Bit-accurate single-wire bus with emulated DS18B20 devices attached.
///
/// Reads are wired-AND: a bit reads 0 if any selected device pulls the line
/// low and 1 on an idle line. Conversions complete instantly.
#[derive(Debug)]
pub struct BusEmulator<const N: usize = 8> {
    devices: Vec<EmulatedDevice, N>,
    selected: [bool; N],
    phase: Phase,
    shift: u8,
    shifted_bits: u8,
}

impl<const N: usize> Default for BusEmulator<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BusEmulator<N> {
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
            selected: [false; N],
            phase: Phase::Idle,
            shift: 0,
            shifted_bits: 0,
        }
    }

    /// Connect a device. Gives it back if the bus is full.
    pub fn attach(&mut self, device: EmulatedDevice) -> Result<(), EmulatedDevice> {
        self.devices.push(device)
    }

    pub fn devices(&self) -> &[EmulatedDevice] {
        &self.devices
    }

    pub fn device_mut(&mut self, index: usize) -> Option<&mut EmulatedDevice> {
        self.devices.get_mut(index)
    }

    /// Wired-AND of `bit` over the selected devices.
    fn line(&self, bit: impl Fn(&EmulatedDevice) -> bool) -> bool {
        self.devices
            .iter()
            .zip(self.selected.iter())
            .filter(|(_, selected)| **selected)
            .all(|(device, _)| bit(device))
    }

    /// Drop devices whose ROM bit `n` differs from what the master sent.
    fn deselect_mismatches(&mut self, n: usize, bit: bool) {
        for (device, selected) in self.devices.iter().zip(self.selected.iter_mut()) {
            if device.rom.bit(n) != bit {
                *selected = false;
            }
        }
    }

    fn on_byte(&mut self, byte: u8) {
        self.phase = match (self.phase, byte) {
            (Phase::RomCommand, SEARCH_ROM) => Phase::Search {
                bit: 0,
                step: SearchStep::Bit,
            },
            (Phase::RomCommand, MATCH_ROM) => Phase::Match { bit: 0 },
            (Phase::RomCommand, SKIP_ROM) => Phase::FunctionCommand,
            (Phase::FunctionCommand, READ_SCRATCHPAD) => Phase::ReadScratchpad { bit: 0 },
            (Phase::FunctionCommand, CONVERT_T) => Phase::Idle,
            _ => Phase::Idle,
        };
    }
}

impl<const N: usize> OneWire for BusEmulator<N> {
    type Error = Infallible;

    fn reset(&mut self) -> Result<bool, Self::Error> {
        for (i, selected) in self.selected.iter_mut().enumerate() {
            *selected = i < self.devices.len();
        }
        self.phase = Phase::RomCommand;
        self.shift = 0;
        self.shifted_bits = 0;
        Ok(!self.devices.is_empty())
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error> {
        match self.phase {
            Phase::RomCommand | Phase::FunctionCommand => {
                if bit {
                    self.shift |= 1 << self.shifted_bits;
                }
                self.shifted_bits += 1;
                if self.shifted_bits == 8 {
                    let byte = self.shift;
                    self.shift = 0;
                    self.shifted_bits = 0;
                    self.on_byte(byte);
                }
            }
            Phase::Search {
                bit: n,
                step: SearchStep::Direction,
            } => {
                self.deselect_mismatches(n, bit);
                self.phase = if n + 1 == 64 {
                    Phase::FunctionCommand
                } else {
                    Phase::Search {
                        bit: n + 1,
                        step: SearchStep::Bit,
                    }
                };
            }
            Phase::Match { bit: n } => {
                self.deselect_mismatches(n, bit);
                self.phase = if n + 1 == 64 {
                    Phase::FunctionCommand
                } else {
                    Phase::Match { bit: n + 1 }
                };
            }
            // Out-of-protocol write: devices stop listening until reset
            _ => self.phase = Phase::Idle,
        }
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, Self::Error> {
        let level = match self.phase {
            Phase::Search { bit: n, step } => match step {
                SearchStep::Bit => {
                    self.phase = Phase::Search {
                        bit: n,
                        step: SearchStep::Complement,
                    };
                    self.line(|d| d.rom.bit(n))
                }
                SearchStep::Complement => {
                    self.phase = Phase::Search {
                        bit: n,
                        step: SearchStep::Direction,
                    };
                    self.line(|d| !d.rom.bit(n))
                }
                SearchStep::Direction => true,
            },
            Phase::ReadScratchpad { bit: n } if n < SCRATCHPAD_LEN * 8 => {
                self.phase = Phase::ReadScratchpad { bit: n + 1 };
                self.line(|d| d.scratchpad_bit(n))
            }
            _ => true,
        };
        Ok(level)
    }
}
