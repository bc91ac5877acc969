use crate::config::TemperatureUnit;

/// Family code of the DS18B20 digital thermometer
pub const DS18B20_FAMILY: u8 = 0x28;
/// Function command: start a temperature conversion
pub const CONVERT_T: u8 = 0x44;
/// Function command: read the 9-byte scratchpad
pub const READ_SCRATCHPAD: u8 = 0xBE;
/// Worst-case conversion time at 12-bit resolution
pub const CONVERSION_TIME_MS: u32 = 750;
/// Scratchpad bytes including the trailing CRC
pub const SCRATCHPAD_LEN: usize = 9;

/// DS18B20 temperature as the signed 12-bit count in 1/16 degree Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Temperature {
    raw: i16,
}

impl Temperature {
    pub const fn from_raw(raw: i16) -> Self {
        Self { raw }
    }

    /// Temperature in scratchpad bytes 0 (LSB) and 1 (MSB).
    pub fn from_scratchpad(scratchpad: &[u8; SCRATCHPAD_LEN]) -> Self {
        Self::from_raw(i16::from_le_bytes([scratchpad[0], scratchpad[1]]))
    }

    pub const fn raw(self) -> i16 {
        self.raw
    }

    /// Hundredths of a degree Celsius, truncated toward zero.
    pub const fn centi_celsius(self) -> i32 {
        self.raw as i32 * 25 / 4
    }

    /// Hundredths of a degree Fahrenheit, truncated toward zero.
    ///
    /// `raw / 16 * 9 / 5 + 32` scaled by 100, kept in integers.
    pub const fn centi_fahrenheit(self) -> i32 {
        (self.raw as i32 * 45 + 12_800) / 4
    }

    pub const fn centi(self, unit: TemperatureUnit) -> i32 {
        match unit {
            TemperatureUnit::Celsius => self.centi_celsius(),
            TemperatureUnit::Fahrenheit => self.centi_fahrenheit(),
        }
    }

    /// Scratchpad image for this temperature with the power-on alarm and
    /// configuration registers (12-bit resolution), CRC included.
    pub fn to_scratchpad(self) -> [u8; SCRATCHPAD_LEN] {
        let [lsb, msb] = self.raw.to_le_bytes();
        let mut scratchpad = [lsb, msb, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10, 0x00];
        scratchpad[SCRATCHPAD_LEN - 1] = super::crc8(&scratchpad[..SCRATCHPAD_LEN - 1]);
        scratchpad
    }
}
