use crc::{CRC_8_MAXIM_DOW, Crc};

// Dallas/Maxim CRC-8 (poly 0x31 reflected, init 0x00), used by ROM codes
// (byte 7) and the DS18B20 scratchpad (byte 8).
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// CRC-8 of `data` as computed by single-wire devices.
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}
