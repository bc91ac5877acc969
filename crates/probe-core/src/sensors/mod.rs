mod registry;

pub use registry::*;

use crate::config::{ONE_WIRE_PIN, SENSOR_ID_LEN};
use crate::errors::OperatorCode;
use thiserror_no_std::Error;

/// Kinds of sensors a probe knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Analog input, stored as the raw ADC count
    Analog,
    /// Digital input, stored as 0 or 1
    Digital,
    /// DS18B20 thermometer on the single-wire bus, stored in 1/100 degree
    BusTemperature,
}

impl SensorKind {
    /// Numeric code used by configuration files and the operator trace.
    pub const fn code(self) -> u8 {
        match self {
            Self::Analog => 1,
            Self::Digital => 2,
            Self::BusTemperature => 3,
        }
    }
}

impl TryFrom<u8> for SensorKind {
    type Error = RegistrationError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Analog),
            2 => Ok(Self::Digital),
            3 => Ok(Self::BusTemperature),
            other => Err(RegistrationError::UnknownKind(other)),
        }
    }
}

/// Where a sensor is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// A directly attached input pin
    Pin(u8),
    /// The `slot`-th device found when enumerating the single-wire bus
    Bus { slot: u8 },
}

impl Channel {
    /// Physical pin backing this channel.
    pub const fn pin(self) -> u8 {
        match self {
            Self::Pin(pin) => pin,
            Self::Bus { .. } => ONE_WIRE_PIN,
        }
    }
}

pub type SensorId = heapless::String<SENSOR_ID_LEN>;

/// A registered sensor. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub id: SensorId,
    pub channel: Channel,
    pub kind: SensorKind,
}

/// Raw pin I/O provided by the board.
pub trait PinInput {
    /// Sample an analog input, returning the raw ADC count.
    fn read_analog(&mut self, pin: u8) -> u16;

    /// Sample a digital input.
    fn read_digital(&mut self, pin: u8) -> bool;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("pin {0} is reserved")]
    ReservedChannel(u8),
    #[error("maximum number of sensors already registered")]
    CapacityExceeded,
    #[error("{kind:?} sensor cannot use pin {pin}: bus temperature sensors and only they use the single-wire pin")]
    ChannelKindMismatch { pin: u8, kind: SensorKind },
    #[error("unknown sensor kind {0}")]
    UnknownKind(u8),
    #[error("pin {0} is not an analog input")]
    InvalidAnalogPin(u8),
    #[error("pin {0} is not a digital input")]
    InvalidDigitalPin(u8),
    #[error("sensor id is already registered")]
    DuplicateId,
    #[error("sensor id must be 1-16 printable characters without quotes or backslashes")]
    InvalidId,
    #[error("sensors cannot be added once the probe is running")]
    RegistryLocked,
}

impl OperatorCode for RegistrationError {
    fn code(&self) -> u16 {
        match self {
            Self::ReservedChannel(_) => 100,
            Self::CapacityExceeded => 101,
            Self::ChannelKindMismatch { .. } => 102,
            Self::UnknownKind(_) => 103,
            Self::DuplicateId => 104,
            Self::InvalidId => 105,
            Self::RegistryLocked => 106,
            Self::InvalidAnalogPin(_) => 110,
            Self::InvalidDigitalPin(_) => 111,
        }
    }
}
