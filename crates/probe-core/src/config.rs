//! Probe configuration and board constants.
//!
//! The constants describe the reference board (an UNO-class controller with a
//! radio shield). Everything the operator is expected to tune lives in
//! [`ProbeConfig`], which deserializes from borrowed text so it can be baked
//! into flash or loaded by a host tool.

use core::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Maximum number of sensors a probe can register. Memory is tight.
pub const MAX_SENSORS: usize = 5;

/// Readings retained per sensor between two syncs. Once reached, the oldest
/// readings are overwritten.
pub const MAX_DATA_POINTS: usize = 20;

/// Connect attempts made during one sync before giving up.
pub const MAX_CONNECTION_ATTEMPTS: u8 = 25;

/// The only pin wired to the single-wire bus.
pub const ONE_WIRE_PIN: u8 = 9;

/// Pins used by the radio shield's SPI link; no sensor may claim them.
pub const RESERVED_PINS: [u8; 5] = [7, 10, 11, 12, 13];

/// Valid digital input identifiers (D0-D13).
pub const DIGITAL_PINS: RangeInclusive<u8> = 0..=13;

/// Valid analog input identifiers (A0-A5).
pub const ANALOG_PINS: RangeInclusive<u8> = 14..=19;

/// Longest sensor id, in bytes.
pub const SENSOR_ID_LEN: usize = 16;

/// Unit used when storing bus temperature readings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    #[default]
    Fahrenheit,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(bound(deserialize = "'de: 'a"))]
#[serde(default)]
pub struct ProbeConfig<'a> {
    /// Unique id this probe reports to the control server.
    pub probe_id: &'a str,
    pub server: ServerConfig<'a>,
    pub sync: SyncConfig,
    pub schedule: ScheduleConfig,
    pub temperature_unit: TemperatureUnit,
}

impl Default for ProbeConfig<'_> {
    fn default() -> Self {
        Self {
            probe_id: "probe",
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            schedule: ScheduleConfig::default(),
            temperature_unit: TemperatureUnit::default(),
        }
    }
}

/// Where the control server lives and how to authenticate with it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct ServerConfig<'a> {
    pub address: &'a str,
    pub port: u16,
    pub token: &'a str,
}

impl Default for ServerConfig<'_> {
    fn default() -> Self {
        Self {
            address: "localhost",
            port: 5000,
            token: "changeme",
        }
    }
}

/// Retry and latency policy of one sync attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub max_attempts: u8,
    /// Pause between two failed connect attempts.
    pub retry_backoff_ms: u32,
    /// How long the server is given to answer before the response is read.
    pub response_latency_ms: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_CONNECTION_ATTEMPTS,
            retry_backoff_ms: 1000,
            response_latency_ms: 5000,
        }
    }
}

/// Cadence of the two repeating timers handed to the scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub sensor_read_interval_secs: u32,
    pub sync_interval_secs: u32,
    /// Delay before another sync when no sync has succeeded yet. The repeating
    /// timers stay paused until then.
    pub unsynced_retry_secs: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        // 15 minute reads, 4 hour syncs: 16 readings per window, fits in MAX_DATA_POINTS
        Self {
            sensor_read_interval_secs: 15 * 60,
            sync_interval_secs: 4 * 60 * 60,
            unsynced_retry_secs: 60,
        }
    }
}
