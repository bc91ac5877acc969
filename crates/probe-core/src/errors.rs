//! Numeric error codes surfaced on the operator channel.
//!
//! Every failure the probe can hit maps to a distinct code so that a serial
//! trace (or a log collector) can be read without symbol information:
//!
//! | Range | Family                                   |
//! |-------|------------------------------------------|
//! | 1xx   | Sensor registration                      |
//! | 2xx   | Single-wire bus / temperature read       |
//! | 3xx   | Control server synchronization           |

use core::fmt::Display;

use log::error;

/// An error that can be reported to the operator as a numeric code.
pub trait OperatorCode {
    fn code(&self) -> u16;
}

/// Log `err` on the operator channel as `ERROR <code>: <message>`.
pub fn report<E: OperatorCode + Display>(err: &E) {
    error!("ERROR {}: {}", err.code(), err);
}
