//! Test doubles for the probe's collaborators.

use core::cell::Cell;

use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use heapless::Vec;

use crate::app_state::{ProbeTask, Scheduler};
use crate::clock::Clock;
use crate::sensors::PinInput;
use crate::sync::Connection;

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Option<u32>>,
}

impl ManualClock {
    pub fn at(now: u32) -> Self {
        Self {
            now: Cell::new(Some(now)),
        }
    }

    pub fn unset() -> Self {
        Self::default()
    }

    pub fn advance(&self, secs: u32) {
        self.now.set(self.now.get().map(|t| t + secs));
    }

    pub fn rewind(&self, secs: u32) {
        self.now.set(self.now.get().map(|t| t - secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Option<u32> {
        self.now.get()
    }

    fn set_now(&mut self, now: u32) {
        self.now.set(Some(now));
    }
}

/// Delay that returns immediately and adds up what was asked of it.
#[derive(Debug, Default)]
pub struct NoDelay {
    total_ns: u64,
}

impl NoDelay {
    pub fn total_ms(&self) -> u32 {
        (self.total_ns / 1_000_000) as u32
    }
}

impl embedded_hal::delay::DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ns += u64::from(ms) * 1_000_000;
    }
}

impl embedded_hal_async::delay::DelayNs for NoDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.total_ns += u64::from(ms) * 1_000_000;
    }
}

/// Pin inputs with fixed levels. Unset pins read 0 / low.
#[derive(Debug, Default)]
pub struct FakePins {
    analog: [u16; 20],
    digital: [bool; 20],
}

impl FakePins {
    pub fn set_analog(&mut self, pin: u8, value: u16) {
        self.analog[usize::from(pin)] = value;
    }

    pub fn set_digital(&mut self, pin: u8, level: bool) {
        self.digital[usize::from(pin)] = level;
    }
}

impl PinInput for FakePins {
    fn read_analog(&mut self, pin: u8) -> u16 {
        self.analog[usize::from(pin)]
    }

    fn read_digital(&mut self, pin: u8) -> bool {
        self.digital[usize::from(pin)]
    }
}

/// Connection that refuses a number of connects, records the request and
/// plays back a canned response.
#[derive(Debug, Default)]
pub struct ScriptedConnection {
    response: &'static str,
    position: usize,
    refuse_remaining: usize,
    refuse_forever: bool,
    connects: usize,
    open: bool,
    sent: Vec<u8, 1024>,
}

impl ScriptedConnection {
    pub fn responding(response: &'static str) -> Self {
        Self {
            response,
            ..Self::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_forever: true,
            ..Self::default()
        }
    }

    pub fn failing_first(mut self, attempts: usize) -> Self {
        self.refuse_remaining = attempts;
        self
    }

    /// Serve `response` on the next session and forget what was sent.
    pub fn rearm(&mut self, response: &'static str) {
        self.response = response;
        self.position = 0;
        self.sent.clear();
    }

    pub fn connects(&self) -> usize {
        self.connects
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn sent(&self) -> &str {
        core::str::from_utf8(&self.sent).unwrap()
    }
}

impl ErrorType for ScriptedConnection {
    type Error = ErrorKind;
}

impl Read for ScriptedConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        // Small chunks so line reassembly is exercised
        let remaining = &self.response.as_bytes()[self.position..];
        let n = remaining.len().min(buf.len()).min(7);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

impl Write for ScriptedConnection {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if !self.open {
            return Err(ErrorKind::NotConnected);
        }
        self.sent
            .extend_from_slice(buf)
            .map_err(|_| ErrorKind::OutOfMemory)?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Connection for ScriptedConnection {
    async fn connect(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> {
        self.connects += 1;
        if self.refuse_forever || self.refuse_remaining > 0 {
            self.refuse_remaining = self.refuse_remaining.saturating_sub(1);
            return Err(ErrorKind::ConnectionRefused);
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Scheduler that records every call.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    pub once: Vec<(u32, ProbeTask), 8>,
    pub repeating: Vec<(u32, ProbeTask), 4>,
    pub enabled: [bool; 4],
    pub responses: usize,
}

impl Scheduler for RecordingScheduler {
    type Handle = usize;

    fn schedule_once(&mut self, delay_secs: u32, task: ProbeTask) {
        let _ = self.once.push((delay_secs, task));
    }

    fn schedule_repeating(&mut self, interval_secs: u32, task: ProbeTask) -> Self::Handle {
        let _ = self.repeating.push((interval_secs, task));
        self.repeating.len() - 1
    }

    fn enable(&mut self, handle: Self::Handle) {
        self.enabled[handle] = true;
    }

    fn disable(&mut self, handle: Self::Handle) {
        self.enabled[handle] = false;
    }

    fn on_sync_response(&mut self, _body: &str) {
        self.responses += 1;
    }
}

/// Sync answer of the Flask control server: `jsonify` output
/// with sorted keys and two-space indentation, 324 body bytes.
pub const PRETTY_SYNC_RESPONSE: &str = "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\nContent-Length: 324\r\nServer: Werkzeug/0.9.6 Python/2.7.6\r\n\r\n{\n  \"curr_time\": 1700000000,\n  \"interval\": 3600,\n  \"probe_id\": \"test_probe\",\n  \"sensor_commands\": [\n    {\n      \"id\": \"tmp0\",\n      \"interval\": 300\n    },\n    {\n      \"id\": \"tmp1\",\n      \"interval\": 300\n    },\n    {\n      \"id\": \"pho0\",\n      \"interval\": 300\n    },\n    {\n      \"id\": \"mos0\",\n      \"interval\": 300\n    }\n  ]\n}";
