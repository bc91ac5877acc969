//! Desktop simulator for the garden probe.
//!
//! Runs the probe-core engine in real time against a real control server over
//! TCP. Pins are synthetic and the single-wire bus is emulated, with DS18B20
//! devices whose temperature drifts over time.
//!
//! # Configuration
//!
//! The JSON file given as the first argument (default `probe.json`) holds the
//! probe configuration and the sensors to register. These environment
//! variables (also read from a `.env` file) override it:
//!
//! | Variable               | Overrides                 |
//! |------------------------|---------------------------|
//! | `PROBE_ID`             | `probe.probe_id`          |
//! | `PROBE_SERVER_ADDRESS` | `probe.server.address`    |
//! | `PROBE_SERVER_PORT`    | `probe.server.port`       |
//! | `PROBE_TOKEN`          | `probe.server.token`      |
//! | `PROBE_RUN_SECS`       | stop after this many secs |

use std::f64::consts::TAU;
use std::io::{self, Read as _, Write as _};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use embassy_futures::block_on;
use embassy_time::{Delay, Instant};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use log::{error, info, warn};
use serde::Deserialize;

use probe_core::app_state::{Collaborators, Probe, ProbeTask, Scheduler};
use probe_core::clock::EmbassyClock;
use probe_core::config::ProbeConfig;
use probe_core::onewire::{BusEmulator, EmulatedDevice};
use probe_core::sensors::PinInput;
use probe_core::sync::{Connection, ServerSchedule};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Scheduler resolution.
const TICK: Duration = Duration::from_millis(250);

/// How long a read may block before the response is considered finished.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between probe state dumps.
const DEBUG_INFO_INTERVAL_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct SimulatorConfig<'a> {
    #[serde(borrow)]
    probe: ProbeConfig<'a>,
    #[serde(borrow)]
    sensors: Vec<SensorEntry<'a>>,
    /// Emulated DS18B20s attached to the bus
    bus_devices: u8,
}

#[derive(Deserialize, Debug)]
struct SensorEntry<'a> {
    id: &'a str,
    pin: u8,
    /// 1 analog, 2 digital, 3 bus temperature
    kind: u8,
}

/// Values from the environment, owned here so the config can borrow them.
struct EnvOverrides {
    probe_id: Option<String>,
    address: Option<String>,
    port: Option<u16>,
    token: Option<String>,
    run_secs: Option<u64>,
}

impl EnvOverrides {
    fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            info!("No .env file loaded ({})", e);
        }
        Self {
            probe_id: std::env::var("PROBE_ID").ok(),
            address: std::env::var("PROBE_SERVER_ADDRESS").ok(),
            port: std::env::var("PROBE_SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok()),
            token: std::env::var("PROBE_TOKEN").ok(),
            run_secs: std::env::var("PROBE_RUN_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    fn apply<'a>(&'a self, config: &mut ProbeConfig<'a>) {
        if let Some(id) = &self.probe_id {
            config.probe_id = id;
        }
        if let Some(address) = &self.address {
            config.server.address = address;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(token) = &self.token {
            config.server.token = token;
        }
    }
}

// ---------------------------------------------------------------------------
// TCP connection
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TcpError(io::Error);

impl std::fmt::Display for TcpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tcp: {}", self.0)
    }
}

impl std::error::Error for TcpError {}

impl embedded_io_async::Error for TcpError {
    fn kind(&self) -> ErrorKind {
        match self.0.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
            io::ErrorKind::NotConnected => ErrorKind::NotConnected,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
            io::ErrorKind::InvalidData => ErrorKind::InvalidData,
            _ => ErrorKind::Other,
        }
    }
}

impl From<io::Error> for TcpError {
    fn from(e: io::Error) -> Self {
        Self(e)
    }
}

/// Blocking `std` socket behind the async connection interface. The
/// simulator is single-threaded, so blocking inside the futures is fine.
#[derive(Debug, Default)]
struct TcpConnection {
    stream: Option<TcpStream>,
}

impl TcpConnection {
    fn stream(&mut self) -> Result<&mut TcpStream, TcpError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TcpError(io::ErrorKind::NotConnected.into()))
    }
}

impl ErrorType for TcpConnection {
    type Error = TcpError;
}

impl Read for TcpConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self.stream()?.read(buf) {
            Ok(n) => Ok(n),
            // A server that keeps the socket open after the body: treat as end of stream
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                warn!("Response read timed out, assuming end of body");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Write for TcpConnection {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(self.stream()?.write(buf)?)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(self.stream()?.flush()?)
    }
}

impl Connection for TcpConnection {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), Self::Error> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

// ---------------------------------------------------------------------------
// Synthetic inputs
// ---------------------------------------------------------------------------

/// Seconds since the simulator started.
fn uptime_secs() -> f64 {
    Instant::now().as_millis() as f64 / 1000.0
}

/// Analog and digital inputs that vary slowly over time.
struct SyntheticPins;

impl PinInput for SyntheticPins {
    fn read_analog(&mut self, pin: u8) -> u16 {
        let t = uptime_secs();
        // Each pin gets its own phase; 10-bit ADC range
        let phase = f64::from(pin) * 0.7;
        let level = 512.0 + 300.0 * (TAU * t / 600.0 + phase).sin() + 20.0 * (t / 7.0).cos();
        level.clamp(0.0, 1023.0) as u16
    }

    fn read_digital(&mut self, pin: u8) -> bool {
        // Toggles every few minutes, staggered by pin
        (uptime_secs() as u64 / 180 + u64::from(pin)) % 2 == 0
    }
}

/// Serial for the `index`-th emulated DS18B20.
fn device_serial(index: u8) -> [u8; 6] {
    [index, 0x4C, 0x6E, 0x91, 0x16, 0x04]
}

/// Synthetic temperature of device `index`, in 1/16 degree Celsius.
fn drifting_temperature(index: u8) -> i16 {
    let t = uptime_secs();
    let celsius = 18.0 + 2.0 * f64::from(index) + 4.0 * (TAU * t / 900.0).sin();
    (celsius * 16.0) as i16
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Timer {
    interval_secs: u32,
    task: ProbeTask,
    enabled: bool,
    next_due: u64,
}

/// Fires probe tasks from a polling loop, in whole seconds of uptime.
#[derive(Default)]
struct TickScheduler {
    timers: Vec<Timer>,
    once: Vec<(u64, ProbeTask)>,
}

impl TickScheduler {
    fn now() -> u64 {
        Instant::now().as_secs()
    }

    /// Tasks due now, one-shots first.
    fn due(&mut self) -> Vec<ProbeTask> {
        let now = Self::now();
        let mut tasks = Vec::new();
        self.once.retain(|&(at, task)| {
            let due = at <= now;
            if due {
                tasks.push(task);
            }
            !due
        });
        for timer in self.timers.iter_mut().filter(|t| t.enabled) {
            if timer.next_due <= now {
                tasks.push(timer.task);
                timer.next_due = now + u64::from(timer.interval_secs);
            }
        }
        tasks
    }

    fn set_interval(&mut self, task: ProbeTask, interval_secs: u32) {
        for timer in self.timers.iter_mut().filter(|t| t.task == task) {
            if timer.interval_secs != interval_secs {
                info!("{:?} interval now {}s", task, interval_secs);
                timer.interval_secs = interval_secs;
                timer.next_due = Self::now() + u64::from(interval_secs);
            }
        }
    }
}

impl Scheduler for TickScheduler {
    type Handle = usize;

    fn schedule_once(&mut self, delay_secs: u32, task: ProbeTask) {
        self.once.push((Self::now() + u64::from(delay_secs), task));
    }

    fn schedule_repeating(&mut self, interval_secs: u32, task: ProbeTask) -> usize {
        self.timers.push(Timer {
            interval_secs,
            task,
            enabled: true,
            next_due: Self::now() + u64::from(interval_secs),
        });
        self.timers.len() - 1
    }

    fn enable(&mut self, handle: usize) {
        let now = Self::now();
        if let Some(timer) = self.timers.get_mut(handle) {
            if !timer.enabled {
                timer.enabled = true;
                timer.next_due = now + u64::from(timer.interval_secs);
            }
        }
    }

    fn disable(&mut self, handle: usize) {
        if let Some(timer) = self.timers.get_mut(handle) {
            timer.enabled = false;
        }
    }

    /// The control server may hand out new intervals with each sync.
    fn on_sync_response(&mut self, body: &str) {
        let schedule = ServerSchedule::parse(body);
        if let Some(secs) = schedule.read_interval_secs {
            self.set_interval(ProbeTask::ReadSensors, secs);
        }
        if let Some(secs) = schedule.sync_interval_secs {
            self.set_interval(ProbeTask::Sync, secs);
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    info!("Starting probe simulator");

    let env = EnvOverrides::load();
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "probe.json".to_owned());
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            warn!("Cannot read {} ({}), using defaults", path, e);
            String::from("{}")
        }
    };
    let mut config: SimulatorConfig<'_> = match serde_json::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration in {}: {}", path, e);
            std::process::exit(1);
        }
    };
    env.apply(&mut config.probe);

    let mut bus: BusEmulator = BusEmulator::new();
    for index in 0..config.bus_devices {
        let device = EmulatedDevice::ds18b20(device_serial(index), drifting_temperature(index));
        info!("Bus device {}: {}", index, device.rom());
        if bus.attach(device).is_err() {
            warn!("Bus is full, device {} not attached", index);
        }
    }

    let mut probe: Probe<'_, _, _, _, _, _, usize> = Probe::new(
        config.probe,
        Collaborators {
            pins: SyntheticPins,
            bus,
            connection: TcpConnection::default(),
            clock: EmbassyClock::new(),
            delay: Delay,
        },
    );
    for sensor in &config.sensors {
        // Rejected sensors are reported with their code; carry on without them
        let _ = probe.add_sensor_raw(sensor.id, sensor.pin, sensor.kind);
    }
    probe.log_debug_info();

    let mut scheduler = TickScheduler::default();
    probe.start(&mut scheduler);

    let started = Instant::now();
    let mut last_debug_info = Instant::now();

    loop {
        for task in scheduler.due() {
            if task == ProbeTask::ReadSensors {
                let devices = probe.bus_mut().inner();
                for index in 0..config.bus_devices {
                    if let Some(device) = devices.device_mut(usize::from(index)) {
                        device.set_raw(drifting_temperature(index));
                    }
                }
            }
            if let Err(e) = block_on(probe.run_task(task, &mut scheduler)) {
                warn!("{:?} did not complete: {}", task, e);
            }
        }

        if last_debug_info.elapsed().as_secs() >= DEBUG_INFO_INTERVAL_SECS {
            probe.log_debug_info();
            last_debug_info = Instant::now();
        }

        if env
            .run_secs
            .is_some_and(|limit| started.elapsed().as_secs() >= limit)
        {
            break;
        }

        std::thread::sleep(TICK);
    }

    probe.log_debug_info();
    info!("Simulator exiting");
}
