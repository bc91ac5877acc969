//! Probe-wide state: every component plus the collaborator handles.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embedded_hal_async::delay::DelayNs;
use log::info;
use thiserror_no_std::Error;

use crate::clock::{Clock, ClockState};
use crate::config::ProbeConfig;
use crate::errors::{self, OperatorCode};
use crate::onewire::{OneWire, SingleWireBus};
use crate::sampling::{AcquisitionCycle, CycleSummary};
use crate::sensors::{PinInput, RegistrationError, SensorKind, SensorRegistry};
use crate::storage::ReadingStore;
use crate::sync::{Connection, SyncClient, SyncError, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    /// Sensors are being registered
    Configuring,
    /// Started, waiting for the first successful sync to learn the time
    AwaitingTime,
    Idle,
    Sampling,
    Syncing,
}

/// Work the scheduler hands back to the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTask {
    ReadSensors,
    Sync,
}

/// Timer facility that fires [`ProbeTask`]s.
///
/// Intervals and delays are in seconds. The scheduler calls
/// [`Probe::run_task`] when a task is due.
pub trait Scheduler {
    type Handle: Copy;

    fn schedule_once(&mut self, delay_secs: u32, task: ProbeTask);

    fn schedule_repeating(&mut self, interval_secs: u32, task: ProbeTask) -> Self::Handle;

    fn enable(&mut self, handle: Self::Handle);

    fn disable(&mut self, handle: Self::Handle);

    /// Raw body of a successful sync response, for schedule fields the core
    /// does not interpret.
    fn on_sync_response(&mut self, body: &str) {
        let _ = body;
    }
}

/// Handles of the two repeating timers created by [`Probe::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timers<H> {
    pub read_sensors: H,
    pub sync: H,
}

/// Hardware and platform services the probe runs on.
pub struct Collaborators<P, B, T, K, D> {
    pub pins: P,
    /// Single-wire line
    pub bus: B,
    pub connection: T,
    pub clock: K,
    pub delay: D,
}

/// Everything a running probe owns.
///
/// Every mutating operation takes `&mut self`, so sampling and syncing never
/// overlap. Share it between tasks through [`SharedProbe`].
pub struct Probe<'a, P, B, T, K, D, H> {
    config: ProbeConfig<'a>,
    registry: SensorRegistry,
    store: ReadingStore,
    clock: ClockState<K>,
    pins: P,
    bus: SingleWireBus<B>,
    sync: SyncClient<T>,
    delay: D,
    run_state: AppRunState,
    timers: Option<Timers<H>>,
}

impl<'a, P, B, T, K, D, H> Probe<'a, P, B, T, K, D, H>
where
    P: PinInput,
    B: OneWire,
    T: Connection,
    K: Clock,
    D: DelayNs,
    H: Copy,
{
    pub fn new(config: ProbeConfig<'a>, io: Collaborators<P, B, T, K, D>) -> Self {
        Self {
            config,
            registry: SensorRegistry::new(),
            store: ReadingStore::new(),
            clock: ClockState::new(io.clock),
            pins: io.pins,
            bus: SingleWireBus::new(io.bus),
            sync: SyncClient::new(io.connection),
            delay: io.delay,
            run_state: AppRunState::Configuring,
            timers: None,
        }
    }

    /// Register a sensor. Failures are reported with their code and the probe
    /// carries on without the sensor.
    pub fn add_sensor(&mut self, id: &str, pin: u8, kind: SensorKind) -> Result<(), RegistrationError> {
        self.check_configuring()
            .and_then(|()| self.registry.register(id, pin, kind).map(|_| ()))
            .inspect_err(errors::report)
    }

    /// Register a sensor using the numeric kind code (1 analog, 2 digital,
    /// 3 bus temperature).
    pub fn add_sensor_raw(&mut self, id: &str, pin: u8, kind: u8) -> Result<(), RegistrationError> {
        self.check_configuring()
            .and_then(|()| self.registry.register_raw(id, pin, kind).map(|_| ()))
            .inspect_err(errors::report)
    }

    fn check_configuring(&self) -> Result<(), RegistrationError> {
        match self.run_state {
            AppRunState::Configuring => Ok(()),
            _ => Err(RegistrationError::RegistryLocked),
        }
    }

    /// Create the two repeating timers, paused until the first successful
    /// sync establishes the time, and sync right away.
    pub fn start<S>(&mut self, scheduler: &mut S)
    where
        S: Scheduler<Handle = H>,
    {
        let schedule = self.config.schedule;
        let timers = Timers {
            read_sensors: scheduler
                .schedule_repeating(schedule.sensor_read_interval_secs, ProbeTask::ReadSensors),
            sync: scheduler.schedule_repeating(schedule.sync_interval_secs, ProbeTask::Sync),
        };
        scheduler.disable(timers.read_sensors);
        scheduler.disable(timers.sync);
        scheduler.schedule_once(0, ProbeTask::Sync);

        self.timers = Some(timers);
        self.run_state = AppRunState::AwaitingTime;
        info!(
            "Probe {} started with {} sensors (read every {}s, sync every {}s)",
            self.config.probe_id,
            self.registry.len(),
            schedule.sensor_read_interval_secs,
            schedule.sync_interval_secs
        );
    }

    /// Sample every sensor once.
    pub async fn read_sensors(&mut self) -> CycleSummary {
        let previous = self.run_state;
        self.run_state = AppRunState::Sampling;

        let summary = AcquisitionCycle::new(self.config.temperature_unit)
            .run(
                &self.registry,
                &mut self.pins,
                &mut self.bus,
                &mut self.store,
                &self.clock,
                &mut self.delay,
            )
            .await;

        self.run_state = previous;
        summary
    }

    /// Upload buffered readings and resync the clock.
    ///
    /// The repeating timers are paused for the duration and resumed only
    /// once the time is known.
    pub async fn sync_with_server<S>(&mut self, scheduler: &mut S) -> Result<SyncReport, SyncError>
    where
        S: Scheduler<Handle = H>,
    {
        if let Some(timers) = self.timers {
            scheduler.disable(timers.read_sensors);
            scheduler.disable(timers.sync);
        }
        self.run_state = AppRunState::Syncing;

        let result = self
            .sync
            .sync(
                &self.config,
                &self.registry,
                &mut self.store,
                &mut self.clock,
                &mut self.delay,
            )
            .await;

        if self.clock.is_synced() {
            if let Some(timers) = self.timers {
                scheduler.enable(timers.read_sensors);
                scheduler.enable(timers.sync);
            }
            self.run_state = AppRunState::Idle;
        } else {
            scheduler.schedule_once(self.config.schedule.unsynced_retry_secs, ProbeTask::Sync);
            self.run_state = AppRunState::AwaitingTime;
        }

        if let Ok(report) = &result {
            scheduler.on_sync_response(&report.body);
        }
        result
    }

    /// Entry point for the scheduler.
    pub async fn run_task<S>(&mut self, task: ProbeTask, scheduler: &mut S) -> Result<(), ProbeError>
    where
        S: Scheduler<Handle = H>,
    {
        match task {
            ProbeTask::ReadSensors => {
                self.read_sensors().await;
                Ok(())
            }
            ProbeTask::Sync => self
                .sync_with_server(scheduler)
                .await
                .map(|_| ())
                .map_err(ProbeError::from),
        }
    }

    /// Dump configuration and buffer state at info level.
    pub fn log_debug_info(&self) {
        info!("Probe id:       {}", self.config.probe_id);
        info!(
            "Server:         {}:{}",
            self.config.server.address, self.config.server.port
        );
        info!("State:          {:?}", self.run_state);
        info!(
            "Syncs:          {} (last {:?})",
            self.sync.sync_count(),
            self.sync.state()
        );
        info!("Time base:      {:?}", self.clock.base());
        info!(
            "Sensors:        {}/{}",
            self.registry.len(),
            self.registry.capacity()
        );
        for sensor in self.registry.iter() {
            info!(
                "  {} kind {} on {} ({:?})",
                sensor.id,
                sensor.kind.code(),
                sensor.channel.pin(),
                sensor.channel
            );
        }
        info!(
            "Readings:       {}/{} per sensor (write index {}, wrapped: {})",
            self.store.len(),
            self.store.capacity(),
            self.store.write_index(),
            self.store.has_wrapped()
        );
    }

    pub fn config(&self) -> &ProbeConfig<'a> {
        &self.config
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    pub fn clock(&self) -> &ClockState<K> {
        &self.clock
    }

    pub fn sync_client(&self) -> &SyncClient<T> {
        &self.sync
    }

    pub fn sync_client_mut(&mut self) -> &mut SyncClient<T> {
        &mut self.sync
    }

    pub fn bus_mut(&mut self) -> &mut SingleWireBus<B> {
        &mut self.bus
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    pub fn run_state(&self) -> AppRunState {
        self.run_state
    }

    pub fn timers(&self) -> Option<Timers<H>> {
        self.timers
    }
}

pub type SharedProbe<'a, P, B, T, K, D, H> =
    AsyncMutex<CriticalSectionRawMutex, Probe<'a, P, B, T, K, D, H>>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    #[error("sensor registration failed: {0}")]
    Registration(RegistrationError),
    #[error("sync failed: {0}")]
    Sync(SyncError),
}

impl From<RegistrationError> for ProbeError {
    fn from(e: RegistrationError) -> Self {
        Self::Registration(e)
    }
}

impl From<SyncError> for ProbeError {
    fn from(e: SyncError) -> Self {
        Self::Sync(e)
    }
}

impl OperatorCode for ProbeError {
    fn code(&self) -> u16 {
        match self {
            Self::Registration(e) => e.code(),
            Self::Sync(e) => e.code(),
        }
    }
}
