//! Control-server synchronization.
//!
//! One sync attempt uploads every buffered reading and learns the current time
//! from the server:
//!
//! 1. **Connecting**: up to `max_attempts` connects with a fixed backoff.
//! 2. The request is streamed piece by piece; the body length is measured by a
//!    first rendering pass, so nothing is buffered.
//! 3. **AwaitingResponse**: the server gets `response_latency_ms` to answer.
//! 4. **ParsingHeaders**: the status line must contain `200 OK`.
//! 5. **ParsingBody**: `curr_time` is extracted from the flat JSON body.
//! 6. **Applying**: the clock is re-anchored and the store cleared.
//!
//! Only connect failures are retried. Anything that fails later ends the
//! attempt and leaves the buffered readings untouched for the next one.

mod request;
mod response;

pub use response::{SUCCESS_TOKEN, ServerSchedule, extract_value};

use core::future::Future;

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use heapless::String;
use log::{info, warn};
use thiserror_no_std::Error;

use crate::clock::{Clock, ClockState};
use crate::config::{ProbeConfig, ServerConfig, SyncConfig};
use crate::errors::{self, OperatorCode};
use crate::sensors::SensorRegistry;
use crate::storage::ReadingStore;
use request::SyncRequest;
use response::ResponseReader;

/// Largest response body kept.
pub const BODY_CAPACITY: usize = 256;

/// Byte stream to the control server.
///
/// Read timeouts are the implementation's responsibility; a read that gives
/// up should return an error or end the stream.
pub trait Connection: Read + Write {
    fn connect(&mut self, host: &str, port: u16) -> impl Future<Output = Result<(), Self::Error>>;

    /// Drop the current session, if any. Must be safe to call when not connected.
    fn close(&mut self);
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("control server unreachable after {attempts} attempts")]
    ServerUnreachable { attempts: u8 },
    #[error("control server did not answer 200 OK")]
    BadStatus,
    #[error("malformed control server response")]
    MalformedResponse,
    #[error("transport failure during sync")]
    Transport,
    #[error("sync request could not be encoded")]
    RequestEncoding,
}

impl OperatorCode for SyncError {
    fn code(&self) -> u16 {
        match self {
            Self::ServerUnreachable { .. } => 300,
            Self::BadStatus => 301,
            Self::MalformedResponse => 302,
            Self::Transport => 303,
            Self::RequestEncoding => 304,
        }
    }
}

/// Where the last sync attempt is, or how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Connecting,
    AwaitingResponse,
    ParsingHeaders,
    ParsingBody,
    Applying,
    Done,
    Failed(SyncError),
}

/// Result of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Server time the clock was re-anchored to
    pub curr_time: u32,
    /// Connect attempts it took
    pub attempts: u8,
    pub readings_sent: usize,
    /// Raw response body, for schedule fields the core does not interpret
    pub body: String<BODY_CAPACITY>,
}

pub struct SyncClient<T> {
    connection: T,
    sync_count: u32,
    state: SyncState,
}

impl<T: Connection> SyncClient<T> {
    pub const fn new(connection: T) -> Self {
        Self {
            connection,
            sync_count: 0,
            state: SyncState::Idle,
        }
    }

    /// Successful syncs so far.
    pub fn sync_count(&self) -> u32 {
        self.sync_count
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn connection(&mut self) -> &mut T {
        &mut self.connection
    }

    /// Run one sync attempt. The connection is closed afterwards either way.
    ///
    /// On success the clock is anchored at the server's `curr_time`, the store
    /// is cleared and the sync counter incremented. On failure the error is
    /// reported and nothing else changes.
    pub async fn sync<const N: usize, const S: usize, const C: usize, K, D>(
        &mut self,
        config: &ProbeConfig<'_>,
        registry: &SensorRegistry<N>,
        store: &mut ReadingStore<S, C>,
        clock: &mut ClockState<K>,
        delay: &mut D,
    ) -> Result<SyncReport, SyncError>
    where
        K: Clock,
        D: DelayNs,
    {
        let result = self.attempt(config, registry, store, clock, delay).await;
        self.connection.close();

        match &result {
            Ok(report) => {
                self.state = SyncState::Done;
                info!(
                    "Sync #{} done: {} readings sent, time is now {}",
                    self.sync_count, report.readings_sent, report.curr_time
                );
            }
            Err(e) => {
                self.state = SyncState::Failed(*e);
                errors::report(e);
            }
        }
        result
    }

    async fn attempt<const N: usize, const S: usize, const C: usize, K, D>(
        &mut self,
        config: &ProbeConfig<'_>,
        registry: &SensorRegistry<N>,
        store: &mut ReadingStore<S, C>,
        clock: &mut ClockState<K>,
        delay: &mut D,
    ) -> Result<SyncReport, SyncError>
    where
        K: Clock,
        D: DelayNs,
    {
        self.state = SyncState::Connecting;
        let attempts = self.connect(&config.server, &config.sync, delay).await?;

        let request = SyncRequest {
            probe_id: config.probe_id,
            token: config.server.token,
            sync_count: self.sync_count,
            attempts,
            base: clock.base().unwrap_or(0),
            curr_time: clock.now(),
            registry,
            store: &*store,
        };
        let readings_sent = request.reading_count();
        request
            .send(&mut self.connection, config.server.address)
            .await?;

        self.state = SyncState::AwaitingResponse;
        delay.delay_ms(config.sync.response_latency_ms).await;

        self.state = SyncState::ParsingHeaders;
        let mut reader = ResponseReader::new(&mut self.connection);
        reader.read_head().await?;

        self.state = SyncState::ParsingBody;
        let body = reader.read_body().await?;
        let curr_time = extract_value(&body, "curr_time")
            .parse::<u32>()
            .map_err(|_| SyncError::MalformedResponse)?;

        self.state = SyncState::Applying;
        clock.resync(curr_time);
        store.clear();
        self.sync_count = self.sync_count.wrapping_add(1);

        Ok(SyncReport {
            curr_time,
            attempts,
            readings_sent,
            body,
        })
    }

    /// Connect with retries. Returns the number of attempts it took.
    async fn connect<D: DelayNs>(
        &mut self,
        server: &ServerConfig<'_>,
        policy: &SyncConfig,
        delay: &mut D,
    ) -> Result<u8, SyncError> {
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            self.connection.close();
            match self.connection.connect(server.address, server.port).await {
                Ok(()) => {
                    info!(
                        "Connected to {}:{} (attempt {})",
                        server.address, server.port, attempt
                    );
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(
                        "Connect attempt {}/{} to {}:{} failed: {:?}",
                        attempt, max_attempts, server.address, server.port, e
                    );
                    if attempt < max_attempts {
                        delay.delay_ms(policy.retry_backoff_ms).await;
                    }
                }
            }
        }

        Err(SyncError::ServerUnreachable {
            attempts: max_attempts,
        })
    }
}
