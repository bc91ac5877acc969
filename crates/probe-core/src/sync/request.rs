use core::fmt::{self, Display, Write as _};

use embedded_io_async::Write;

use super::SyncError;
use crate::sampling::READ_FAILED;
use crate::sensors::{SensorKind, SensorRegistry};
use crate::storage::ReadingStore;

const USER_AGENT: &str = concat!("probe-core/", env!("CARGO_PKG_VERSION"));

/// One fragment of the outgoing request, rendered on the fly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Piece<'a> {
    Text(&'a str),
    Number(u32),
    /// A stored sensor value, rendered according to its kind
    Value(SensorKind, i32),
}

impl Display for Piece<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{}", n),
            // The server sums values, so a failed read goes out as zero
            Self::Value(kind, READ_FAILED) => Display::fmt(&Self::Value(kind, 0), f),
            Self::Value(SensorKind::BusTemperature, value) => {
                let sign = if value < 0 { "-" } else { "" };
                let magnitude = value.unsigned_abs();
                write!(f, "{}{}.{:02}", sign, magnitude / 100, magnitude % 100)
            }
            Self::Value(_, value) => write!(f, "{}", value),
        }
    }
}

/// `fmt::Write` sink that only counts bytes.
#[derive(Debug, Default)]
struct ByteCounter(usize);

impl fmt::Write for ByteCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

/// Everything one sync request carries, borrowed from the probe.
pub(crate) struct SyncRequest<'a, const N: usize, const S: usize, const C: usize> {
    pub probe_id: &'a str,
    pub token: &'a str,
    pub sync_count: u32,
    pub attempts: u8,
    /// Absolute time the stored deltas are relative to
    pub base: u32,
    pub curr_time: u32,
    pub registry: &'a SensorRegistry<N>,
    pub store: &'a ReadingStore<S, C>,
}

impl<'a, const N: usize, const S: usize, const C: usize> SyncRequest<'a, N, S, C> {
    /// The JSON body as a sequence of pieces.
    pub fn body(&self) -> impl Iterator<Item = Piece<'a>> + use<'a, N, S, C> {
        let base = self.base;
        let head = [
            Piece::Text("{\"probe_id\":\""),
            Piece::Text(self.probe_id),
            Piece::Text("\",\"token\":\""),
            Piece::Text(self.token),
            Piece::Text("\",\"sync_count\":"),
            Piece::Number(self.sync_count),
            Piece::Text(",\"connection_attempts\":"),
            Piece::Number(u32::from(self.attempts)),
            Piece::Text(",\"sensor_data\":["),
        ];
        let readings = self
            .store
            .snapshot(self.registry)
            .enumerate()
            .flat_map(move |(i, (sensor, reading))| {
                [
                    Piece::Text(if i == 0 { "{\"id\":\"" } else { ",{\"id\":\"" }),
                    Piece::Text(sensor.id.as_str()),
                    Piece::Text("\",\"timestamp\":"),
                    Piece::Number(base.saturating_add(reading.timestamp_delta)),
                    Piece::Text(",\"value\":"),
                    Piece::Value(sensor.kind, reading.value),
                    Piece::Text("}"),
                ]
            });
        let tail = [
            Piece::Text("],\"curr_time\":"),
            Piece::Number(self.curr_time),
            Piece::Text("}"),
        ];

        head.into_iter().chain(readings).chain(tail)
    }

    /// Exact byte length of [`body`](Self::body).
    pub fn content_length(&self) -> usize {
        let mut counter = ByteCounter::default();
        for piece in self.body() {
            // Counting cannot fail
            let _ = write!(counter, "{}", piece);
        }
        counter.0
    }

    pub fn reading_count(&self) -> usize {
        self.store.snapshot(self.registry).count()
    }

    /// Stream the request line, headers and body to `out`.
    pub async fn send<W: Write>(&self, out: &mut W, host: &str) -> Result<(), SyncError> {
        let content_length = u32::try_from(self.content_length())
            .map_err(|_| SyncError::RequestEncoding)?;
        let head = [
            Piece::Text("POST /probe_sync HTTP/1.1\r\nHost: "),
            Piece::Text(host),
            Piece::Text("\r\nUser-Agent: "),
            Piece::Text(USER_AGENT),
            Piece::Text("\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: "),
            Piece::Number(content_length),
            Piece::Text("\r\n\r\n"),
        ];

        for piece in head.into_iter().chain(self.body()) {
            write_piece(out, piece).await?;
        }
        out.flush().await.map_err(transport)
    }
}

async fn write_piece<W: Write>(out: &mut W, piece: Piece<'_>) -> Result<(), SyncError> {
    match piece {
        Piece::Text(text) => out.write_all(text.as_bytes()).await.map_err(transport),
        other => {
            let mut rendered = heapless::String::<24>::new();
            write!(rendered, "{}", other).map_err(|_| SyncError::RequestEncoding)?;
            out.write_all(rendered.as_bytes()).await.map_err(transport)
        }
    }
}

fn transport<E: core::fmt::Debug>(e: E) -> SyncError {
    log::error!("Sync transport error while sending: {:?}", e);
    SyncError::Transport
}
