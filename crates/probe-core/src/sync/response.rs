use embedded_io_async::Read;
use heapless::{String, Vec};
use log::{debug, error, warn};

use super::{BODY_CAPACITY, SyncError};

/// Status line substring that marks a successful sync.
pub const SUCCESS_TOKEN: &str = "200 OK";

/// Longest response line kept; anything beyond is dropped.
const LINE_CAPACITY: usize = 128;

/// Value of `key` in a flat JSON-like object.
///
/// Takes the text after the first occurrence of `key` up to the next comma
/// (or the end), then trims quotes, colons, whitespace and the closing brace
/// from both ends. Returns `""` if `key` does not occur.
pub fn extract_value<'a>(json: &'a str, key: &str) -> &'a str {
    let Some(start) = json.find(key) else {
        return "";
    };
    let rest = &json[start + key.len()..];
    let end = rest.find(',').unwrap_or(rest.len());
    rest[..end].trim_matches(|c: char| c == '"' || c == ':' || c == '}' || c.is_whitespace())
}

const INTERVAL_KEY: &str = "\"interval\"";
const SENSOR_COMMANDS_KEY: &str = "\"sensor_commands\"";

/// Cadence the control server asks for in a sync response.
///
/// The top-level `interval` is the sync period. Each entry of
/// `sensor_commands` carries its own read `interval`; sensors are sampled
/// together, so the shortest one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerSchedule {
    pub sync_interval_secs: Option<u32>,
    pub read_interval_secs: Option<u32>,
}

impl ServerSchedule {
    pub fn parse(body: &str) -> Self {
        let (top, commands) = match body.find(SENSOR_COMMANDS_KEY) {
            Some(at) => body.split_at(at),
            None => (body, ""),
        };
        let sync_interval_secs = top
            .find(INTERVAL_KEY)
            .and_then(|at| leading_secs(&top[at + INTERVAL_KEY.len()..]));
        let read_interval_secs = commands
            .match_indices(INTERVAL_KEY)
            .filter_map(|(at, _)| leading_secs(&commands[at + INTERVAL_KEY.len()..]))
            .min();

        Self {
            sync_interval_secs,
            read_interval_secs,
        }
    }
}

/// Positive integer right after a `:` separator.
fn leading_secs(text: &str) -> Option<u32> {
    let value = text.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().ok().filter(|&secs| secs > 0)
}

/// Buffered reader over the response byte stream.
pub(crate) struct ResponseReader<'c, T> {
    connection: &'c mut T,
    buf: [u8; 64],
    start: usize,
    end: usize,
    eof: bool,
}

impl<'c, T: Read> ResponseReader<'c, T> {
    pub fn new(connection: &'c mut T) -> Self {
        Self {
            connection,
            buf: [0; 64],
            start: 0,
            end: 0,
            eof: false,
        }
    }

    async fn next_byte(&mut self) -> Result<Option<u8>, SyncError> {
        if self.start == self.end {
            if self.eof {
                return Ok(None);
            }
            let n = self.connection.read(&mut self.buf).await.map_err(|e| {
                error!("Sync transport error while receiving: {:?}", e);
                SyncError::Transport
            })?;
            if n == 0 {
                self.eof = true;
                return Ok(None);
            }
            self.start = 0;
            self.end = n;
        }
        let byte = self.buf[self.start];
        self.start += 1;
        Ok(Some(byte))
    }

    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// Bytes past `LINE_CAPACITY` are dropped; only the status line is inspected.
    async fn read_line(&mut self) -> Result<Option<String<LINE_CAPACITY>>, SyncError> {
        let mut line = Vec::<u8, LINE_CAPACITY>::new();
        let mut seen_any = false;
        let mut truncated = false;
        loop {
            match self.next_byte().await? {
                None if !seen_any => return Ok(None),
                None | Some(b'\n') => break,
                Some(b'\r') => seen_any = true,
                Some(byte) => {
                    seen_any = true;
                    truncated |= line.push(byte).is_err();
                }
            }
        }
        into_text(line, truncated).map(Some)
    }

    /// Check the status line, then skip headers up to the blank line.
    pub async fn read_head(&mut self) -> Result<(), SyncError> {
        let status = self
            .read_line()
            .await?
            .ok_or(SyncError::MalformedResponse)?;
        debug!("Sync response status: {}", status);
        if !status.contains(SUCCESS_TOKEN) {
            return Err(SyncError::BadStatus);
        }

        loop {
            match self.read_line().await? {
                Some(header) if header.is_empty() => return Ok(()),
                Some(header) => debug!("Sync response header: {}", header),
                None => return Err(SyncError::MalformedResponse),
            }
        }
    }

    /// Everything up to end of stream.
    ///
    /// Only the first `BODY_CAPACITY` bytes are kept; the rest is drained so
    /// the server sees the whole response consumed.
    pub async fn read_body(&mut self) -> Result<String<BODY_CAPACITY>, SyncError> {
        let mut body = Vec::<u8, BODY_CAPACITY>::new();
        let mut dropped = 0usize;
        while let Some(byte) = self.next_byte().await? {
            if body.push(byte).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(
                "Sync response body truncated to {} bytes ({} dropped)",
                BODY_CAPACITY, dropped
            );
        }
        into_text(body, dropped > 0)
    }
}

/// UTF-8 text of `bytes`. A multi-byte character cut off by truncation is
/// dropped; any other invalid sequence is malformed.
fn into_text<const N: usize>(mut bytes: Vec<u8, N>, truncated: bool) -> Result<String<N>, SyncError> {
    if truncated {
        if let Err(e) = core::str::from_utf8(&bytes) {
            if e.error_len().is_none() {
                bytes.truncate(e.valid_up_to());
            }
        }
    }
    String::from_utf8(bytes).map_err(|_| SyncError::MalformedResponse)
}
