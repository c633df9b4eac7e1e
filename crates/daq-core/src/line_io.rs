//! Line-oriented I/O over async byte streams.
//!
//! Both meters speak short ASCII lines terminated by `\n` (usually `\r\n`).
//! This module holds the stream type aliases the drivers store and the
//! timeout-bounded read helpers they share. Nothing here depends on
//! `tokio-serial`, so a `tokio::io::DuplexStream` works as a stand-in port in
//! tests.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`BufferedPort`]: A buffered `DynSerial` plus any partial line, the form
//!   drivers own
//! - [`LineMode`]: How a line is assembled from the stream
//!
//! # Utilities
//!
//! - [`read_line`]: Read one line in the selected [`LineMode`]
//! - [`read_byte`]: Read exactly one byte
//! - [`write_bytes`]: Write and flush a command
//! - [`clear_input`]: Discard buffered and pending input
//! - [`drain_serial_buffer`]: Drain stale data from a stream
//!
//! # Partial lines
//!
//! [`read_line`] assembles into a caller-owned buffer. Bytes that arrived
//! before a timeout (or before the read future was dropped) stay there and
//! start the next line, so a record split across a timeout is not lost.

use crate::error::ReadError;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// A serial port with buffered reading, as owned by a driver.
///
/// `BufReader` passes writes straight through to the inner stream, so the
/// same value serves for commands and responses.
pub struct BufferedPort {
    reader: BufReader<DynSerial>,
    partial: Vec<u8>,
}

impl BufferedPort {
    /// Wrap a type-erased port for line-oriented use.
    pub fn new(port: DynSerial) -> Self {
        Self {
            reader: BufReader::new(port),
            partial: Vec::new(),
        }
    }

    /// Read one line; see [`read_line`].
    pub async fn read_line(&mut self, mode: LineMode, timeout: Duration) -> Result<String, ReadError> {
        read_line(&mut self.reader, &mut self.partial, mode, timeout).await
    }

    /// Read exactly one byte; see [`read_byte`].
    pub async fn read_byte(&mut self, timeout: Duration) -> Result<u8, ReadError> {
        read_byte(&mut self.reader, timeout).await
    }

    /// Write and flush a command.
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ReadError> {
        write_bytes(&mut self.reader, bytes).await
    }

    /// Discard any partial line, buffered input and input arriving within
    /// `window`. Returns the number of bytes discarded.
    pub async fn clear_input(&mut self, window: Duration) -> usize {
        let partial = self.partial.len();
        self.partial.clear();
        partial + clear_input(&mut self.reader, window).await
    }
}

// =============================================================================
// Line Assembly
// =============================================================================

/// Strategy for assembling one line from the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineMode {
    /// Read up to `\n` in one bounded operation. A timeout yields
    /// [`ReadError::NoData`].
    #[default]
    Line,
    /// Accumulate single bytes until `\n`. Each byte read is bounded by the
    /// timeout, but timeouts are retried indefinitely; only a hard transport
    /// error or end-of-stream ends the read early.
    Bytewise,
}

impl std::fmt::Display for LineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line => write!(f, "line"),
            Self::Bytewise => write!(f, "bytewise"),
        }
    }
}

fn closed_stream() -> ReadError {
    ReadError::Transport(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "serial stream closed",
    ))
}

fn is_retryable(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Decode raw line bytes, dropping invalid UTF-8 and the line terminator.
fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .replace('\u{FFFD}', "")
}

/// Read one line from `port`, continuing any partial line in `partial`.
///
/// On success `partial` is left empty and the returned text has its trailing
/// `\r`/`\n` removed but is otherwise untouched; callers decide how much
/// whitespace matters to their protocol. On a timeout the bytes received so
/// far remain in `partial`.
pub async fn read_line<R>(
    port: &mut R,
    partial: &mut Vec<u8>,
    mode: LineMode,
    timeout: Duration,
) -> Result<String, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    match mode {
        LineMode::Line => {
            // read_until appends to `partial` as it goes, so a cancelled read
            // loses nothing.
            match tokio::time::timeout(timeout, port.read_until(b'\n', partial)).await {
                Err(_) => {
                    return Err(ReadError::NoData(format!("no line within {:?}", timeout)));
                }
                Ok(Err(e)) => return Err(ReadError::Transport(e)),
                Ok(Ok(0)) => return Err(closed_stream()),
                Ok(Ok(_)) => {}
            }
            if partial.last() != Some(&b'\n') {
                // End of stream in the middle of a line.
                return Err(closed_stream());
            }
        }
        LineMode::Bytewise => {
            let mut byte = [0u8; 1];
            loop {
                match tokio::time::timeout(timeout, port.read(&mut byte)).await {
                    Err(_) => {
                        tracing::trace!("bytewise read idle for {:?}, retrying", timeout);
                        continue;
                    }
                    Ok(Ok(0)) => return Err(closed_stream()),
                    Ok(Ok(_)) => {
                        partial.push(byte[0]);
                        if byte[0] == b'\n' {
                            break;
                        }
                    }
                    Ok(Err(e)) if is_retryable(e.kind()) => continue,
                    Ok(Err(e)) => return Err(ReadError::Transport(e)),
                }
            }
        }
    }
    let line = decode_line(partial);
    partial.clear();
    Ok(line)
}

/// Read exactly one byte, bounded by `timeout`.
pub async fn read_byte<R>(port: &mut R, timeout: Duration) -> Result<u8, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    match tokio::time::timeout(timeout, port.read_exact(&mut byte)).await {
        Err(_) => Err(ReadError::NoData(format!("no byte within {:?}", timeout))),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(closed_stream()),
        Ok(Err(e)) => Err(ReadError::Transport(e)),
        Ok(Ok(_)) => Ok(byte[0]),
    }
}

/// Write `bytes` and flush.
pub async fn write_bytes<W>(port: &mut W, bytes: &[u8]) -> Result<(), ReadError>
where
    W: AsyncWrite + Unpin,
{
    port.write_all(bytes).await.map_err(ReadError::Transport)?;
    port.flush().await.map_err(ReadError::Transport)
}

// =============================================================================
// Input Clearing
// =============================================================================

/// Discard everything already buffered in `port` plus anything arriving
/// within `window`. Returns the number of bytes discarded.
pub async fn clear_input<R>(port: &mut BufReader<R>, window: Duration) -> usize
where
    R: AsyncRead + Unpin,
{
    let buffered = port.buffer().len();
    if buffered > 0 {
        tracing::debug!("clearing {} bytes from BufReader buffer", buffered);
        port.consume(buffered);
    }
    let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
    buffered + drain_serial_buffer(port.get_mut(), window_ms).await
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards data until nothing arrives before the deadline.
///
/// # Returns
///
/// Total number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF or no more data
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                // No data available, done
                break;
            }
            Ok(Err(_)) => break, // Real I/O error, abort drain
            Err(_) => break,     // Timeout, no more immediate data
        }
    }

    total_discarded
}
