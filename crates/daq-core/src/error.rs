//! Error types shared by the dose-rate meter drivers.
//!
//! Two layers, built with `thiserror`:
//!
//! - **[`ReadError`]**: the outcome of a single read on a device. It separates
//!   "nothing arrived" from "something arrived but made no sense" from "the
//!   transport broke", so the caller decides whether to retry, skip or reopen.
//! - **[`DaqError`]**: a configuration that parsed but cannot be used, or
//!   names a driver nobody registered.
//!
//! Factories and the command-line logger wrap both in `anyhow::Error` with
//! `.context(...)`; drivers return the typed errors.

use thiserror::Error;

// =============================================================================
// Read Errors
// =============================================================================

/// Failure of a single read from a dose-rate meter.
///
/// # Recovery
///
/// | Variant        | Transient? | Typical response                    |
/// |----------------|------------|-------------------------------------|
/// | `NoData`       | yes        | poll again on the next tick         |
/// | `Malformed`    | usually    | poll again, log the raw line        |
/// | `Transport`    | maybe      | reopen the port if it keeps failing |
/// | `NotConnected` | no         | rebuild the driver                  |
#[derive(Error, Debug)]
pub enum ReadError {
    /// Nothing usable arrived within the read timeout or attempt budget.
    #[error("no data: {0}")]
    NoData(String),

    /// A line arrived but could not be interpreted.
    #[error("malformed response {line:?}: {reason}")]
    Malformed {
        /// The raw line as received, with line terminators removed.
        line: String,
        /// Why the line was rejected.
        reason: String,
    },

    /// The underlying stream reported an error or reached end-of-file.
    #[error("transport failure: {0}")]
    Transport(#[source] std::io::Error),

    /// The driver holds no open port (open failed or `close()` was called).
    #[error("device not connected")]
    NotConnected,
}

impl ReadError {
    /// Build a [`ReadError::Malformed`] from a raw line and a reason.
    pub fn malformed(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Whether the next poll could plausibly succeed without intervention.
    ///
    /// Retry loops stop at the first non-transient error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NoData(_) | Self::Malformed { .. } => true,
            Self::Transport(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
            ),
            Self::NotConnected => false,
        }
    }

    /// Rank used to keep the most informative error across several attempts.
    pub(crate) fn severity(&self) -> u8 {
        match self {
            Self::NoData(_) => 0,
            Self::Malformed { .. } => 1,
            Self::Transport(_) => 2,
            Self::NotConnected => 3,
        }
    }

    /// Keep whichever of `current` and `next` carries more information.
    pub fn most_informative(current: Option<Self>, next: Self) -> Self {
        match current {
            Some(cur) if cur.severity() > next.severity() => cur,
            _ => next,
        }
    }
}

// =============================================================================
// Application Errors
// =============================================================================

/// Primary error type for configuration and device management.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration values parsed but failed semantic validation
    /// (e.g. a zero timeout or a negative conversion factor).
    ///
    /// **Error Type**: Permanent - requires fixing the configuration values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The configuration names a driver type no factory is registered for.
    ///
    /// **Recovery Strategy**: check the `type` field against the registered
    /// factories (`prm9000`, `radeye_g20`).
    #[error("Unknown driver type '{0}'")]
    UnknownDriver(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_display() {
        let err = ReadError::malformed("OKabc", "invalid digit found in string");
        assert_eq!(
            err.to_string(),
            "malformed response \"OKabc\": invalid digit found in string"
        );
        assert_eq!(ReadError::NotConnected.to_string(), "device not connected");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ReadError::NoData("timeout".into()).is_transient());
        assert!(ReadError::malformed("x", "y").is_transient());
        assert!(ReadError::Transport(std::io::ErrorKind::TimedOut.into()).is_transient());
        assert!(!ReadError::Transport(std::io::ErrorKind::UnexpectedEof.into()).is_transient());
        assert!(!ReadError::NotConnected.is_transient());
    }

    #[test]
    fn test_most_informative_prefers_higher_severity() {
        let kept = ReadError::most_informative(
            Some(ReadError::malformed("a,b,x,CPM", "bad")),
            ReadError::NoData("empty".into()),
        );
        assert!(matches!(kept, ReadError::Malformed { .. }));

        let replaced = ReadError::most_informative(
            Some(ReadError::NoData("empty".into())),
            ReadError::Transport(std::io::ErrorKind::BrokenPipe.into()),
        );
        assert!(matches!(replaced, ReadError::Transport(_)));

        let first = ReadError::most_informative(None, ReadError::NoData("empty".into()));
        assert!(matches!(first, ReadError::NoData(_)));
    }
}
