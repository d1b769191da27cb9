//! Error types of the monitor.
//!
//! Missing configuration is never an error: loaders return `Option`/`bool` and fall back to
//! defaults. These types only describe failed writes and malformed input.

use core::fmt;

/// Errors from the persistent key-value store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Storage could not be opened or written
    Unavailable,
    /// No room left for another entry
    Full,
    /// Derived key does not fit the key length limit
    KeyTooLong,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable => write!(f, "storage unavailable"),
            StoreError::Full => write!(f, "storage full"),
            StoreError::KeyTooLong => write!(f, "storage key too long"),
        }
    }
}

/// Errors from calibration maintenance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    /// A table needs at least one usable point
    EmptyTable,
    /// More distinct points than a table can hold
    TooManyPoints,
    Store(StoreError),
}

impl From<StoreError> for CalibrationError {
    fn from(error: StoreError) -> Self {
        CalibrationError::Store(error)
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::EmptyTable => write!(f, "calibration table has no usable points"),
            CalibrationError::TooManyPoints => write!(f, "calibration table has too many points"),
            CalibrationError::Store(error) => write!(f, "calibration not saved: {}", error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    NotReady,
    SendFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotReady => write!(f, "transport not ready"),
            TransportError::SendFailed => write!(f, "send failed"),
        }
    }
}

/// Errors from decoding a received telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    Length { expected: usize, actual: usize },
    UnknownState(i32),
    InvalidText,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Length { expected, actual } => {
                write!(f, "frame is {} bytes, expected {}", actual, expected)
            }
            FrameError::UnknownState(state) => write!(f, "unknown battery state {}", state),
            FrameError::InvalidText => write!(f, "run-flat text is not valid UTF-8"),
        }
    }
}
