//! Core types for the PDO monitor library
//!
//! This module defines the values that flow through the pipeline: raw frames
//! as they come off the bus, decoded datapoints, and the error type shared by
//! every stage.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Maximum payload of a classic CAN frame in bytes
pub const MAX_FRAME_LEN: usize = 8;

/// Raw CAN frame as delivered by a device
///
/// Frames are immutable once built. The timestamp is monotonic time since the
/// producing device was started (or the driver's own monotonic clock for
/// hardware devices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    data: [u8; MAX_FRAME_LEN],
    dlc: u8,
    timestamp: Duration,
}

impl Frame {
    /// Build a frame from an identifier, payload and arrival timestamp
    ///
    /// Fails with [`MonitorError::InvalidFrame`] if the payload is longer than
    /// 8 bytes.
    pub fn new(id: u32, data: &[u8], timestamp: Duration) -> Result<Self> {
        if data.len() > MAX_FRAME_LEN {
            return Err(MonitorError::InvalidFrame(format!(
                "frame 0x{:X} carries {} bytes, maximum is {}",
                id,
                data.len(),
                MAX_FRAME_LEN
            )));
        }

        let mut payload = [0u8; MAX_FRAME_LEN];
        payload[..data.len()].copy_from_slice(data);

        Ok(Self {
            id,
            data: payload,
            dlc: data.len() as u8,
            timestamp,
        })
    }

    /// CAN identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Meaningful payload bytes (the first `dlc` bytes)
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Data length code - number of meaningful bytes
    pub fn dlc(&self) -> usize {
        self.dlc as usize
    }

    /// Arrival timestamp
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// Errors that can occur while acquiring, decoding or logging
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Frame queue overflow: dropped frame 0x{id:X} (capacity {capacity})")]
    FrameQueueOverflow { id: u32, capacity: usize },

    #[error("Frame order error: got 0x{id:X}, expected 0x{expected:X}")]
    FrameOrder { id: u32, expected: u32 },

    #[error("Thread did not close within grace period: {0}")]
    ThreadClose(String),

    #[error("Thread panicked: {0}")]
    ThreadPanicked(String),

    #[error("Stop still pending: {0}")]
    StopPending(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Value {0} outside 7Q8 range")]
    Range(f64),

    #[error("Format error: expected {expected} bytes, got {actual}")]
    ByteLength { expected: usize, actual: usize },

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MonitorError {
    /// True for errors reported by a running activity that does not stop it
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonitorError::FrameQueueOverflow { .. }
                | MonitorError::FrameOrder { .. }
                | MonitorError::InvalidFrame(_)
                | MonitorError::Hardware(_)
        )
    }
}

/// Decoded signal value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Raw signed integer value
    Integer(i64),
    /// Raw unsigned integer value
    Unsigned(u64),
    /// Floating-point value (7Q8 or single)
    Float(f64),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Unsigned(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl SignalValue {
    /// Convert signal value to f64 for condition evaluation
    pub fn as_f64(&self) -> f64 {
        match self {
            SignalValue::Integer(v) => *v as f64,
            SignalValue::Unsigned(v) => *v as f64,
            SignalValue::Float(v) => *v,
        }
    }

    /// Convert signal value to i64 (floats are truncated, unsigned saturates)
    pub fn as_i64(&self) -> i64 {
        match self {
            SignalValue::Integer(v) => *v,
            SignalValue::Unsigned(v) => i64::try_from(*v).unwrap_or(i64::MAX),
            SignalValue::Float(v) => *v as i64,
        }
    }
}

/// One decoded signal sample
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    /// Signal name from the field layout
    pub name: String,
    /// Decoded value
    pub value: SignalValue,
    /// Timestamp of the frame the value came from
    pub timestamp: Duration,
    /// Index of the PDO cycle since the converter started
    pub index: u64,
    /// Sequence time in seconds (`index / rate`)
    pub time: f64,
}

impl Datapoint {
    pub fn new(name: impl Into<String>, value: SignalValue, timestamp: Duration) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            index: 0,
            time: 0.0,
        }
    }
}
