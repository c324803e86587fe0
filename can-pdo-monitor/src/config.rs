//! Runtime configuration types
//!
//! Values consumed by the devices and the converter. How they are loaded
//! (TOML, CLI flags) is up to the application; every struct deserializes with
//! sensible defaults and offers builder methods.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default frame queue capacity: one second of 4 PDOs at 1 kHz
pub const DEFAULT_QUEUE_SIZE: usize = 4000;

/// What to discard when a frame arrives at a full queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the incoming frame, keep what is queued
    #[default]
    DropNewest,
    /// Evict the oldest queued frame to make room for the incoming one
    DropOldest,
}

/// Configuration shared by every device variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Frame queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Overflow policy of the frame queue
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Grace period for the acquisition thread to exit on stop (default: 1000ms)
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,

    /// Capacity of the asynchronous error channel
    #[serde(default = "default_error_capacity")]
    pub error_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            stop_grace_ms: default_stop_grace(),
            error_capacity: default_error_capacity(),
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the frame queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Builder method: set the overflow policy
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Builder method: set the stop grace period
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Configuration of the virtual (simulated) bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualConfig {
    /// Identifiers emitted in cycle order
    #[serde(default = "default_virtual_ids")]
    pub ids: Vec<u32>,

    /// Frames per second across all identifiers (default: 4000)
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Pause between bursts of frames (default: 10ms)
    #[serde(default = "default_burst_interval")]
    pub burst_interval_ms: u64,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            ids: default_virtual_ids(),
            frame_rate: default_frame_rate(),
            burst_interval_ms: default_burst_interval(),
        }
    }
}

impl VirtualConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the identifiers to cycle through
    pub fn with_ids(mut self, ids: Vec<u32>) -> Self {
        self.ids = ids;
        self
    }

    /// Builder method: set the total frame rate
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Builder method: set the burst interval
    pub fn with_burst_interval(mut self, interval: Duration) -> Self {
        self.burst_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn burst_interval(&self) -> Duration {
        Duration::from_millis(self.burst_interval_ms.max(1))
    }
}

/// Configuration of the PDO converter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Timeout of each `get_frame` call in the decode loop (default: 50ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Grace period for the decode thread to exit on stop (default: 1000ms)
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,

    /// Registered frames discarded after start, for drivers that do not
    /// flush their receive buffer reliably
    #[serde(default)]
    pub warmup_frames: usize,

    /// Capacity of each datapoint subscriber channel
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Capacity of the asynchronous error channel
    #[serde(default = "default_error_capacity")]
    pub error_capacity: usize,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            stop_grace_ms: default_stop_grace(),
            warmup_frames: 0,
            subscriber_capacity: default_subscriber_capacity(),
            error_capacity: default_error_capacity(),
        }
    }
}

impl ConverterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the number of warm-up frames to discard
    pub fn with_warmup_frames(mut self, frames: usize) -> Self {
        self.warmup_frames = frames;
        self
    }

    /// Builder method: set the decode loop poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the stop grace period
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_stop_grace() -> u64 {
    1000
}

fn default_error_capacity() -> usize {
    256
}

fn default_virtual_ids() -> Vec<u32> {
    vec![0x181, 0x281, 0x381, 0x481]
}

fn default_frame_rate() -> u32 {
    4000
}

fn default_burst_interval() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    50
}

fn default_subscriber_capacity() -> usize {
    1024
}
