//! CAN PDO Monitor Library
//!
//! Acquires CAN frames from a bus device, decodes Process Data Object (PDO)
//! frames into named signal values, and records those values to condition
//! gated data logs.
//!
//! # Architecture
//!
//! ```text
//! Device --FrameQueue--> PdoConverter --Calibrate--> DataLogs
//!                                                 \-> subscribers
//! ```
//!
//! - A [`Device`] ([`VirtualDevice`] or [`HardwareDevice`]) acquires frames on
//!   its own thread into a bounded [`FrameQueue`]
//! - The [`PdoConverter`] reassembles multi-frame PDO cycles in the order given
//!   by the [`Format`] and decodes them with the [`codec`] functions
//! - Each [`DataLog`] starts and stops recording on [`Condition`]s
//! - [`Monitor`] wires the three together
//!
//! Streaming errors (queue overflow, out-of-order fragments, short frames,
//! driver failures) never stop acquisition; they are collected and can be
//! drained with [`Monitor::drain_errors`].
//!
//! # Example Usage
//!
//! ```no_run
//! use can_pdo_monitor::{Condition, DataLog, Edge, Format, LogMode, Monitor, VirtualDevice};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let device = Arc::new(VirtualDevice::new());
//! let mut monitor = Monitor::new(device, Format::default_pdos());
//!
//! // Record 500 datapoints once the wave crosses 50 upwards
//! let log = DataLog::create(Path::new("wave.csv"), LogMode::Count(500))
//!     .unwrap()
//!     .with_start_condition(Condition::trigger("385_0", Edge::Rising, 50.0));
//! monitor.add_datalog(log);
//!
//! monitor.start().unwrap();
//! if !monitor.wait_for_logs(Duration::from_secs(5)) {
//!     eprintln!("Logging did not finish in time");
//! }
//! monitor.stop().unwrap();
//!
//! for error in monitor.drain_errors() {
//!     eprintln!("Stream error: {}", error);
//! }
//! ```

// Public modules
pub mod codec;
pub mod condition;
pub mod config;
pub mod converter;
pub mod datalog;
pub mod device;
pub mod filter;
pub mod format;
pub mod monitor;
pub mod types;

// Internal modules (not exposed in public API)
mod worker;

// Re-export main types for convenience
pub use condition::{
    Condition, ConditionState, CountCondition, Edge, TimeCondition, TriggerCondition,
};
pub use config::{ConverterConfig, DeviceConfig, OverflowPolicy, VirtualConfig, DEFAULT_QUEUE_SIZE};
pub use converter::{PdoAssembler, PdoConverter};
pub use datalog::{DataLog, LogMode, LogState, RecordFormat};
pub use device::{
    Device, DeviceState, FrameQueue, HardwareBus, HardwareDevice, QueueStats, VirtualDevice,
};
pub use filter::Calibrate;
pub use format::{parse_params, Encoding, FieldSpec, Format, FormatStats, FrameFormat};
pub use monitor::Monitor;
pub use types::{Datapoint, Frame, MonitorError, Result, SignalValue};
pub use worker::ErrorReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
