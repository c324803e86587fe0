//! Hardware-backed device
//!
//! The vendor driver is an external collaborator. It is reached only through
//! the [`HardwareBus`] capability: bus on/off, receive-buffer flush and a
//! timed read of one frame. [`HardwareDevice`] adds the acquisition thread and
//! the bounded queue on top.

use super::queue::{RateMeter, RATE_WINDOW};
use super::{enqueue, Device, DeviceCore, DeviceState, FrameQueue, QueueStats};
use crate::config::DeviceConfig;
use crate::types::{Frame, MonitorError, Result};
use crate::worker::{lock, ErrorReporter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Default timeout of a single driver read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Capability provided by a native CAN driver binding
pub trait HardwareBus: Send + 'static {
    /// Go bus-on and start receiving
    fn bus_on(&mut self) -> Result<()>;

    /// Go bus-off
    fn bus_off(&mut self) -> Result<()>;

    /// Discard anything in the driver's receive buffer
    fn flush_rx(&mut self) -> Result<()>;

    /// Wait up to `timeout` for one frame; `Ok(None)` when nothing arrived
    fn read(&mut self, timeout: Duration) -> Result<Option<Frame>>;
}

pub struct HardwareDevice<B: HardwareBus> {
    core: DeviceCore,
    bus: Arc<Mutex<B>>,
    read_timeout: Duration,
}

impl<B: HardwareBus> HardwareDevice<B> {
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, DeviceConfig::default())
    }

    pub fn with_config(bus: B, config: DeviceConfig) -> Self {
        Self {
            core: DeviceCore::new("hardware", config),
            bus: Arc::new(Mutex::new(bus)),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Builder method: set the timeout of each driver read
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn lock_bus(&self) -> MutexGuard<'_, B> {
        lock(&self.bus)
    }
}

impl<B: HardwareBus> Device for HardwareDevice<B> {
    fn start(&self) -> Result<()> {
        let bus = Arc::clone(&self.bus);
        let read_timeout = self.read_timeout;

        self.core.start_with(
            || {
                let mut bus = self.lock_bus();
                bus.flush_rx()?;
                bus.bus_on()
            },
            Box::new(move |running: &AtomicBool, queue: &FrameQueue, errors: &ErrorReporter| {
                read_loop(&bus, read_timeout, running, queue, errors)
            }),
        )
    }

    fn stop(&self) -> Result<()> {
        self.core.stop_with(|| {
            let mut bus = self.lock_bus();
            bus.bus_off()?;
            bus.flush_rx()
        })
    }

    fn get_frame(&self, timeout: Duration) -> Result<Frame> {
        self.core.queue().pop(timeout)
    }

    fn clear_queue(&self) {
        self.core.queue().clear();
    }

    fn state(&self) -> DeviceState {
        self.core.state()
    }

    fn stats(&self) -> QueueStats {
        self.core.queue().stats()
    }

    fn drain_errors(&self) -> Vec<MonitorError> {
        self.core.errors().drain()
    }
}

fn read_loop<B: HardwareBus>(
    bus: &Mutex<B>,
    read_timeout: Duration,
    running: &AtomicBool,
    queue: &FrameQueue,
    errors: &ErrorReporter,
) {
    let mut meter = RateMeter::new(RATE_WINDOW);
    while running.load(Ordering::SeqCst) {
        queue.update_rate(&mut meter);
        let result = lock(bus).read(read_timeout);
        match result {
            Ok(Some(frame)) => {
                log::trace!("Received frame 0x{:X} ({} bytes)", frame.id(), frame.dlc());
                enqueue(queue, errors, frame);
            }
            Ok(None) => {}
            Err(e) => {
                let e = match e {
                    MonitorError::Hardware(_) => e,
                    other => MonitorError::Hardware(other.to_string()),
                };
                errors.report(e);
                // Avoid spinning on a driver that fails immediately
                thread::sleep(read_timeout);
            }
        }
    }
}
