//! Bus devices
//!
//! A [`Device`] acquires frames on its own thread and places them in a
//! bounded [`FrameQueue`]; consumers pull them with [`Device::get_frame`].
//! Two backends implement the trait:
//! - [`VirtualDevice`]: synthesises periodic PDO frames for testing
//! - [`HardwareDevice`]: wraps an external [`HardwareBus`] driver
//!
//! Both share the lifecycle logic in `DeviceCore`.
//!
//! `start` is idempotent: starting a running device is a no-op.

use crate::config::DeviceConfig;
use crate::types::{Frame, MonitorError, Result};
use crate::worker::{lock, ErrorReporter, Worker};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub mod hardware;
pub mod queue;
pub mod virtual_bus;

pub use hardware::{HardwareBus, HardwareDevice};
pub use queue::{FrameQueue, QueueStats};
pub use virtual_bus::VirtualDevice;

/// Lifecycle of a device or converter activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Constructed or cleanly stopped
    Idle,
    /// Acquisition thread running
    Running,
    /// Stop requested but the thread has not confirmed termination
    StopRequested,
}

/// Capability shared by every bus backend
pub trait Device: Send + Sync {
    /// Begin producing frames. No-op if already running.
    fn start(&self) -> Result<()>;

    /// Halt production and wait for the acquisition thread to finish.
    ///
    /// Fails with [`MonitorError::ThreadClose`] if the thread does not exit
    /// within the configured grace period. No-op if already stopped.
    fn stop(&self) -> Result<()>;

    /// Block until a frame is available or `timeout` elapses
    fn get_frame(&self, timeout: Duration) -> Result<Frame>;

    /// Discard all queued frames
    fn clear_queue(&self);

    fn state(&self) -> DeviceState;

    fn stats(&self) -> QueueStats;

    /// Take errors reported by the acquisition thread (overflow, driver errors)
    fn drain_errors(&self) -> Vec<MonitorError>;
}

pub(crate) type AcquisitionBody = Box<dyn FnOnce(&AtomicBool, &FrameQueue, &ErrorReporter) + Send>;

/// Queue, error channel and worker slot common to all devices
pub(crate) struct DeviceCore {
    name: &'static str,
    config: DeviceConfig,
    queue: Arc<FrameQueue>,
    errors: ErrorReporter,
    worker: Mutex<Option<Worker<()>>>,
}

impl DeviceCore {
    pub(crate) fn new(name: &'static str, config: DeviceConfig) -> Self {
        let queue = Arc::new(FrameQueue::new(config.queue_capacity, config.overflow_policy));
        let errors = ErrorReporter::new(name, config.error_capacity);
        Self {
            name,
            config,
            queue,
            errors,
            worker: Mutex::new(None),
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker<()>>> {
        lock(&self.worker)
    }

    /// Clear the queue, run `prepare`, then spawn `body` as the acquisition thread
    pub(crate) fn start_with<P>(&self, prepare: P, body: AcquisitionBody) -> Result<()>
    where
        P: FnOnce() -> Result<()>,
    {
        let mut slot = self.lock_worker();
        if let Some(worker) = slot.as_ref() {
            if worker.stop_requested() {
                return Err(MonitorError::StopPending(self.name.to_string()));
            }
            log::debug!("{} already running", self.name);
            return Ok(());
        }

        log::info!("Starting {} device", self.name);
        self.queue.clear();
        prepare()?;

        let queue = Arc::clone(&self.queue);
        let errors = self.errors.clone();
        let worker = Worker::spawn(self.name, move |running: &AtomicBool| {
            body(running, queue.as_ref(), &errors)
        })?;
        *slot = Some(worker);
        Ok(())
    }

    /// Stop the acquisition thread, then run `finish`
    pub(crate) fn stop_with<F>(&self, finish: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut slot = self.lock_worker();
        let Some(worker) = slot.as_mut() else {
            return Ok(());
        };

        log::info!("Stopping {} device", self.name);
        worker.stop(self.config.stop_grace())?;
        *slot = None;
        finish()
    }

    pub(crate) fn state(&self) -> DeviceState {
        match self.lock_worker().as_ref() {
            None => DeviceState::Idle,
            Some(worker) if worker.stop_requested() => DeviceState::StopRequested,
            Some(_) => DeviceState::Running,
        }
    }

    pub(crate) fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    pub(crate) fn errors(&self) -> &ErrorReporter {
        &self.errors
    }
}

/// Push a frame and report, rather than propagate, an overflow
pub(crate) fn enqueue(queue: &FrameQueue, errors: &ErrorReporter, frame: Frame) {
    if let Err(e) = queue.push(frame) {
        errors.report(e);
    }
}
