//! PDO conversion
//!
//! Turns the frame stream of a [`Device`] into batches of [`Datapoint`]s.
//!
//! A PDO cycle may span several frames. The [`Format`]'s identifier order is
//! the fragment order: a cycle starts with the first registered identifier and
//! completes with the last. [`PdoAssembler`] enforces that order as a pure
//! state machine; [`PdoConverter`] runs it on a decode thread and fans the
//! completed batches out to calibration filters, data logs and subscribers.

use crate::config::ConverterConfig;
use crate::datalog::DataLog;
use crate::device::{Device, DeviceState};
use crate::filter::Calibrate;
use crate::format::Format;
use crate::types::{Datapoint, Frame, MonitorError, Result};
use crate::worker::{lock, ErrorReporter, Worker};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblyState {
    /// Waiting for the initial fragment of a cycle
    Waiting,
    /// Initial fragment seen; `next` is the cycle position expected next
    Assembling { next: usize },
}

/// Multi-frame ordering and decoding, independent of any thread or device
pub struct PdoAssembler {
    format: Format,
    state: AssemblyState,
    pending: Vec<Datapoint>,
    warmup_remaining: usize,
    cycles: u64,
}

impl PdoAssembler {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            state: AssemblyState::Waiting,
            pending: Vec::new(),
            warmup_remaining: 0,
            cycles: 0,
        }
    }

    /// Builder method: discard the first `frames` registered frames
    pub fn with_warmup(mut self, frames: usize) -> Self {
        self.warmup_remaining = frames;
        self
    }

    /// Feed one frame
    ///
    /// Returns the completed batch when `frame` is the last fragment of a
    /// cycle. Unregistered identifiers are skipped, as are non-initial
    /// fragments while waiting for a cycle to begin. An out-of-order or short
    /// fragment discards the partial cycle and returns an error.
    pub fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Datapoint>>> {
        let Some((position, _)) = self.format.lookup(frame.id()) else {
            log::trace!("Skipping unregistered frame 0x{:X}", frame.id());
            return Ok(None);
        };

        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            log::trace!("Discarding warm-up frame 0x{:X}", frame.id());
            return Ok(None);
        }

        match self.state {
            AssemblyState::Waiting if position != 0 => {
                log::trace!("Skipping 0x{:X} while waiting for cycle start", frame.id());
                Ok(None)
            }
            AssemblyState::Assembling { next } if position != next => {
                let expected = self.format.frames()[next].id;
                self.discard();
                let error = MonitorError::FrameOrder {
                    id: frame.id(),
                    expected,
                };
                if position == 0 {
                    log::debug!("Cycle restarted by 0x{:X}", frame.id());
                    self.accept(frame, position)?;
                }
                Err(error)
            }
            _ => self.accept(frame, position),
        }
    }

    /// Drop any partially assembled cycle
    pub fn reset(&mut self) {
        self.discard();
    }

    /// Completed cycles so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    fn accept(&mut self, frame: &Frame, position: usize) -> Result<Option<Vec<Datapoint>>> {
        let index = self.cycles;
        let time = if self.format.rate > 0.0 {
            index as f64 / self.format.rate
        } else {
            0.0
        };

        let decoded: Result<Vec<Datapoint>> = {
            let layout = &self.format.frames()[position];
            if frame.dlc() < layout.required_len() {
                Err(MonitorError::InvalidFrame(format!(
                    "0x{:X} carries {} bytes, layout needs {}",
                    frame.id(),
                    frame.dlc(),
                    layout.required_len()
                )))
            } else {
                layout.decode(frame.data()).map(|values| {
                    values
                        .into_iter()
                        .map(|(name, value)| Datapoint {
                            name: name.to_string(),
                            value,
                            timestamp: frame.timestamp(),
                            index,
                            time,
                        })
                        .collect()
                })
            }
        };

        let points = match decoded {
            Ok(points) => points,
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };
        self.pending.extend(points);

        if position + 1 == self.format.frames().len() {
            self.state = AssemblyState::Waiting;
            self.cycles += 1;
            Ok(Some(std::mem::take(&mut self.pending)))
        } else {
            self.state = AssemblyState::Assembling { next: position + 1 };
            Ok(None)
        }
    }

    fn discard(&mut self) {
        self.pending.clear();
        self.state = AssemblyState::Waiting;
    }
}

/// Everything the decode thread owns while running
struct DecodeLoop {
    device: Arc<dyn Device>,
    assembler: PdoAssembler,
    calibrations: Vec<Calibrate>,
    datalogs: Vec<DataLog>,
    subscribers: Arc<Mutex<Vec<Sender<Vec<Datapoint>>>>>,
    errors: ErrorReporter,
    logs_finished: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl DecodeLoop {
    fn run(mut self, running: &AtomicBool) -> Vec<DataLog> {
        log::debug!(
            "Decode loop started for {} PDOs",
            self.assembler.format().frames().len()
        );

        while running.load(Ordering::SeqCst) {
            let frame = match self.device.get_frame(self.poll_interval) {
                Ok(frame) => frame,
                Err(MonitorError::Timeout(_)) => continue,
                Err(e) => {
                    self.errors.report(e);
                    continue;
                }
            };

            match self.assembler.process(&frame) {
                Ok(Some(batch)) => self.dispatch(batch),
                Ok(None) => {}
                Err(e) => self.errors.report(e),
            }
        }

        // In-flight partial cycles are not emitted
        self.assembler.reset();
        log::debug!(
            "Decode loop stopped after {} cycles",
            self.assembler.cycles()
        );
        self.datalogs
    }

    fn dispatch(&mut self, mut batch: Vec<Datapoint>) {
        for calibration in &self.calibrations {
            calibration.process(&mut batch);
        }

        for datalog in self.datalogs.iter_mut() {
            for datapoint in &batch {
                if let Err(e) = datalog.put(datapoint) {
                    self.errors.report(e);
                }
            }
        }
        self.logs_finished.store(
            self.datalogs.iter().all(DataLog::is_finished),
            Ordering::SeqCst,
        );

        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(batch.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("Subscriber full, batch dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Decode activity bound to one device and one format
pub struct PdoConverter {
    device: Arc<dyn Device>,
    format: Format,
    config: ConverterConfig,
    calibrations: Vec<Calibrate>,
    datalogs: Mutex<Vec<DataLog>>,
    subscribers: Arc<Mutex<Vec<Sender<Vec<Datapoint>>>>>,
    errors: ErrorReporter,
    logs_finished: Arc<AtomicBool>,
    worker: Mutex<Option<Worker<Vec<DataLog>>>>,
}

impl PdoConverter {
    pub fn new(device: Arc<dyn Device>, format: Format, config: ConverterConfig) -> Self {
        let errors = ErrorReporter::new("converter", config.error_capacity);
        Self {
            device,
            format,
            config,
            calibrations: Vec::new(),
            datalogs: Mutex::new(Vec::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            errors,
            logs_finished: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        }
    }

    /// Register a data log; takes effect at the next start
    pub fn add_datalog(&mut self, datalog: DataLog) {
        lock(&self.datalogs).push(datalog);
    }

    /// Register a calibration; applied in registration order from the next start
    pub fn add_calibration(&mut self, calibration: Calibrate) {
        self.calibrations.push(calibration);
    }

    /// Receive every completed batch. Batches are dropped while the
    /// receiver is full.
    pub fn subscribe(&self) -> Receiver<Vec<Datapoint>> {
        let (tx, rx) = bounded(self.config.subscriber_capacity.max(1));
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Start the decode thread. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut slot = lock(&self.worker);
        if let Some(worker) = slot.as_ref() {
            if worker.stop_requested() {
                return Err(MonitorError::StopPending("converter".to_string()));
            }
            log::debug!("Converter already running");
            return Ok(());
        }

        if self.format.is_empty() {
            return Err(MonitorError::InvalidFormat(
                "no PDO frames registered".to_string(),
            ));
        }

        let mut datalogs = std::mem::take(&mut *lock(&self.datalogs));
        self.check_signal_references(&datalogs);
        if let Err(e) = datalogs.iter_mut().try_for_each(DataLog::start) {
            *lock(&self.datalogs) = datalogs;
            return Err(e);
        }
        self.logs_finished.store(
            datalogs.iter().all(DataLog::is_finished),
            Ordering::SeqCst,
        );

        log::info!(
            "Starting converter: {} PDOs, {} data logs, {} calibrations",
            self.format.frames().len(),
            datalogs.len(),
            self.calibrations.len()
        );

        let decode = DecodeLoop {
            device: Arc::clone(&self.device),
            assembler: PdoAssembler::new(self.format.clone())
                .with_warmup(self.config.warmup_frames),
            calibrations: self.calibrations.clone(),
            datalogs,
            subscribers: Arc::clone(&self.subscribers),
            errors: self.errors.clone(),
            logs_finished: Arc::clone(&self.logs_finished),
            poll_interval: self.config.poll_interval(),
        };

        let worker = Worker::spawn("pdo-converter", move |running: &AtomicBool| decode.run(running))?;
        *slot = Some(worker);
        Ok(())
    }

    /// Report conditions watching signals no batch will ever carry
    fn check_signal_references(&self, datalogs: &[DataLog]) {
        let known: HashSet<&str> = self
            .format
            .frames()
            .iter()
            .flat_map(|frame| frame.fields().iter().map(|field| field.name.as_str()))
            .chain(self.calibrations.iter().filter_map(|c| c.new_name.as_deref()))
            .collect();

        for datalog in datalogs {
            for signal in datalog.condition_signals() {
                if !known.contains(signal) {
                    self.errors.report(MonitorError::InvalidField(format!(
                        "data log '{}' watches unknown signal '{}'",
                        datalog.name(),
                        signal
                    )));
                }
            }
        }
    }

    /// Stop the decode thread, then stop every data log
    ///
    /// Data logs are kept for [`PdoConverter::take_datalogs`]. No-op if
    /// already stopped.
    pub fn stop(&self) -> Result<()> {
        let mut slot = lock(&self.worker);
        let Some(worker) = slot.as_mut() else {
            return Ok(());
        };

        log::info!("Stopping converter");
        let mut datalogs = worker.stop(self.config.stop_grace())?;
        *slot = None;

        let mut first_error = None;
        for datalog in datalogs.iter_mut() {
            if let Err(e) = datalog.stop() {
                log::error!("Failed to close data log '{}': {}", datalog.name(), e);
                first_error.get_or_insert(e);
            }
        }
        self.logs_finished.store(true, Ordering::SeqCst);
        lock(&self.datalogs).extend(datalogs);

        first_error.map_or(Ok(()), Err)
    }

    /// Take the data logs held while the converter is stopped
    pub fn take_datalogs(&self) -> Vec<DataLog> {
        std::mem::take(&mut *lock(&self.datalogs))
    }

    /// Shared flag, true once every data log has finished
    pub fn all_logs_finished(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.logs_finished)
    }

    pub fn drain_errors(&self) -> Vec<MonitorError> {
        self.errors.drain()
    }

    pub fn state(&self) -> DeviceState {
        match lock(&self.worker).as_ref() {
            None => DeviceState::Idle,
            Some(worker) if worker.stop_requested() => DeviceState::StopRequested,
            Some(_) => DeviceState::Running,
        }
    }

    pub fn format(&self) -> &Format {
        &self.format
    }
}
