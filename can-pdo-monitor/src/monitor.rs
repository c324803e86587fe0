//! Top-level wiring of one device, one converter and its data logs

use crate::config::ConverterConfig;
use crate::converter::PdoConverter;
use crate::datalog::DataLog;
use crate::device::Device;
use crate::filter::Calibrate;
use crate::format::Format;
use crate::types::{Datapoint, MonitorError, Result};
use crossbeam_channel::Receiver;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Interval at which [`Monitor::wait_for_logs`] polls the finished flag
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Device → converter → data logs
///
/// # Example
///
/// ```no_run
/// use can_pdo_monitor::{DataLog, Format, LogMode, Monitor, VirtualDevice};
/// use std::path::Path;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let mut monitor = Monitor::new(Arc::new(VirtualDevice::new()), Format::default_pdos());
/// monitor.add_datalog(DataLog::create(Path::new("run.csv"), LogMode::Count(1000)).unwrap());
///
/// monitor.start().unwrap();
/// monitor.wait_for_logs(Duration::from_secs(5));
/// monitor.stop().unwrap();
/// ```
pub struct Monitor {
    device: Arc<dyn Device>,
    converter: PdoConverter,
}

impl Monitor {
    pub fn new(device: Arc<dyn Device>, format: Format) -> Self {
        Self::with_config(device, format, ConverterConfig::default())
    }

    pub fn with_config(device: Arc<dyn Device>, format: Format, config: ConverterConfig) -> Self {
        let converter = PdoConverter::new(Arc::clone(&device), format, config);
        Self { device, converter }
    }

    pub fn add_datalog(&mut self, datalog: DataLog) {
        self.converter.add_datalog(datalog);
    }

    pub fn add_calibration(&mut self, calibration: Calibrate) {
        self.converter.add_calibration(calibration);
    }

    pub fn subscribe(&self) -> Receiver<Vec<Datapoint>> {
        self.converter.subscribe()
    }

    /// Start the device, then the converter
    pub fn start(&self) -> Result<()> {
        self.device.start()?;
        if let Err(e) = self.converter.start() {
            log::error!("Converter failed to start: {}", e);
            if let Err(stop_error) = self.device.stop() {
                log::error!("Device failed to stop: {}", stop_error);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop the converter, then the device
    ///
    /// Both are attempted; the first error is returned.
    pub fn stop(&self) -> Result<()> {
        let converter = self.converter.stop();
        let device = self.device.stop();
        converter.and(device)
    }

    /// Block until every data log has finished or `timeout` elapses
    pub fn wait_for_logs(&self, timeout: Duration) -> bool {
        let finished = self.converter.all_logs_finished();
        let deadline = Instant::now() + timeout;
        loop {
            if finished.load(Ordering::SeqCst) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Errors reported by the device and the converter since the last drain
    pub fn drain_errors(&self) -> Vec<MonitorError> {
        let mut errors = self.device.drain_errors();
        errors.extend(self.converter.drain_errors());
        errors
    }

    pub fn take_datalogs(&self) -> Vec<DataLog> {
        self.converter.take_datalogs()
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn converter(&self) -> &PdoConverter {
        &self.converter
    }
}
