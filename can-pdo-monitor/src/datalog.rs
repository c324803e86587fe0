//! Condition-gated data recorder
//!
//! A [`DataLog`] receives every decoded datapoint through [`DataLog::put`] and
//! writes a flat, time-ordered record stream to its sink once its start
//! condition has triggered. When recording ends depends on the [`LogMode`].
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start--> Armed --start condition--> Active --finish--> Stopped
//!   \                                          ^
//!    +------- start (no start condition) ------+
//! ```
//!
//! `stop` moves any state to Stopped, flushing and closing the sink.
//! A stopped log is never restarted.

use crate::condition::Condition;
use crate::types::{Datapoint, Result, SignalValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// When a log stops recording once it is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    /// Record until the end condition first triggers, then stop for good.
    /// Without an end condition, record until stopped.
    Once,
    /// Record exactly this many datapoints; the end condition is ignored
    Count(usize),
    /// Record until stopped; the end condition is ignored
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
    Idle,
    /// Waiting for the start condition
    Armed,
    /// Writing records
    Active,
    /// Sink flushed and closed
    Stopped,
}

/// On-disk layout of the record stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// `timestamp,signal,value` header, one comma-separated line per datapoint
    #[default]
    Csv,
    /// One JSON object per line
    JsonLines,
}

#[derive(Serialize)]
struct Record<'a> {
    timestamp: f64,
    signal: &'a str,
    value: &'a SignalValue,
}

pub struct DataLog {
    name: String,
    mode: LogMode,
    format: RecordFormat,
    start_condition: Option<Condition>,
    end_condition: Option<Condition>,
    sink: Option<Box<dyn Write + Send>>,
    state: LogState,
    written: usize,
}

impl DataLog {
    /// Log writing to an arbitrary sink
    pub fn new(sink: Box<dyn Write + Send>, mode: LogMode) -> Self {
        Self {
            name: "datalog".to_string(),
            mode,
            format: RecordFormat::default(),
            start_condition: None,
            end_condition: None,
            sink: Some(sink),
            state: LogState::Idle,
            written: 0,
        }
    }

    /// Log writing to a newly created file, named after the path
    pub fn create(path: &Path, mode: LogMode) -> Result<Self> {
        log::debug!("Creating data log file: {:?}", path);
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file)), mode).with_name(path.display().to_string()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_start_condition(mut self, condition: Condition) -> Self {
        self.start_condition = Some(condition);
        self
    }

    /// Only consulted in [`LogMode::Once`]
    pub fn with_end_condition(mut self, condition: Condition) -> Self {
        self.end_condition = Some(condition);
        self
    }

    pub fn with_record_format(mut self, format: RecordFormat) -> Self {
        self.format = format;
        self
    }

    /// Arm the log. No-op unless idle.
    pub fn start(&mut self) -> Result<()> {
        if self.state != LogState::Idle {
            return Ok(());
        }

        if let Some(condition) = self.start_condition.as_mut() {
            condition.reset();
        }
        if let Some(condition) = self.end_condition.as_mut() {
            condition.reset();
        }

        if self.format == RecordFormat::Csv {
            self.write_line(b"timestamp,signal,value\n".to_vec())?;
        }

        self.state = if self.start_condition.is_some() {
            LogState::Armed
        } else {
            log::info!("Data log '{}' active", self.name);
            LogState::Active
        };
        Ok(())
    }

    /// Offer one datapoint to the log
    pub fn put(&mut self, datapoint: &Datapoint) -> Result<()> {
        match self.state {
            LogState::Idle | LogState::Stopped => Ok(()),
            LogState::Armed => {
                let fired = self
                    .start_condition
                    .as_mut()
                    .map_or(true, |c| c.check(datapoint));
                if !fired {
                    return Ok(());
                }
                log::info!(
                    "Data log '{}' triggered by '{}' at {:?}",
                    self.name,
                    datapoint.name,
                    datapoint.timestamp
                );
                self.state = LogState::Active;
                self.record(datapoint)
            }
            LogState::Active => self.record(datapoint),
        }
    }

    /// Flush and close the sink. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == LogState::Stopped {
            return Ok(());
        }
        self.finish()
    }

    pub fn state(&self) -> LogState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }

    pub fn records_written(&self) -> usize {
        self.written
    }

    pub fn is_finished(&self) -> bool {
        self.state == LogState::Stopped
    }

    /// Signals named by the start and end conditions
    pub fn condition_signals(&self) -> Vec<&str> {
        self.start_condition
            .iter()
            .chain(self.end_condition.iter())
            .filter_map(Condition::signal)
            .collect()
    }

    fn record(&mut self, datapoint: &Datapoint) -> Result<()> {
        if let LogMode::Count(n) = self.mode {
            if self.written >= n {
                return self.finish();
            }
        }

        self.write_record(datapoint)?;
        self.written += 1;

        let finished = match self.mode {
            LogMode::Once => self
                .end_condition
                .as_mut()
                .map_or(false, |c| c.check(datapoint)),
            LogMode::Count(n) => self.written >= n,
            LogMode::Continuous => false,
        };

        if finished {
            self.finish()?;
        }
        Ok(())
    }

    fn write_record(&mut self, datapoint: &Datapoint) -> Result<()> {
        let timestamp = datapoint.timestamp.as_secs_f64();
        let mut line = Vec::new();
        match self.format {
            RecordFormat::Csv => {
                writeln!(line, "{:.6},{},{}", timestamp, datapoint.name, datapoint.value)?;
            }
            RecordFormat::JsonLines => {
                let record = Record {
                    timestamp,
                    signal: &datapoint.name,
                    value: &datapoint.value,
                };
                serde_json::to_writer(&mut line, &record)?;
                line.push(b'\n');
            }
        }
        self.write_line(line)
    }

    /// Whole lines only: a failed write stops the log so nothing is appended
    /// to a torn record
    fn write_line(&mut self, line: Vec<u8>) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        if let Err(e) = sink.write_all(&line) {
            log::error!("Data log '{}' write failed, stopping: {}", self.name, e);
            self.state = LogState::Stopped;
            self.sink = None;
            return Err(e.into());
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.state = LogState::Stopped;
        log::info!(
            "Data log '{}' finished with {} records",
            self.name,
            self.written
        );
        match self.sink.take() {
            Some(mut sink) => Ok(sink.flush()?),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for DataLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLog")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("format", &self.format)
            .field("state", &self.state)
            .field("written", &self.written)
            .finish()
    }
}
