//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use can_pdo_monitor::{
    parse_params, Calibrate, Condition, ConverterConfig, CountCondition, DataLog, DeviceConfig,
    Edge, FieldSpec, Format, FrameFormat, LogMode, RecordFormat, TimeCondition, VirtualConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub datalogs: Vec<DataLogConfig>,
    #[serde(default)]
    pub calibrations: Vec<Calibrate>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceSection {
    #[serde(default, rename = "virtual")]
    pub virtual_bus: VirtualConfig,
    #[serde(default)]
    pub queue: DeviceConfig,
}

/// PDO layout: an object dictionary file, explicit frames, or the default 4 PDOs
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FormatConfig {
    pub odr: Option<PathBuf>,
    pub rate: Option<f64>,
    #[serde(default)]
    pub frames: Vec<FrameConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameConfig {
    pub id: u32,
    pub fields: Vec<FieldSpec>,
    /// Fields allowed to overlap the ones above
    #[serde(default)]
    pub aliases: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataLogConfig {
    pub path: PathBuf,
    #[serde(default = "default_mode")]
    pub mode: LogMode,
    #[serde(default)]
    pub record_format: RecordFormat,
    pub start: Option<ConditionConfig>,
    pub end: Option<ConditionConfig>,
}

fn default_mode() -> LogMode {
    LogMode::Once
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionConfig {
    Count {
        target: u64,
        signal: Option<String>,
    },
    Time {
        seconds: f64,
        #[serde(default)]
        start_at_zero: bool,
    },
    Trigger {
        signal: String,
        edge: Edge,
        threshold: f64,
    },
}

impl ConditionConfig {
    pub fn build(&self) -> Result<Condition> {
        let condition: Condition = match self {
            ConditionConfig::Count { target, signal } => match signal {
                Some(signal) => CountCondition::for_signal(*target, signal.clone()).into(),
                None => Condition::count(*target),
            },
            ConditionConfig::Time {
                seconds,
                start_at_zero,
            } => {
                let duration = Duration::try_from_secs_f64(*seconds)
                    .with_context(|| format!("Invalid time condition: {} s", seconds))?;
                if *start_at_zero {
                    TimeCondition::from_zero(duration).into()
                } else {
                    Condition::time(duration)
                }
            }
            ConditionConfig::Trigger {
                signal,
                edge,
                threshold,
            } => Condition::trigger(signal.clone(), *edge, *threshold),
        };
        Ok(condition)
    }
}

impl DataLogConfig {
    /// Create the log file and attach the configured conditions
    pub fn build(&self) -> Result<DataLog> {
        let mut datalog = DataLog::create(&self.path, self.mode)
            .with_context(|| format!("Failed to create data log: {:?}", self.path))?
            .with_record_format(self.record_format);
        if let Some(start) = &self.start {
            datalog = datalog.with_start_condition(start.build()?);
        }
        if let Some(end) = &self.end {
            datalog = datalog.with_end_condition(end.build()?);
        }
        Ok(datalog)
    }
}

impl FormatConfig {
    /// Resolve the layout; `odr_override` takes precedence over the config file
    pub fn build(&self, odr_override: Option<&Path>) -> Result<Format> {
        let mut format = if let Some(path) = odr_override.or(self.odr.as_deref()) {
            load_object_dictionary(path)?
        } else if self.frames.is_empty() {
            Format::default_pdos()
        } else {
            let mut format = Format::new();
            for frame in &self.frames {
                format.add(frame.build()?)?;
            }
            format
        };

        if let Some(rate) = self.rate {
            if rate <= 0.0 {
                bail!("PDO rate must be positive, got {}", rate);
            }
            format.rate = rate;
        }
        Ok(format)
    }
}

impl FrameConfig {
    fn build(&self) -> Result<FrameFormat> {
        let mut frame = FrameFormat::new(self.id);
        for field in &self.fields {
            frame
                .add(field.clone())
                .with_context(|| format!("Invalid field '{}' in frame 0x{:X}", field.name, self.id))?;
        }
        for field in &self.aliases {
            frame
                .add_alias(field.clone())
                .with_context(|| format!("Invalid alias '{}' in frame 0x{:X}", field.name, self.id))?;
        }
        Ok(frame)
    }
}

/// Build a format from an object dictionary parameter file
pub fn load_object_dictionary(path: &Path) -> Result<Format> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read object dictionary: {:?}", path))?;
    let params = parse_params(&content);
    log::debug!("Read {} object dictionary parameters", params.len());

    let format = Format::from_object_dictionary(&params)
        .with_context(|| format!("Invalid object dictionary: {:?}", path))?;
    if format.is_empty() {
        bail!("Object dictionary {:?} enables no PDOs", path);
    }
    Ok(format)
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_pdo_monitor::{ConditionState, Encoding, OverflowPolicy};

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [device.virtual]
            ids = [0x181, 0x281]
            frame_rate = 2000

            [device.queue]
            queue_capacity = 100
            overflow_policy = "drop_oldest"

            [converter]
            warmup_frames = 4

            [[format.frames]]
            id = 0x181
            fields = [
                { offset = 0, length = 16, encoding = "fixed_7q8", name = "speed" },
                { offset = 16, length = 16, encoding = "raw_signed", name = "torque" },
            ]

            [[datalogs]]
            path = "speed.csv"
            mode = { count = 50 }
            start = { type = "trigger", signal = "speed", edge = "rising", threshold = 10.0 }

            [[datalogs]]
            path = "all.jsonl"
            mode = "continuous"
            record_format = "json_lines"

            [[calibrations]]
            name = "torque"
            gain = 0.5
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.device.virtual_bus.ids, vec![0x181, 0x281]);
        assert_eq!(config.device.queue.queue_capacity, 100);
        assert_eq!(config.device.queue.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.converter.warmup_frames, 4);
        assert_eq!(config.format.frames[0].fields[0].encoding, Encoding::Fixed7Q8);
        assert_eq!(config.datalogs[0].mode, LogMode::Count(50));
        assert_eq!(config.datalogs[1].mode, LogMode::Continuous);
        assert_eq!(config.datalogs[1].record_format, RecordFormat::JsonLines);
        assert_eq!(config.calibrations[0].gain, 0.5);
        assert_eq!(config.calibrations[0].offset, 0.0);

        let format = config.format.build(None).unwrap();
        assert_eq!(format.stats().num_fields, 2);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.datalogs.is_empty());
        let format = config.format.build(None).unwrap();
        assert_eq!(format.order(), vec![0x181, 0x281, 0x381, 0x481]);
    }

    #[test]
    fn test_condition_build() {
        let condition = ConditionConfig::Time {
            seconds: 0.5,
            start_at_zero: true,
        }
        .build()
        .unwrap();
        assert_eq!(condition.state(), ConditionState::Idle);

        let negative = ConditionConfig::Time {
            seconds: -1.0,
            start_at_zero: false,
        };
        assert!(negative.build().is_err());
    }

    #[test]
    fn test_object_dictionary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.odr");
        fs::write(
            &path,
            "CAN Sys PDO Tx Divider = 20\n\
             CAN Sys PDO1 Tx TransType = 255\n\
             CAN Sys Use7q8Format PDO1 = 0\n\
             CAN Sys PDO1 Tx Ptr1 = wave\n",
        )
        .unwrap();

        let format = FormatConfig::default().build(Some(path.as_path())).unwrap();
        assert_eq!(format.rate, 500.0);
        assert_eq!(format.order(), vec![0x181]);
        assert_eq!(format.frames()[0].fields()[0].name, "wave");
    }

    #[test]
    fn test_datalog_build_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataLogConfig {
            path: dir.path().join("log.csv"),
            mode: LogMode::Count(1),
            record_format: RecordFormat::Csv,
            start: Some(ConditionConfig::Count {
                target: 2,
                signal: None,
            }),
            end: None,
        };

        let datalog = config.build().unwrap();
        assert_eq!(datalog.records_written(), 0);
        assert!(config.path.exists());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
