//! Calibration filter applied to decoded batches

use crate::types::{Datapoint, SignalValue};
use serde::{Deserialize, Serialize};

/// Offset and gain applied to one named signal: `(value + offset) * gain`
///
/// With `new_name` set the datapoint is renamed, or, when `keep` is also set,
/// a calibrated copy is appended under the new name and the original stays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibrate {
    pub name: String,
    #[serde(default)]
    pub offset: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub keep: bool,
}

fn default_gain() -> f64 {
    1.0
}

impl Calibrate {
    pub fn new(name: impl Into<String>, offset: f64, gain: f64) -> Self {
        Self {
            name: name.into(),
            offset,
            gain,
            new_name: None,
            keep: false,
        }
    }

    /// Builder method: publish the result under another name
    pub fn with_new_name(mut self, new_name: impl Into<String>, keep: bool) -> Self {
        self.new_name = Some(new_name.into());
        self.keep = keep;
        self
    }

    /// Apply to the first datapoint named `self.name`, if any
    pub fn process(&self, batch: &mut Vec<Datapoint>) {
        let Some(position) = batch.iter().position(|d| d.name == self.name) else {
            return;
        };

        let value = SignalValue::Float((batch[position].value.as_f64() + self.offset) * self.gain);

        match (&self.new_name, self.keep) {
            (Some(new_name), true) => {
                let mut copy = batch[position].clone();
                copy.name = new_name.clone();
                copy.value = value;
                batch.push(copy);
            }
            (Some(new_name), false) => {
                batch[position].name = new_name.clone();
                batch[position].value = value;
            }
            (None, _) => batch[position].value = value,
        }
    }
}
