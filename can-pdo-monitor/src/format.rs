//! PDO layout definitions
//!
//! A [`Format`] lists the [`FrameFormat`] of every PDO the converter decodes.
//! The order in which frame formats are added is the order frames are
//! expected on the bus: one pass over the list is one PDO cycle, decoded as a
//! single logical unit.
//!
//! A [`FieldSpec`] places one signal inside a frame payload. Offsets and
//! lengths are in bits, little-endian (Intel) numbering: bit 0 is the least
//! significant bit of byte 0.

use crate::codec::{decode_7q8, decode_single, FIXED_7Q8_LEN, SINGLE_LEN};
use crate::types::{MonitorError, Result, SignalValue, MAX_FRAME_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default PDO cycle rate in Hz
pub const DEFAULT_RATE: f64 = 1000.0;

const MAX_FRAME_BITS: u32 = (MAX_FRAME_LEN * 8) as u32;

/// Numeric encoding of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Unsigned integer, any width from 1 to 64 bits
    RawUnsigned,
    /// Two's complement integer, any width from 1 to 64 bits
    RawSigned,
    /// 7Q8 fixed point, 16 bits, byte aligned
    #[serde(rename = "fixed_7q8", alias = "7q8")]
    Fixed7Q8,
    /// IEEE-754 single, 32 bits, byte aligned
    Single,
}

/// Placement of one signal inside a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Start bit within the payload
    pub offset: u16,
    /// Length in bits
    pub length: u16,
    pub encoding: Encoding,
    /// Signal name given to decoded datapoints
    pub name: String,
}

impl FieldSpec {
    /// Field positioned in bits
    pub fn bits(offset: u16, length: u16, encoding: Encoding, name: impl Into<String>) -> Self {
        Self {
            offset,
            length,
            encoding,
            name: name.into(),
        }
    }

    /// Field positioned in whole bytes
    pub fn bytes(offset: u16, length: u16, encoding: Encoding, name: impl Into<String>) -> Self {
        Self::bits(offset.saturating_mul(8), length.saturating_mul(8), encoding, name)
    }

    /// First bit past the field
    pub fn end_bit(&self) -> u32 {
        self.offset as u32 + self.length as u32
    }

    /// Payload bytes needed to hold the field
    pub fn required_len(&self) -> usize {
        (self.end_bit() as usize).div_ceil(8)
    }

    fn overlaps(&self, other: &FieldSpec) -> bool {
        (self.offset as u32) < other.end_bit() && (other.offset as u32) < self.end_bit()
    }

    /// Check the field fits an 8 byte payload and suits its encoding
    pub fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(MonitorError::InvalidField(format!(
                "'{}' has zero length",
                self.name
            )));
        }
        if self.end_bit() > MAX_FRAME_BITS {
            return Err(MonitorError::InvalidField(format!(
                "'{}' spans bits {}..{}, past the {} byte payload",
                self.name,
                self.offset,
                self.end_bit(),
                MAX_FRAME_LEN
            )));
        }

        let required_bits = match self.encoding {
            Encoding::Fixed7Q8 => Some(FIXED_7Q8_LEN * 8),
            Encoding::Single => Some(SINGLE_LEN * 8),
            Encoding::RawUnsigned | Encoding::RawSigned => None,
        };
        if let Some(bits) = required_bits {
            if self.length as usize != bits || self.offset % 8 != 0 {
                return Err(MonitorError::InvalidField(format!(
                    "'{}' with {:?} encoding must be {} byte aligned bits",
                    self.name, self.encoding, bits
                )));
            }
        }
        Ok(())
    }

    /// Decode this field from a frame payload
    pub fn decode(&self, data: &[u8]) -> Result<SignalValue> {
        self.validate()?;
        if self.required_len() > data.len() {
            return Err(MonitorError::InvalidFrame(format!(
                "'{}' needs {} bytes, frame has {}",
                self.name,
                self.required_len(),
                data.len()
            )));
        }

        let start = self.offset as usize / 8;
        let value = match self.encoding {
            Encoding::Fixed7Q8 => {
                SignalValue::Float(decode_7q8(&data[start..start + FIXED_7Q8_LEN])?)
            }
            Encoding::Single => {
                SignalValue::Float(decode_single(&data[start..start + SINGLE_LEN])? as f64)
            }
            Encoding::RawUnsigned => {
                let raw = extract_little_endian(data, self.offset as usize, self.length as usize);
                SignalValue::Unsigned(raw)
            }
            Encoding::RawSigned => {
                let raw = extract_little_endian(data, self.offset as usize, self.length as usize);
                SignalValue::Integer(sign_extend(raw, self.length as usize))
            }
        };
        Ok(value)
    }
}

/// Extract `length` bits starting at `start_bit`, LSB first
fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;

    for i in 0..length {
        let bit_pos = start_bit + i;
        let byte_idx = bit_pos / 8;
        let bit_in_byte = bit_pos % 8;

        if byte_idx < data.len() {
            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << i;
        }
    }

    result
}

/// Sign-extend a value from N bits to 64 bits
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        let mask = !0u64 << bit_length;
        (value | mask) as i64
    } else {
        value as i64
    }
}

/// Layout of all fields in one PDO frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFormat {
    /// CAN identifier of the PDO
    pub id: u32,
    fields: Vec<FieldSpec>,
}

impl FrameFormat {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            fields: Vec::new(),
        }
    }

    /// Two singles (bytes 0-3, 4-7)
    pub fn singles(id: u32, names: [&str; 2]) -> Result<Self> {
        let mut format = Self::new(id);
        for (i, name) in names.iter().enumerate() {
            format.add(FieldSpec::bytes(i as u16 * 4, 4, Encoding::Single, *name))?;
        }
        Ok(format)
    }

    /// Four 7Q8 values (bytes 0-1, 2-3, 4-5, 6-7)
    pub fn fixed_7q8(id: u32, names: [&str; 4]) -> Result<Self> {
        let mut format = Self::new(id);
        for (i, name) in names.iter().enumerate() {
            format.add(FieldSpec::bytes(i as u16 * 2, 2, Encoding::Fixed7Q8, *name))?;
        }
        Ok(format)
    }

    /// Append a field; rejects spans past 8 bytes and overlaps with existing fields
    pub fn add(&mut self, field: FieldSpec) -> Result<()> {
        field.validate()?;
        if let Some(other) = self.fields.iter().find(|f| f.overlaps(&field)) {
            return Err(MonitorError::InvalidField(format!(
                "'{}' overlaps '{}' in frame 0x{:X}",
                field.name, other.name, self.id
            )));
        }
        self.fields.push(field);
        Ok(())
    }

    /// Append a field that intentionally aliases bits of existing fields
    pub fn add_alias(&mut self, field: FieldSpec) -> Result<()> {
        field.validate()?;
        self.fields.push(field);
        Ok(())
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Payload bytes a frame must carry to decode every field
    pub fn required_len(&self) -> usize {
        self.fields.iter().map(FieldSpec::required_len).max().unwrap_or(0)
    }

    /// Decode every field, in declaration order
    ///
    /// Fails as a whole if any field cannot be decoded.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<(&str, SignalValue)>> {
        self.fields
            .iter()
            .map(|field| Ok((field.name.as_str(), field.decode(data)?)))
            .collect()
    }
}

/// Statistics about a format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatStats {
    pub num_frames: usize,
    pub num_fields: usize,
}

/// Ordered set of PDO frame formats
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    /// PDO cycle rate in Hz
    pub rate: f64,
    frames: Vec<FrameFormat>,
    /// Key: CAN ID, Value: position in `frames`
    lookup: HashMap<u32, usize>,
}

impl Format {
    pub fn new() -> Self {
        Self::with_rate(DEFAULT_RATE)
    }

    pub fn with_rate(rate: f64) -> Self {
        Self {
            rate,
            frames: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// The default 4 PDO layout: 0x181 carries two singles, 0x281, 0x381 and
    /// 0x481 carry four 7Q8 values each. Signals are named `"{id}_{n}"`.
    pub fn default_pdos() -> Self {
        let mut format = Self::new();
        for (i, id) in [0x181u32, 0x281, 0x381, 0x481].into_iter().enumerate() {
            let names: Vec<String> = (0..4).map(|n| format!("{}_{}", id, n)).collect();
            let frame = if i == 0 {
                FrameFormat::singles(id, [names[0].as_str(), names[1].as_str()])
            } else {
                FrameFormat::fixed_7q8(id, [
                    names[0].as_str(),
                    names[1].as_str(),
                    names[2].as_str(),
                    names[3].as_str(),
                ])
            };
            // Fixed, known-valid layouts
            if let Ok(frame) = frame {
                format.frames.push(frame);
                format.lookup.insert(id, i);
            }
        }
        format
    }

    /// Append a frame format; its position is its place in the PDO cycle
    pub fn add(&mut self, frame: FrameFormat) -> Result<()> {
        if self.lookup.contains_key(&frame.id) {
            return Err(MonitorError::InvalidFormat(format!(
                "frame 0x{:X} registered twice",
                frame.id
            )));
        }
        if frame.fields.is_empty() {
            return Err(MonitorError::InvalidFormat(format!(
                "frame 0x{:X} has no fields",
                frame.id
            )));
        }

        log::debug!(
            "Registered PDO 0x{:X} with {} fields at cycle position {}",
            frame.id,
            frame.fields.len(),
            self.frames.len()
        );
        self.lookup.insert(frame.id, self.frames.len());
        self.frames.push(frame);
        Ok(())
    }

    /// Frame format and cycle position for an identifier
    pub fn lookup(&self, id: u32) -> Option<(usize, &FrameFormat)> {
        self.lookup.get(&id).map(|&pos| (pos, &self.frames[pos]))
    }

    /// Frame formats in cycle order
    pub fn frames(&self) -> &[FrameFormat] {
        &self.frames
    }

    /// Identifiers in cycle order
    pub fn order(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn stats(&self) -> FormatStats {
        FormatStats {
            num_frames: self.frames.len(),
            num_fields: self.frames.iter().map(|f| f.fields.len()).sum(),
        }
    }

    /// Build a format from object dictionary parameters
    ///
    /// Recognised keys:
    /// - `CAN Sys PDO Tx Divider`: rate is `10000 / divider` Hz
    /// - `CAN Sys PDO{i} Tx TransType`: PDO `i` (1-4) is enabled when `255`
    /// - `CAN Sys Use7q8Format PDO{i}`: `0` selects two singles, otherwise four 7Q8
    /// - `CAN Sys PDO{i} Tx Ptr{j}`: signal names
    ///
    /// PDO `i` uses identifier `i * 0x100 + 0x81`.
    pub fn from_object_dictionary(params: &HashMap<String, String>) -> Result<Self> {
        let mut format = Self::new();

        if let Some(divider) = params.get("CAN Sys PDO Tx Divider") {
            let divider: f64 = divider.parse().map_err(|_| {
                MonitorError::InvalidFormat(format!("invalid PDO Tx divider '{}'", divider))
            })?;
            if divider <= 0.0 {
                return Err(MonitorError::InvalidFormat(format!(
                    "PDO Tx divider must be positive, got {}",
                    divider
                )));
            }
            format.rate = 10000.0 / divider;
        }

        for i in 1..=4u32 {
            let enabled = params
                .get(&format!("CAN Sys PDO{} Tx TransType", i))
                .is_some_and(|t| t == "255");
            if !enabled {
                continue;
            }

            let id = i * 0x100 + 0x81;
            let use_7q8 = params
                .get(&format!("CAN Sys Use7q8Format PDO{}", i))
                .map_or(true, |v| v != "0");
            let n_values = if use_7q8 { 4 } else { 2 };

            let names: Vec<String> = (1..=n_values)
                .map(|j| {
                    params
                        .get(&format!("CAN Sys PDO{} Tx Ptr{}", i, j))
                        .cloned()
                        .unwrap_or_else(|| format!("{}_{}", id, j - 1))
                })
                .collect();

            let frame = if use_7q8 {
                FrameFormat::fixed_7q8(id, [
                    names[0].as_str(),
                    names[1].as_str(),
                    names[2].as_str(),
                    names[3].as_str(),
                ])?
            } else {
                FrameFormat::singles(id, [names[0].as_str(), names[1].as_str()])?
            };
            format.add(frame)?;
        }

        log::info!(
            "Object dictionary format: {} PDOs at {} Hz",
            format.frames.len(),
            format.rate
        );
        Ok(format)
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `key = value` lines into a parameter map
///
/// Whitespace around keys and values is trimmed; lines without `=` are
/// ignored.
pub fn parse_params(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}
