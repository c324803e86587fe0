//! Numeric codecs for PDO payloads
//!
//! Two encodings are carried on the bus, both least-significant byte first:
//! - 7Q8 fixed point: sign, 7 integer bits and 8 fractional bits in 2 bytes
//! - IEEE-754 single precision in 4 bytes

use crate::types::{MonitorError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Bytes occupied by a 7Q8 value
pub const FIXED_7Q8_LEN: usize = 2;

/// Bytes occupied by a single precision value
pub const SINGLE_LEN: usize = 4;

/// Smallest representable 7Q8 value
pub const FIXED_7Q8_MIN: f64 = -128.0;

/// Largest representable 7Q8 value (32767 / 256)
pub const FIXED_7Q8_MAX: f64 = 127.996_093_75;

const FIXED_7Q8_SCALE: f64 = 256.0;

fn check_len(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(MonitorError::ByteLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// Decode a 2 byte little-endian 7Q8 value
pub fn decode_7q8(bytes: &[u8]) -> Result<f64> {
    check_len(bytes, FIXED_7Q8_LEN)?;
    Ok(LittleEndian::read_i16(bytes) as f64 / FIXED_7Q8_SCALE)
}

/// Encode a number as 2 byte little-endian 7Q8
///
/// The value is rounded to the nearest 1/256. Values outside
/// `[-128, 127.99609375]` and NaN fail with [`MonitorError::Range`].
pub fn encode_7q8(value: f64) -> Result<[u8; FIXED_7Q8_LEN]> {
    if !(FIXED_7Q8_MIN..=FIXED_7Q8_MAX).contains(&value) {
        return Err(MonitorError::Range(value));
    }

    let raw = (value * FIXED_7Q8_SCALE).round() as i16;
    let mut bytes = [0u8; FIXED_7Q8_LEN];
    LittleEndian::write_i16(&mut bytes, raw);
    Ok(bytes)
}

/// Decode a 4 byte little-endian IEEE-754 single
pub fn decode_single(bytes: &[u8]) -> Result<f32> {
    check_len(bytes, SINGLE_LEN)?;
    Ok(f32::from_bits(LittleEndian::read_u32(bytes)))
}

/// Encode an IEEE-754 single as 4 little-endian bytes
///
/// The bit pattern is copied verbatim, so NaN payloads survive.
pub fn encode_single(value: f32) -> [u8; SINGLE_LEN] {
    let mut bytes = [0u8; SINGLE_LEN];
    LittleEndian::write_u32(&mut bytes, value.to_bits());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_7q8_known_values() {
        assert_eq!(decode_7q8(&[0x00, 0x01]).unwrap(), 1.0);
        assert_eq!(decode_7q8(&[0x80, 0x00]).unwrap(), 0.5);
        assert_eq!(decode_7q8(&[0x00, 0x80]).unwrap(), -128.0);
        assert_eq!(decode_7q8(&[0xFF, 0x7F]).unwrap(), FIXED_7Q8_MAX);
        assert_eq!(decode_7q8(&[0xFF, 0xFF]).unwrap(), -1.0 / 256.0);
    }

    #[test]
    fn test_7q8_round_trip_within_lsb() {
        let mut x = FIXED_7Q8_MIN;
        while x <= FIXED_7Q8_MAX {
            let decoded = decode_7q8(&encode_7q8(x).unwrap()).unwrap();
            assert!(
                (decoded - x).abs() <= 1.0 / 256.0,
                "{} decoded as {}",
                x,
                decoded
            );
            x += 0.0137;
        }
        assert_eq!(decode_7q8(&encode_7q8(FIXED_7Q8_MAX).unwrap()).unwrap(), FIXED_7Q8_MAX);
    }

    #[test]
    fn test_encode_7q8_out_of_range() {
        assert!(matches!(encode_7q8(128.0), Err(MonitorError::Range(_))));
        assert!(matches!(encode_7q8(-128.01), Err(MonitorError::Range(_))));
        assert!(matches!(encode_7q8(f64::NAN), Err(MonitorError::Range(_))));
    }

    #[test]
    fn test_wrong_length_is_format_error() {
        assert!(matches!(
            decode_7q8(&[0x01]),
            Err(MonitorError::ByteLength { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            decode_single(&[0, 0, 0]),
            Err(MonitorError::ByteLength { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_single_is_little_endian() {
        assert_eq!(encode_single(1.0), [0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(decode_single(&[0x00, 0x00, 0x80, 0x3F]).unwrap(), 1.0);
    }

    #[test]
    fn test_single_special_values_bit_exact() {
        let quiet_nan_payload = f32::from_bits(0x7FC0_1234);
        for value in [
            f32::INFINITY,
            f32::NEG_INFINITY,
            f32::NAN,
            quiet_nan_payload,
            -0.0,
            f32::MIN_POSITIVE,
            f32::MAX,
        ] {
            let decoded = decode_single(&encode_single(value)).unwrap();
            assert_eq!(decoded.to_bits(), value.to_bits());
        }
    }
}
