use crate::constants::masks;
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut};

/// Largest value representable as a variable byte integer (268,435,455).
pub const VARIABLE_BYTE_INT_MAX: u32 = 268_435_455;

/// Encodes a value as an MQTT variable byte integer.
///
/// Base-128 little-endian with bit 7 as the continuation bit; values occupy
/// one to four bytes.
///
/// # Errors
///
/// Returns `ProtocolError` if the value exceeds [`VARIABLE_BYTE_INT_MAX`].
pub fn encode_variable_int<B: BufMut>(buf: &mut B, value: u32) -> Result<()> {
    if value > VARIABLE_BYTE_INT_MAX {
        return Err(MqttError::ProtocolError(format!(
            "variable byte integer {value} exceeds maximum {VARIABLE_BYTE_INT_MAX}"
        )));
    }

    let mut val = value;
    loop {
        let mut byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            byte |= masks::CONTINUATION_BIT;
        }
        buf.put_u8(byte);
        if val == 0 {
            break;
        }
    }

    Ok(())
}

/// Decodes a variable byte integer.
///
/// # Errors
///
/// Returns `MalformedPacket` if the buffer runs out, a fourth byte still has
/// the continuation bit set, or the value exceeds the maximum.
pub fn decode_variable_int<B: Buf>(buf: &mut B) -> Result<u32> {
    let mut value = 0u32;
    let mut multiplier = 1u32;
    let mut byte_count = 0u8;

    loop {
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "truncated variable byte integer".to_string(),
            ));
        }

        byte_count += 1;
        if byte_count > 4 {
            return Err(MqttError::MalformedPacket(
                "variable byte integer exceeds 4 bytes".to_string(),
            ));
        }

        let byte = buf.get_u8();
        value += u32::from(byte & masks::VARIABLE_BYTE_VALUE) * multiplier;

        if byte & masks::CONTINUATION_BIT == 0 {
            break;
        }
        multiplier *= 128;
    }

    if value > VARIABLE_BYTE_INT_MAX {
        return Err(MqttError::MalformedPacket(format!(
            "variable byte integer {value} exceeds maximum"
        )));
    }

    Ok(value)
}

/// Number of bytes `value` occupies on the wire.
#[must_use]
pub fn variable_int_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(value: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_variable_int(&mut buf, value).unwrap();
        let bytes = buf.to_vec();
        let decoded = decode_variable_int(&mut buf).unwrap();
        assert_eq!(decoded, value);
        bytes
    }

    #[test]
    fn spec_boundary_values() {
        assert_eq!(round_trip(0), vec![0x00]);
        assert_eq!(round_trip(127), vec![0x7F]);
        assert_eq!(round_trip(128), vec![0x80, 0x01]);
        assert_eq!(round_trip(16_383), vec![0xFF, 0x7F]);
        assert_eq!(round_trip(16_384), vec![0x80, 0x80, 0x01]);
        assert_eq!(round_trip(2_097_151), vec![0xFF, 0xFF, 0x7F]);
        assert_eq!(round_trip(2_097_152), vec![0x80, 0x80, 0x80, 0x01]);
        assert_eq!(
            round_trip(VARIABLE_BYTE_INT_MAX),
            vec![0xFF, 0xFF, 0xFF, 0x7F]
        );
    }

    #[test]
    fn spec_examples() {
        assert_eq!(round_trip(64), vec![0x40]);
        assert_eq!(round_trip(321), vec![0xC1, 0x02]);
    }

    #[test]
    fn rejects_value_above_max() {
        let mut buf = BytesMut::new();
        assert!(encode_variable_int(&mut buf, VARIABLE_BYTE_INT_MAX + 1).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80);
        assert!(decode_variable_int(&mut buf).is_err());
    }

    #[test]
    fn rejects_five_byte_encoding() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(decode_variable_int(&mut buf).is_err());
    }

    #[test]
    fn encoded_lengths() {
        assert_eq!(variable_int_len(0), 1);
        assert_eq!(variable_int_len(127), 1);
        assert_eq!(variable_int_len(128), 2);
        assert_eq!(variable_int_len(16_383), 2);
        assert_eq!(variable_int_len(16_384), 3);
        assert_eq!(variable_int_len(2_097_151), 3);
        assert_eq!(variable_int_len(2_097_152), 4);
        assert_eq!(variable_int_len(VARIABLE_BYTE_INT_MAX), 4);
    }
}
