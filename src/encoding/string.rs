use crate::constants::limits;
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut};

/// Encodes an MQTT UTF-8 string: 2-byte big-endian length then the bytes.
///
/// # Errors
///
/// Returns `MalformedPacket` if the string contains a null character or is
/// longer than 65,535 bytes.
pub fn encode_string<B: BufMut>(buf: &mut B, string: &str) -> Result<()> {
    if string.contains('\0') {
        return Err(MqttError::MalformedPacket(
            "string contains null character".to_string(),
        ));
    }

    let bytes = string.as_bytes();
    if bytes.len() > limits::MAX_STRING_LENGTH as usize {
        return Err(MqttError::MalformedPacket(format!(
            "string length {} exceeds maximum {}",
            bytes.len(),
            limits::MAX_STRING_LENGTH
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

/// Decodes an MQTT UTF-8 string.
///
/// # Errors
///
/// Returns `MalformedPacket` on truncation, invalid UTF-8, or embedded null
/// characters.
pub fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(
            "truncated string length".to_string(),
        ));
    }

    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(MqttError::MalformedPacket(format!(
            "truncated string: expected {len} bytes, got {}",
            buf.remaining()
        )));
    }

    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);

    let string = String::from_utf8(bytes)
        .map_err(|e| MqttError::MalformedPacket(format!("invalid UTF-8: {e}")))?;
    if string.contains('\0') {
        return Err(MqttError::MalformedPacket(
            "string contains null character".to_string(),
        ));
    }

    Ok(string)
}

/// Encoded length of a string (length prefix included).
#[must_use]
pub fn string_len(string: &str) -> usize {
    2 + string.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trip() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, "sensors/kitchen/temp").unwrap();
        assert_eq!(&buf[..2], &[0x00, 0x14]);
        assert_eq!(decode_string(&mut buf).unwrap(), "sensors/kitchen/temp");
    }

    #[test]
    fn empty_string() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, "").unwrap();
        assert_eq!(buf.to_vec(), vec![0x00, 0x00]);
        assert_eq!(decode_string(&mut buf).unwrap(), "");
    }

    #[test]
    fn unicode_round_trip() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, "温度/サーモ").unwrap();
        assert_eq!(decode_string(&mut buf).unwrap(), "温度/サーモ");
    }

    #[test]
    fn rejects_null_character() {
        let mut buf = BytesMut::new();
        assert!(encode_string(&mut buf, "bad\0topic").is_err());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u16(2);
        buf.put_slice(&[0xC3, 0x28]);
        assert!(decode_string(&mut buf).is_err());
    }

    #[test]
    fn rejects_truncation() {
        let mut buf = BytesMut::new();
        buf.put_u16(10);
        buf.put_slice(b"short");
        assert!(decode_string(&mut buf).is_err());
    }
}
