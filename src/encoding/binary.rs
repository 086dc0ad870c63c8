use crate::constants::limits;
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Encodes MQTT binary data: 2-byte big-endian length then the raw bytes.
///
/// # Errors
///
/// Returns `MalformedPacket` if the data is longer than 65,535 bytes.
pub fn encode_binary<B: BufMut>(buf: &mut B, data: &[u8]) -> Result<()> {
    if data.len() > limits::MAX_STRING_LENGTH as usize {
        return Err(MqttError::MalformedPacket(format!(
            "binary data length {} exceeds maximum {}",
            data.len(),
            limits::MAX_STRING_LENGTH
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Decodes MQTT binary data.
///
/// # Errors
///
/// Returns `MalformedPacket` on truncation.
pub fn decode_binary<B: Buf>(buf: &mut B) -> Result<Bytes> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(
            "truncated binary data length".to_string(),
        ));
    }

    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(MqttError::MalformedPacket(format!(
            "truncated binary data: expected {len} bytes, got {}",
            buf.remaining()
        )));
    }

    Ok(buf.copy_to_bytes(len))
}

/// Encoded length of binary data (length prefix included).
#[must_use]
pub fn binary_len(data: &[u8]) -> usize {
    2 + data.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trip() {
        let mut buf = BytesMut::new();
        encode_binary(&mut buf, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(buf.to_vec(), vec![0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(
            decode_binary(&mut buf).unwrap().to_vec(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn empty_data() {
        let mut buf = BytesMut::new();
        encode_binary(&mut buf, &[]).unwrap();
        assert_eq!(decode_binary(&mut buf).unwrap().len(), 0);
    }

    #[test]
    fn rejects_truncation() {
        let mut buf = BytesMut::new();
        buf.put_u16(4);
        buf.put_slice(&[0x01]);
        assert!(decode_binary(&mut buf).is_err());
    }
}
