use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::{ReasonCode, NORMAL_DISCONNECTION};
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT DISCONNECT packet.
///
/// The 3.1.1 form has an empty body. The v5 form carries a reason code and
/// properties, both omissible when the reason is 0x00 with no properties.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectPacket {
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl DisconnectPacket {
    #[must_use]
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::default(),
        }
    }

    /// Normal disconnection (reason 0x00).
    #[must_use]
    pub fn normal() -> Self {
        Self::new(NORMAL_DISCONNECTION)
    }

    #[must_use]
    pub fn with_reason_string(mut self, reason: String) -> Self {
        self.properties.set_reason_string(reason);
        self
    }

    #[must_use]
    pub fn with_session_expiry_interval(mut self, seconds: u32) -> Self {
        self.properties.set_session_expiry_interval(seconds);
        self
    }
}

impl MqttPacket for DisconnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Disconnect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if !version.is_v5() {
            return Ok(());
        }
        if self.reason_code == NORMAL_DISCONNECTION && self.properties.is_empty() {
            return Ok(());
        }
        buf.put_u8(u8::from(self.reason_code));
        if !self.properties.is_empty() {
            self.properties.encode(buf)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        if !version.is_v5() {
            if fixed_header.remaining_length != 0 {
                return Err(MqttError::MalformedPacket(
                    "3.1.1 DISCONNECT carries no body".to_string(),
                ));
            }
            return Ok(Self::normal());
        }

        if fixed_header.remaining_length == 0 {
            return Ok(Self::normal());
        }

        let reason_byte = buf.get_u8();
        let reason_code = ReasonCode::from_u8(reason_byte)
            .filter(|c| c.valid_for_disconnect())
            .ok_or_else(|| {
                MqttError::MalformedPacket(format!(
                    "invalid DISCONNECT reason code: {reason_byte:#04x}"
                ))
            })?;

        let properties = if buf.has_remaining() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        Ok(Self {
            reason_code,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn v311_encodes_empty_body() {
        let mut buf = BytesMut::new();
        DisconnectPacket::normal()
            .encode(&mut buf, ProtocolVersion::V311)
            .unwrap();
        assert_eq!(buf.to_vec(), vec![0xE0, 0x00]);
    }

    #[test]
    fn v5_normal_omits_reason() {
        let mut buf = BytesMut::new();
        DisconnectPacket::normal()
            .encode(&mut buf, ProtocolVersion::V5)
            .unwrap();
        assert_eq!(buf.to_vec(), vec![0xE0, 0x00]);

        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            DisconnectPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded.reason_code, NORMAL_DISCONNECTION);
    }

    #[test]
    fn session_taken_over_wire_bytes() {
        // 0xE0 0x02 0x8E 0x00 - DISCONNECT, session taken over, no properties
        let mut buf = BytesMut::from(&[0xE0u8, 0x02, 0x8E, 0x00][..]);
        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            DisconnectPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded.reason_code, ReasonCode::SessionTakenOver);
        assert!(decoded.properties.is_empty());
    }

    #[test]
    fn round_trip_with_reason_string() {
        let packet = DisconnectPacket::new(ReasonCode::ServerShuttingDown)
            .with_reason_string("maintenance window".to_string());
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            DisconnectPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.properties.reason_string(), Some("maintenance window"));
    }

    #[test]
    fn rejects_v311_body() {
        let mut buf = BytesMut::from(&[0x00u8][..]);
        let header = FixedHeader::new(PacketType::Disconnect, 0, 1);
        assert!(DisconnectPacket::decode_body(&mut buf, &header, ProtocolVersion::V311).is_err());
    }
}
