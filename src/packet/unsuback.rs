use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT UNSUBACK packet.
///
/// Under 3.1.1 the packet is just the identifier; the v5 form adds a
/// property section and one reason code per filter.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
    /// v5 only; empty under 3.1.1.
    pub properties: Properties,
    /// v5 only; empty under 3.1.1.
    pub reason_codes: Vec<ReasonCode>,
}

impl UnsubAckPacket {
    fn valid_reason_code(code: ReasonCode) -> bool {
        matches!(
            code,
            ReasonCode::Success
                | ReasonCode::NoSubscriptionExisted
                | ReasonCode::UnspecifiedError
                | ReasonCode::ImplementationSpecificError
                | ReasonCode::NotAuthorized
                | ReasonCode::TopicFilterInvalid
                | ReasonCode::PacketIdentifierInUse
        )
    }
}

impl MqttPacket for UnsubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        buf.put_u16(self.packet_id);
        if version.is_v5() {
            self.properties.encode(buf)?;
            for code in &self.reason_codes {
                buf.put_u8(u8::from(*code));
            }
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket("truncated UNSUBACK".to_string()));
        }
        let packet_id = buf.get_u16();

        if !version.is_v5() {
            return Ok(Self {
                packet_id,
                properties: Properties::default(),
                reason_codes: Vec::new(),
            });
        }

        let properties = Properties::decode(buf)?;
        let mut reason_codes = Vec::with_capacity(buf.remaining());
        while buf.has_remaining() {
            let byte = buf.get_u8();
            let code = ReasonCode::from_u8(byte)
                .filter(|c| Self::valid_reason_code(*c))
                .ok_or_else(|| {
                    MqttError::MalformedPacket(format!("invalid UNSUBACK reason code: {byte:#04x}"))
                })?;
            reason_codes.push(code);
        }

        Ok(Self {
            packet_id,
            properties,
            reason_codes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn v311_is_id_only() {
        let packet = UnsubAckPacket {
            packet_id: 4,
            properties: Properties::default(),
            reason_codes: Vec::new(),
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(buf.to_vec(), vec![0xB0, 0x02, 0x00, 0x04]);
    }

    #[test]
    fn v5_round_trip() {
        let packet = UnsubAckPacket {
            packet_id: 9,
            properties: Properties::default(),
            reason_codes: vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted],
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = UnsubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejects_foreign_reason_code() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u8(0); // empty properties
        buf.put_u8(0x8D); // keep-alive timeout is not an UNSUBACK code
        let header = FixedHeader::new(PacketType::UnsubAck, 0, 4);
        assert!(UnsubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).is_err());
    }
}
