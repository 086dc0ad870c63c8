use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT AUTH packet (v5 only) - enhanced authentication exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthPacket {
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl AuthPacket {
    fn valid_reason_code(code: ReasonCode) -> bool {
        matches!(
            code,
            ReasonCode::Success | ReasonCode::ContinueAuthentication | ReasonCode::ReAuthenticate
        )
    }
}

impl MqttPacket for AuthPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Auth
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if !version.is_v5() {
            return Err(MqttError::ProtocolError(
                "AUTH packet is not defined for MQTT 3.1.1".to_string(),
            ));
        }
        if self.reason_code == ReasonCode::Success && self.properties.is_empty() {
            return Ok(());
        }
        buf.put_u8(u8::from(self.reason_code));
        self.properties.encode(buf)?;
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        _version: ProtocolVersion,
    ) -> Result<Self> {
        if fixed_header.remaining_length == 0 {
            return Ok(Self {
                reason_code: ReasonCode::Success,
                properties: Properties::default(),
            });
        }

        let reason_byte = buf.get_u8();
        let reason_code = ReasonCode::from_u8(reason_byte)
            .filter(|c| Self::valid_reason_code(*c))
            .ok_or_else(|| {
                MqttError::MalformedPacket(format!("invalid AUTH reason code: {reason_byte:#04x}"))
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
    use crate::protocol::v5::properties::{PropertyId, PropertyValue};

    #[test]
    fn continue_authentication_round_trip() {
        let mut properties = Properties::default();
        properties
            .add(
                PropertyId::AuthenticationMethod,
                PropertyValue::Utf8String("SCRAM-SHA-256".to_string()),
            )
            .unwrap();
        let packet = AuthPacket {
            reason_code: ReasonCode::ContinueAuthentication,
            properties,
        };

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = AuthPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn empty_body_means_success() {
        let header = FixedHeader::new(PacketType::Auth, 0, 0);
        let mut buf = BytesMut::new();
        let decoded = AuthPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded.reason_code, ReasonCode::Success);
    }

    #[test]
    fn refuses_v311_encoding() {
        let packet = AuthPacket {
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        };
        let mut buf = BytesMut::new();
        assert!(packet.encode(&mut buf, ProtocolVersion::V311).is_err());
    }
}
