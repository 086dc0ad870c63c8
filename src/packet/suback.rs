use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::ProtocolVersion;
use crate::QoS;
use bytes::{Buf, BufMut};

/// Per-filter SUBACK reason codes.
///
/// The 3.1.1 return codes (granted QoS or 0x80 failure) are a strict subset,
/// so one enum covers both versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubAckReasonCode {
    GrantedQoS0 = 0x00,
    GrantedQoS1 = 0x01,
    GrantedQoS2 = 0x02,
    UnspecifiedError = 0x80,
    ImplementationSpecificError = 0x83,
    NotAuthorized = 0x87,
    TopicFilterInvalid = 0x8F,
    PacketIdentifierInUse = 0x91,
    QuotaExceeded = 0x97,
    SharedSubscriptionsNotSupported = 0x9E,
    SubscriptionIdentifiersNotSupported = 0xA1,
    WildcardSubscriptionsNotSupported = 0xA2,
}

impl SubAckReasonCode {
    #[must_use]
    pub fn from_qos(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::GrantedQoS0,
            QoS::AtLeastOnce => Self::GrantedQoS1,
            QoS::ExactlyOnce => Self::GrantedQoS2,
        }
    }

    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::GrantedQoS0),
            0x01 => Some(Self::GrantedQoS1),
            0x02 => Some(Self::GrantedQoS2),
            0x80 => Some(Self::UnspecifiedError),
            0x83 => Some(Self::ImplementationSpecificError),
            0x87 => Some(Self::NotAuthorized),
            0x8F => Some(Self::TopicFilterInvalid),
            0x91 => Some(Self::PacketIdentifierInUse),
            0x97 => Some(Self::QuotaExceeded),
            0x9E => Some(Self::SharedSubscriptionsNotSupported),
            0xA1 => Some(Self::SubscriptionIdentifiersNotSupported),
            0xA2 => Some(Self::WildcardSubscriptionsNotSupported),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::GrantedQoS0 | Self::GrantedQoS1 | Self::GrantedQoS2
        )
    }

    /// Granted QoS level for success codes.
    #[must_use]
    pub fn granted_qos(self) -> Option<QoS> {
        match self {
            Self::GrantedQoS0 => Some(QoS::AtMostOnce),
            Self::GrantedQoS1 => Some(QoS::AtLeastOnce),
            Self::GrantedQoS2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// MQTT SUBACK packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    /// v5 only; empty under 3.1.1.
    pub properties: Properties,
    /// One code per filter in the matching SUBSCRIBE, same order.
    pub reason_codes: Vec<SubAckReasonCode>,
}

impl MqttPacket for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        buf.put_u16(self.packet_id);
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        for code in &self.reason_codes {
            // 3.1.1 brokers only emit 0x00-0x02 and 0x80; collapse the rest.
            let byte = if version.is_v5() || code.is_success() {
                *code as u8
            } else {
                0x80
            };
            buf.put_u8(byte);
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket("truncated SUBACK".to_string()));
        }
        let packet_id = buf.get_u16();

        let properties = if version.is_v5() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let mut reason_codes = Vec::with_capacity(buf.remaining());
        while buf.has_remaining() {
            let byte = buf.get_u8();
            let code = SubAckReasonCode::from_u8(byte).ok_or_else(|| {
                MqttError::MalformedPacket(format!("invalid SUBACK reason code: {byte:#04x}"))
            })?;
            reason_codes.push(code);
        }

        if reason_codes.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBACK carries no reason codes".to_string(),
            ));
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
    fn round_trip_v5() {
        let packet = SubAckPacket {
            packet_id: 77,
            properties: Properties::default(),
            reason_codes: vec![
                SubAckReasonCode::GrantedQoS1,
                SubAckReasonCode::NotAuthorized,
            ],
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = SubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn v311_collapses_error_codes() {
        let packet = SubAckPacket {
            packet_id: 5,
            properties: Properties::default(),
            reason_codes: vec![SubAckReasonCode::QuotaExceeded],
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = SubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V311).unwrap();
        assert_eq!(
            decoded.reason_codes,
            vec![SubAckReasonCode::UnspecifiedError]
        );
    }

    #[test]
    fn granted_qos_mapping() {
        assert_eq!(
            SubAckReasonCode::GrantedQoS2.granted_qos(),
            Some(QoS::ExactlyOnce)
        );
        assert_eq!(SubAckReasonCode::UnspecifiedError.granted_qos(), None);
        assert!(SubAckReasonCode::from_qos(QoS::AtLeastOnce).is_success());
    }

    #[test]
    fn rejects_empty_code_list() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u8(0); // empty property section
        let header = FixedHeader::new(PacketType::SubAck, 0, 3);
        assert!(SubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).is_err());
    }
}
