use crate::error::{MqttError, Result};
use crate::packet::{AckPacketHeader, FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bebytes::BeBytes;
use bytes::{Buf, BufMut};

/// MQTT PUBACK packet - the QoS 1 terminal acknowledgement.
///
/// Under 3.1.1 only the packet identifier is on the wire. Under v5 the
/// reason code may be omitted (remaining length 2 means Success) and the
/// property section may be omitted after it (remaining length 3).
#[derive(Debug, Clone, PartialEq)]
pub struct PubAckPacket {
    pub packet_id: u16,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl PubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        }
    }
}

pub(crate) fn encode_ack_body<B: BufMut>(
    packet_id: u16,
    reason_code: ReasonCode,
    properties: &Properties,
    buf: &mut B,
    version: ProtocolVersion,
) -> Result<()> {
    if packet_id == 0 {
        return Err(MqttError::ProtocolError(
            "acknowledgement packet id must be non-zero".to_string(),
        ));
    }

    if !version.is_v5() {
        buf.put_u16(packet_id);
        return Ok(());
    }

    if reason_code == ReasonCode::Success && properties.is_empty() {
        buf.put_u16(packet_id);
        return Ok(());
    }

    let header = AckPacketHeader {
        packet_id,
        reason_code: u8::from(reason_code),
    };
    buf.put_slice(&header.to_be_bytes());
    if !properties.is_empty() {
        properties.encode(buf)?;
    }
    Ok(())
}

pub(crate) fn decode_ack_body<B: Buf>(
    buf: &mut B,
    fixed_header: &FixedHeader,
    version: ProtocolVersion,
) -> Result<(u16, ReasonCode, Properties)> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(
            "truncated acknowledgement packet".to_string(),
        ));
    }
    let packet_id = buf.get_u16();
    if packet_id == 0 {
        return Err(MqttError::ProtocolError(
            "acknowledgement packet id must be non-zero".to_string(),
        ));
    }

    if !version.is_v5() || fixed_header.remaining_length <= 2 {
        return Ok((packet_id, ReasonCode::Success, Properties::default()));
    }

    if !buf.has_remaining() {
        return Err(MqttError::MalformedPacket(
            "missing acknowledgement reason code".to_string(),
        ));
    }
    let reason_byte = buf.get_u8();
    let reason_code = ReasonCode::from_u8(reason_byte).ok_or_else(|| {
        MqttError::MalformedPacket(format!("invalid reason code: {reason_byte:#04x}"))
    })?;

    let properties = if buf.has_remaining() {
        Properties::decode(buf)?
    } else {
        Properties::default()
    };

    Ok((packet_id, reason_code, properties))
}

impl MqttPacket for PubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        encode_ack_body(self.packet_id, self.reason_code, &self.properties, buf, version)
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        let (packet_id, reason_code, properties) = decode_ack_body(buf, fixed_header, version)?;
        Ok(Self {
            packet_id,
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
    fn success_encodes_to_two_byte_body() {
        let mut buf = BytesMut::new();
        PubAckPacket::new(7).encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(buf.to_vec(), vec![0x40, 0x02, 0x00, 0x07]);
    }

    #[test]
    fn decodes_three_byte_wire_form() {
        // 0x40 0x03 <id hi> <id lo> 0x00
        let mut buf = BytesMut::from(&[0x40u8, 0x03, 0x00, 0x2A, 0x00][..]);
        let header = FixedHeader::decode(&mut buf).unwrap();
        let packet = PubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(packet.packet_id, 42);
        assert_eq!(packet.reason_code, ReasonCode::Success);
    }

    #[test]
    fn error_reason_round_trip() {
        let packet = PubAckPacket {
            packet_id: 9,
            reason_code: ReasonCode::QuotaExceeded,
            properties: Properties::default(),
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = PubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn v311_is_id_only() {
        let packet = PubAckPacket {
            packet_id: 3,
            reason_code: ReasonCode::QuotaExceeded, // ignored on the 3.1.1 wire
            properties: Properties::default(),
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(buf.to_vec(), vec![0x40, 0x02, 0x00, 0x03]);

        let header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = PubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V311).unwrap();
        assert_eq!(decoded.reason_code, ReasonCode::Success);
    }

    #[test]
    fn rejects_zero_packet_id() {
        let mut buf = BytesMut::from(&[0x00u8, 0x00][..]);
        let header = FixedHeader::new(PacketType::PubAck, 0, 2);
        assert!(PubAckPacket::decode_body(&mut buf, &header, ProtocolVersion::V5).is_err());
    }
}
