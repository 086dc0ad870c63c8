use crate::encoding::{decode_string, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT UNSUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    /// v5 only; empty under 3.1.1.
    pub properties: Properties,
    pub filters: Vec<String>,
}

impl MqttPacket for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "UNSUBSCRIBE requires at least one topic filter".to_string(),
            ));
        }

        buf.put_u16(self.packet_id);
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        for filter in &self.filters {
            encode_string(buf, filter)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket(
                "truncated UNSUBSCRIBE".to_string(),
            ));
        }
        let packet_id = buf.get_u16();

        let properties = if version.is_v5() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let mut filters = Vec::new();
        while buf.has_remaining() {
            filters.push(decode_string(buf)?);
        }

        if filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "UNSUBSCRIBE requires at least one topic filter".to_string(),
            ));
        }

        Ok(Self {
            packet_id,
            properties,
            filters,
        })
    }
}
