use crate::encoding::{decode_string, encode_string};
use crate::error::{MqttError, Result};
use crate::flags::PublishFlags;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::ProtocolVersion;
use crate::QoS;
use bytes::{Buf, BufMut};

/// MQTT PUBLISH packet.
///
/// Carries the topic (possibly empty when a topic alias stands in for it),
/// the optional packet identifier for QoS > 0, and the v5 property section.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPacket {
    pub topic_name: String,
    /// Required for QoS > 0, absent for QoS 0.
    pub packet_id: Option<u16>,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// v5 only; empty under 3.1.1.
    pub properties: Properties,
}

impl PublishPacket {
    #[must_use]
    pub fn new(topic_name: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS) -> Self {
        Self {
            topic_name: topic_name.into(),
            packet_id: (qos != QoS::AtMostOnce).then_some(0),
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn with_packet_id(mut self, id: u16) -> Self {
        if self.qos != QoS::AtMostOnce {
            self.packet_id = Some(id);
        }
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }

    #[must_use]
    pub fn with_topic_alias(mut self, alias: u16) -> Self {
        self.properties.set_topic_alias(alias);
        self
    }

    /// Topic alias carried in the property section, if any.
    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        self.properties.topic_alias()
    }
}

impl MqttPacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.dup {
            flags |= PublishFlags::Dup as u8;
        }
        flags = PublishFlags::with_qos(flags, self.qos as u8);
        if self.retain {
            flags |= PublishFlags::Retain as u8;
        }
        flags
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        encode_string(buf, &self.topic_name)?;

        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.ok_or_else(|| {
                MqttError::ProtocolError("PUBLISH with QoS > 0 requires a packet id".to_string())
            })?;
            if packet_id == 0 {
                return Err(MqttError::ProtocolError(
                    "PUBLISH packet id must be non-zero".to_string(),
                ));
            }
            buf.put_u16(packet_id);
        }

        if version.is_v5() {
            self.properties.encode(buf)?;
        }

        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        let flags = PublishFlags::decompose(fixed_header.flags);
        let dup = flags.contains(&PublishFlags::Dup);
        let retain = flags.contains(&PublishFlags::Retain);
        let qos = QoS::try_from_u8(PublishFlags::extract_qos(fixed_header.flags))?;

        if qos == QoS::AtMostOnce && dup {
            return Err(MqttError::ProtocolError(
                "PUBLISH with QoS 0 must not set DUP".to_string(),
            ));
        }

        let topic_name = decode_string(buf)?;

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            if buf.remaining() < 2 {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH missing packet identifier".to_string(),
                ));
            }
            let id = buf.get_u16();
            if id == 0 {
                return Err(MqttError::ProtocolError(
                    "PUBLISH packet id must be non-zero".to_string(),
                ));
            }
            Some(id)
        };

        let properties = if version.is_v5() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let payload = buf.copy_to_bytes(buf.remaining()).to_vec();

        Ok(Self {
            topic_name,
            packet_id,
            payload,
            qos,
            retain,
            dup,
            properties,
        })
    }
}
