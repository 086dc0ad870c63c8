use crate::constants::subscription;
use crate::encoding::{decode_string, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::ProtocolVersion;
use crate::QoS;
use bytes::{Buf, BufMut};

/// Per-filter subscription options.
///
/// Under 3.1.1 only the requested QoS exists on the wire; the v5 bits
/// (no-local, retain-as-published, retain-handling) are encoded as zero and
/// decoded as defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

/// v5 retain-handling values (bits 4-5 of the options byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RetainHandling {
    SendAtSubscribe = 0,
    SendAtSubscribeIfNew = 1,
    DoNotSend = 2,
}

impl RetainHandling {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::SendAtSubscribe),
            1 => Some(Self::SendAtSubscribeIfNew),
            2 => Some(Self::DoNotSend),
            _ => None,
        }
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::SendAtSubscribe,
        }
    }
}

impl SubscriptionOptions {
    #[must_use]
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    #[must_use]
    pub fn with_retain_as_published(mut self, retain_as_published: bool) -> Self {
        self.retain_as_published = retain_as_published;
        self
    }

    #[must_use]
    pub fn with_retain_handling(mut self, retain_handling: RetainHandling) -> Self {
        self.retain_handling = retain_handling;
        self
    }

    /// Packs the options into the v5 subscription-options byte.
    #[must_use]
    pub fn encode_byte(&self, version: ProtocolVersion) -> u8 {
        let mut byte = self.qos as u8;
        if version.is_v5() {
            if self.no_local {
                byte |= subscription::NO_LOCAL;
            }
            if self.retain_as_published {
                byte |= subscription::RETAIN_AS_PUBLISHED;
            }
            byte |= (self.retain_handling as u8) << subscription::RETAIN_HANDLING_SHIFT;
        }
        byte
    }

    /// Parses a subscription-options byte.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPacket` for reserved bits or invalid field values.
    pub fn decode_byte(byte: u8, version: ProtocolVersion) -> Result<Self> {
        let qos = QoS::try_from_u8(byte & subscription::QOS_MASK).map_err(|_| {
            MqttError::MalformedPacket("invalid QoS in subscription options".to_string())
        })?;

        if !version.is_v5() {
            if byte & !subscription::QOS_MASK != 0 {
                return Err(MqttError::MalformedPacket(
                    "reserved subscription-option bits set".to_string(),
                ));
            }
            return Ok(Self::new(qos));
        }

        if byte & subscription::RESERVED_BITS != 0 {
            return Err(MqttError::MalformedPacket(
                "reserved subscription-option bits set".to_string(),
            ));
        }

        let retain_handling = RetainHandling::from_u8(
            (byte >> subscription::RETAIN_HANDLING_SHIFT) & subscription::RETAIN_HANDLING_MASK,
        )
        .ok_or_else(|| MqttError::MalformedPacket("invalid retain handling".to_string()))?;

        Ok(Self {
            qos,
            no_local: byte & subscription::NO_LOCAL != 0,
            retain_as_published: byte & subscription::RETAIN_AS_PUBLISHED != 0,
            retain_handling,
        })
    }
}

/// One (filter, options) pair in a SUBSCRIBE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub options: SubscriptionOptions,
}

/// MQTT SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    /// v5 only; empty under 3.1.1.
    pub properties: Properties,
    pub filters: Vec<TopicFilter>,
}

impl MqttPacket for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "SUBSCRIBE requires at least one topic filter".to_string(),
            ));
        }

        buf.put_u16(self.packet_id);
        if version.is_v5() {
            self.properties.encode(buf)?;
        }

        for entry in &self.filters {
            encode_string(buf, &entry.filter)?;
            buf.put_u8(entry.options.encode_byte(version));
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket("truncated SUBSCRIBE".to_string()));
        }
        let packet_id = buf.get_u16();

        let properties = if version.is_v5() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let mut filters = Vec::new();
        while buf.has_remaining() {
            let filter = decode_string(buf)?;
            if !buf.has_remaining() {
                return Err(MqttError::MalformedPacket(
                    "missing subscription options byte".to_string(),
                ));
            }
            let options = SubscriptionOptions::decode_byte(buf.get_u8(), version)?;
            filters.push(TopicFilter { filter, options });
        }

        if filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "SUBSCRIBE requires at least one topic filter".to_string(),
            ));
        }

        Ok(Self {
            packet_id,
            properties,
            filters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(packet: &SubscribePacket, version: ProtocolVersion) -> SubscribePacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, version).unwrap();
        let header = FixedHeader::decode(&mut buf).unwrap();
        assert_eq!(header.flags, 0x02);
        SubscribePacket::decode_body(&mut buf, &header, version).unwrap()
    }

    #[test]
    fn v5_options_byte_packing() {
        let options = SubscriptionOptions::new(QoS::AtLeastOnce)
            .with_no_local(true)
            .with_retain_as_published(true)
            .with_retain_handling(RetainHandling::DoNotSend);
        let byte = options.encode_byte(ProtocolVersion::V5);
        assert_eq!(byte, 0x01 | 0x04 | 0x08 | 0x20);
        assert_eq!(
            SubscriptionOptions::decode_byte(byte, ProtocolVersion::V5).unwrap(),
            options
        );
    }

    #[test]
    fn v311_options_byte_is_qos_only() {
        let options = SubscriptionOptions::new(QoS::ExactlyOnce).with_no_local(true);
        assert_eq!(options.encode_byte(ProtocolVersion::V311), 0x02);
        assert!(SubscriptionOptions::decode_byte(0x06, ProtocolVersion::V311).is_err());
    }

    #[test]
    fn round_trip_multiple_filters() {
        let packet = SubscribePacket {
            packet_id: 10,
            properties: Properties::default(),
            filters: vec![
                TopicFilter {
                    filter: "sensors/#".to_string(),
                    options: SubscriptionOptions::new(QoS::AtLeastOnce),
                },
                TopicFilter {
                    filter: "$share/workers/jobs/+".to_string(),
                    options: SubscriptionOptions::new(QoS::ExactlyOnce).with_no_local(true),
                },
            ],
        };
        for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
            let mut expected = packet.clone();
            if version == ProtocolVersion::V311 {
                // v5-only bits do not survive a 3.1.1 wire trip
                expected.filters[1].options.no_local = false;
            }
            assert_eq!(round_trip(&packet, version), expected);
        }
    }

    #[test]
    fn rejects_empty_filter_list() {
        let packet = SubscribePacket {
            packet_id: 1,
            properties: Properties::default(),
            filters: vec![],
        };
        let mut buf = BytesMut::new();
        assert!(packet.encode(&mut buf, ProtocolVersion::V5).is_err());
    }

    #[test]
    fn rejects_reserved_option_bits() {
        assert!(SubscriptionOptions::decode_byte(0xC0, ProtocolVersion::V5).is_err());
        assert!(SubscriptionOptions::decode_byte(0x30, ProtocolVersion::V5).is_err());
    }
}
