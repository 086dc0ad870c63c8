pub mod auth;
pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod puback;
pub mod pubcomp;
pub mod publish;
pub mod pubrec;
pub mod pubrel;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use crate::constants::masks;
use crate::encoding::{decode_variable_int, encode_variable_int, variable_int_len};
use crate::error::{MqttError, Result};
use crate::protocol::ProtocolVersion;
use bebytes::BeBytes;
use bytes::{Buf, BufMut};

/// Fixed-header byte 1 as a bit-field struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
pub struct MqttTypeAndFlags {
    /// Packet type (bits 7-4).
    #[bits(4)]
    pub message_type: u8,
    /// DUP flag (bit 3, PUBLISH only).
    #[bits(1)]
    pub dup: u8,
    /// QoS level (bits 2-1, PUBLISH only).
    #[bits(2)]
    pub qos: u8,
    /// RETAIN flag (bit 0, PUBLISH only).
    #[bits(1)]
    pub retain: u8,
}

impl MqttTypeAndFlags {
    #[must_use]
    pub fn for_packet_type(packet_type: PacketType) -> Self {
        Self {
            message_type: packet_type as u8,
            dup: 0,
            qos: 0,
            retain: 0,
        }
    }

    #[must_use]
    pub fn for_publish(qos: u8, dup: bool, retain: bool) -> Self {
        Self {
            message_type: PacketType::Publish as u8,
            dup: u8::from(dup),
            qos,
            retain: u8::from(retain),
        }
    }

    #[must_use]
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.message_type)
    }

    #[must_use]
    pub fn is_dup(&self) -> bool {
        self.dup != 0
    }

    #[must_use]
    pub fn is_retain(&self) -> bool {
        self.retain != 0
    }
}

/// Variable header shared by the four QoS acknowledgement packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
pub struct AckPacketHeader {
    /// Packet identifier.
    #[bebytes(big_endian)]
    pub packet_id: u16,
    /// Reason code byte (v5 only on the wire).
    pub reason_code: u8,
}

/// The fifteen MQTT control packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::try_from(value).ok()
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        packet_type as u8
    }
}

/// MQTT packet fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    #[must_use]
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: u32) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    /// Encodes byte 1 and the remaining length.
    ///
    /// # Errors
    ///
    /// Returns an error if the remaining length exceeds the variable byte
    /// integer maximum.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let byte1 = (u8::from(self.packet_type) << 4) | (self.flags & masks::FLAGS);
        buf.put_u8(byte1);
        encode_variable_int(buf, self.remaining_length)?;
        Ok(())
    }

    /// Decodes a fixed header.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPacket` on truncation, `InvalidPacketType` for a
    /// zero type nibble.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "missing fixed header".to_string(),
            ));
        }

        let byte1 = buf.get_u8();
        let type_val = byte1 >> 4;
        let flags = byte1 & masks::FLAGS;

        let packet_type =
            PacketType::from_u8(type_val).ok_or(MqttError::InvalidPacketType(type_val))?;
        let remaining_length = decode_variable_int(buf)?;

        Ok(Self {
            packet_type,
            flags,
            remaining_length,
        })
    }

    /// Checks the reserved flag bits for the packet type.
    #[must_use]
    pub fn validate_flags(&self) -> bool {
        match self.packet_type {
            PacketType::Publish => true,
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => {
                self.flags == 0x02
            }
            _ => self.flags == 0,
        }
    }

    /// Encoded length of the fixed header itself.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + variable_int_len(self.remaining_length)
    }
}

/// Tagged union over every control packet.
#[derive(Debug, Clone)]
pub enum Packet {
    Connect(Box<connect::ConnectPacket>),
    ConnAck(connack::ConnAckPacket),
    Publish(publish::PublishPacket),
    PubAck(puback::PubAckPacket),
    PubRec(pubrec::PubRecPacket),
    PubRel(pubrel::PubRelPacket),
    PubComp(pubcomp::PubCompPacket),
    Subscribe(subscribe::SubscribePacket),
    SubAck(suback::SubAckPacket),
    Unsubscribe(unsubscribe::UnsubscribePacket),
    UnsubAck(unsuback::UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect(disconnect::DisconnectPacket),
    Auth(auth::AuthPacket),
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// Encodes the complete packet, fixed header included.
    ///
    /// # Errors
    ///
    /// Returns an error if body encoding fails or the body exceeds the
    /// remaining-length maximum.
    pub fn encode<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        match self {
            Packet::Connect(p) => p.encode(buf, version),
            Packet::ConnAck(p) => p.encode(buf, version),
            Packet::Publish(p) => p.encode(buf, version),
            Packet::PubAck(p) => p.encode(buf, version),
            Packet::PubRec(p) => p.encode(buf, version),
            Packet::PubRel(p) => p.encode(buf, version),
            Packet::PubComp(p) => p.encode(buf, version),
            Packet::Subscribe(p) => p.encode(buf, version),
            Packet::SubAck(p) => p.encode(buf, version),
            Packet::Unsubscribe(p) => p.encode(buf, version),
            Packet::UnsubAck(p) => p.encode(buf, version),
            Packet::PingReq => FixedHeader::new(PacketType::PingReq, 0, 0).encode(buf),
            Packet::PingResp => FixedHeader::new(PacketType::PingResp, 0, 0).encode(buf),
            Packet::Disconnect(p) => p.encode(buf, version),
            Packet::Auth(p) => p.encode(buf, version),
        }
    }

    /// Decodes a packet body for an already-parsed fixed header.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` for reserved flag-bit violations and the body
    /// decoder's errors otherwise.
    pub fn decode_from_body<B: Buf>(
        fixed_header: &FixedHeader,
        buf: &mut B,
        version: ProtocolVersion,
    ) -> Result<Self> {
        if !fixed_header.validate_flags() {
            return Err(MqttError::ProtocolError(format!(
                "invalid fixed header flags {:#04x} for {:?}",
                fixed_header.flags, fixed_header.packet_type
            )));
        }

        match fixed_header.packet_type {
            PacketType::Connect => {
                let packet = connect::ConnectPacket::decode_body(buf, fixed_header, version)?;
                Ok(Packet::Connect(Box::new(packet)))
            }
            PacketType::ConnAck => Ok(Packet::ConnAck(connack::ConnAckPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?)),
            PacketType::Publish => Ok(Packet::Publish(publish::PublishPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?)),
            PacketType::PubAck => Ok(Packet::PubAck(puback::PubAckPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?)),
            PacketType::PubRec => Ok(Packet::PubRec(pubrec::PubRecPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?)),
            PacketType::PubRel => Ok(Packet::PubRel(pubrel::PubRelPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?)),
            PacketType::PubComp => Ok(Packet::PubComp(pubcomp::PubCompPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?)),
            PacketType::Subscribe => Ok(Packet::Subscribe(
                subscribe::SubscribePacket::decode_body(buf, fixed_header, version)?,
            )),
            PacketType::SubAck => Ok(Packet::SubAck(suback::SubAckPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?)),
            PacketType::Unsubscribe => Ok(Packet::Unsubscribe(
                unsubscribe::UnsubscribePacket::decode_body(buf, fixed_header, version)?,
            )),
            PacketType::UnsubAck => Ok(Packet::UnsubAck(unsuback::UnsubAckPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?)),
            PacketType::PingReq => Ok(Packet::PingReq),
            PacketType::PingResp => Ok(Packet::PingResp),
            PacketType::Disconnect => Ok(Packet::Disconnect(
                disconnect::DisconnectPacket::decode_body(buf, fixed_header, version)?,
            )),
            PacketType::Auth => {
                if !version.is_v5() {
                    return Err(MqttError::ProtocolError(
                        "AUTH packet is not defined for MQTT 3.1.1".to_string(),
                    ));
                }
                Ok(Packet::Auth(auth::AuthPacket::decode_body(
                    buf,
                    fixed_header,
                    version,
                )?))
            }
        }
    }
}

/// Version-aware per-packet codec.
pub trait MqttPacket: Sized {
    fn packet_type(&self) -> PacketType;

    /// Fixed-header flags nibble.
    fn flags(&self) -> u8 {
        0
    }

    /// Encodes everything after the fixed header.
    ///
    /// # Errors
    ///
    /// Returns an error if a field fails to encode.
    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()>;

    /// Decodes everything after the fixed header.
    ///
    /// # Errors
    ///
    /// Returns an error if a field fails to decode.
    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self>;

    /// Encodes the complete packet: body first to learn the remaining
    /// length, then the fixed header, then the body bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    fn encode<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        let mut body = Vec::new();
        self.encode_body(&mut body, version)?;

        let remaining = u32::try_from(body.len()).map_err(|_| MqttError::PacketTooLarge {
            size: body.len(),
            max: crate::encoding::VARIABLE_BYTE_INT_MAX as usize,
        })?;
        FixedHeader::new(self.packet_type(), self.flags(), remaining).encode(buf)?;
        buf.put_slice(&body);
        Ok(())
    }
}
