use crate::error::{MqttError, Result};
use crate::flags::ConnAckFlags;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT CONNACK packet.
///
/// Under 3.1.1 the second byte is the connect return code (0..5); under v5
/// it is a full reason code followed by the property section. Both forms map
/// onto [`ReasonCode`].
#[derive(Debug, Clone)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub reason_code: ReasonCode,
    /// v5 only; empty under 3.1.1.
    pub properties: Properties,
}

impl ConnAckPacket {
    #[must_use]
    pub fn new(session_present: bool, reason_code: ReasonCode) -> Self {
        Self {
            session_present,
            reason_code,
            properties: Properties::default(),
        }
    }

    /// Maps a 3.1.1 connect return code onto the shared reason-code enum.
    fn from_v311_return_code(code: u8) -> Result<ReasonCode> {
        match code {
            0x00 => Ok(ReasonCode::Success),
            0x01 => Ok(ReasonCode::UnsupportedProtocolVersion),
            0x02 => Ok(ReasonCode::ClientIdentifierNotValid),
            0x03 => Ok(ReasonCode::ServerUnavailable),
            0x04 => Ok(ReasonCode::BadUsernameOrPassword),
            0x05 => Ok(ReasonCode::NotAuthorized),
            other => Err(MqttError::MalformedPacket(format!(
                "invalid CONNACK return code: {other}"
            ))),
        }
    }

    fn to_v311_return_code(self_code: ReasonCode) -> u8 {
        match self_code {
            ReasonCode::Success => 0x00,
            ReasonCode::UnsupportedProtocolVersion => 0x01,
            ReasonCode::ClientIdentifierNotValid => 0x02,
            ReasonCode::ServerUnavailable => 0x03,
            ReasonCode::BadUsernameOrPassword => 0x04,
            _ => 0x05,
        }
    }
}

impl MqttPacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        buf.put_u8(u8::from(self.session_present));

        if version.is_v5() {
            buf.put_u8(u8::from(self.reason_code));
            self.properties.encode(buf)?;
        } else {
            buf.put_u8(Self::to_v311_return_code(self.reason_code));
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket("truncated CONNACK".to_string()));
        }

        let ack_flags = buf.get_u8();
        if ack_flags & 0xFE != 0 {
            return Err(MqttError::MalformedPacket(
                "CONNACK reserved acknowledge-flag bits set".to_string(),
            ));
        }
        let session_present = ConnAckFlags::decompose(ack_flags).contains(&ConnAckFlags::SessionPresent);

        let reason_byte = buf.get_u8();
        let (reason_code, properties) = if version.is_v5() {
            let code = ReasonCode::from_u8(reason_byte).ok_or_else(|| {
                MqttError::MalformedPacket(format!("invalid reason code: {reason_byte:#04x}"))
            })?;
            if !code.valid_for_connack() {
                return Err(MqttError::MalformedPacket(format!(
                    "reason code {code:?} not valid in CONNACK"
                )));
            }
            let properties = if buf.has_remaining() {
                Properties::decode(buf)?
            } else {
                Properties::default()
            };
            (code, properties)
        } else {
            (Self::from_v311_return_code(reason_byte)?, Properties::default())
        };

        Ok(Self {
            session_present,
            reason_code,
            properties,
        })
    }
}
