use crate::encoding::{decode_binary, decode_string, encode_binary, encode_string};
use crate::error::{MqttError, Result};
use crate::flags::ConnectFlags;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::ProtocolVersion;
use crate::types::{WillMessage, WillProperties};
use crate::QoS;
use bytes::{Buf, BufMut};

const PROTOCOL_NAME: &str = "MQTT";

/// MQTT CONNECT packet.
///
/// The packet carries its own protocol level; the version passed to the
/// codec trait is ignored in favour of `self.version` so a client can open
/// a 3.1.1 session while defaulting to v5 elsewhere.
#[derive(Debug, Clone)]
pub struct ConnectPacket {
    pub version: ProtocolVersion,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<WillMessage>,
    /// CONNECT properties (v5 only).
    pub properties: Properties,
    /// Will properties (v5 only).
    pub will_properties: Properties,
}

impl ConnectPacket {
    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_session {
            flags |= ConnectFlags::CleanSession as u8;
        }
        if let Some(ref will) = self.will {
            flags |= ConnectFlags::WillFlag as u8;
            flags = ConnectFlags::with_will_qos(flags, will.qos as u8);
            if will.retain {
                flags |= ConnectFlags::WillRetain as u8;
            }
        }
        if self.username.is_some() {
            flags |= ConnectFlags::UsernameFlag as u8;
        }
        if self.password.is_some() {
            flags |= ConnectFlags::PasswordFlag as u8;
        }
        flags
    }
}

impl MqttPacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, _version: ProtocolVersion) -> Result<()> {
        encode_string(buf, PROTOCOL_NAME)?;
        buf.put_u8(self.version.wire_byte());
        buf.put_u8(self.connect_flags());
        buf.put_u16(self.keep_alive);

        if self.version.is_v5() {
            self.properties.encode(buf)?;
        }

        encode_string(buf, &self.client_id)?;

        if let Some(ref will) = self.will {
            if self.version.is_v5() {
                self.will_properties.encode(buf)?;
            }
            encode_string(buf, &will.topic)?;
            encode_binary(buf, &will.payload)?;
        }

        if let Some(ref username) = self.username {
            encode_string(buf, username)?;
        }
        if let Some(ref password) = self.password {
            encode_binary(buf, password)?;
        }

        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        _version: ProtocolVersion,
    ) -> Result<Self> {
        let protocol_name = decode_string(buf)?;
        if protocol_name != PROTOCOL_NAME {
            return Err(MqttError::ProtocolError(format!(
                "invalid protocol name: {protocol_name}"
            )));
        }

        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "missing protocol level".to_string(),
            ));
        }
        let version = ProtocolVersion::from_wire_byte(buf.get_u8())?;

        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "missing connect flags".to_string(),
            ));
        }
        let flags_byte = buf.get_u8();
        let flags = ConnectFlags::decompose(flags_byte);
        if flags.contains(&ConnectFlags::Reserved) {
            return Err(MqttError::MalformedPacket(
                "CONNECT reserved flag bit set".to_string(),
            ));
        }

        if buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket("missing keep alive".to_string()));
        }
        let keep_alive = buf.get_u16();

        let properties = if version.is_v5() {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let client_id = decode_string(buf)?;

        let (will, will_properties) = if flags.contains(&ConnectFlags::WillFlag) {
            let will_properties = if version.is_v5() {
                Properties::decode(buf)?
            } else {
                Properties::default()
            };
            let topic = decode_string(buf)?;
            let payload = decode_binary(buf)?.to_vec();
            let will = WillMessage {
                topic,
                payload,
                qos: QoS::try_from_u8(ConnectFlags::extract_will_qos(flags_byte))?,
                retain: flags.contains(&ConnectFlags::WillRetain),
                properties: WillProperties::default(),
            };
            (Some(will), will_properties)
        } else {
            if ConnectFlags::extract_will_qos(flags_byte) != 0
                || flags.contains(&ConnectFlags::WillRetain)
            {
                return Err(MqttError::ProtocolError(
                    "will QoS/retain set without will flag".to_string(),
                ));
            }
            (None, Properties::default())
        };

        let username = flags
            .contains(&ConnectFlags::UsernameFlag)
            .then(|| decode_string(buf))
            .transpose()?;
        let password = flags
            .contains(&ConnectFlags::PasswordFlag)
            .then(|| decode_binary(buf))
            .transpose()?
            .map(|b| b.to_vec());

        Ok(Self {
            version,
            clean_session: flags.contains(&ConnectFlags::CleanSession),
            keep_alive,
            client_id,
            username,
            password,
            will,
            properties,
            will_properties,
        })
    }
}
