use crate::encoding::{
    binary_len, decode_binary, decode_string, decode_variable_int, encode_binary, encode_string,
    encode_variable_int, string_len, variable_int_len,
};
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, Bytes};
use std::collections::HashMap;

/// MQTT 5.0 property identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

impl PropertyId {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::PayloadFormatIndicator),
            0x02 => Some(Self::MessageExpiryInterval),
            0x03 => Some(Self::ContentType),
            0x08 => Some(Self::ResponseTopic),
            0x09 => Some(Self::CorrelationData),
            0x0B => Some(Self::SubscriptionIdentifier),
            0x11 => Some(Self::SessionExpiryInterval),
            0x12 => Some(Self::AssignedClientIdentifier),
            0x13 => Some(Self::ServerKeepAlive),
            0x15 => Some(Self::AuthenticationMethod),
            0x16 => Some(Self::AuthenticationData),
            0x17 => Some(Self::RequestProblemInformation),
            0x18 => Some(Self::WillDelayInterval),
            0x19 => Some(Self::RequestResponseInformation),
            0x1A => Some(Self::ResponseInformation),
            0x1C => Some(Self::ServerReference),
            0x1F => Some(Self::ReasonString),
            0x21 => Some(Self::ReceiveMaximum),
            0x22 => Some(Self::TopicAliasMaximum),
            0x23 => Some(Self::TopicAlias),
            0x24 => Some(Self::MaximumQoS),
            0x25 => Some(Self::RetainAvailable),
            0x26 => Some(Self::UserProperty),
            0x27 => Some(Self::MaximumPacketSize),
            0x28 => Some(Self::WildcardSubscriptionAvailable),
            0x29 => Some(Self::SubscriptionIdentifierAvailable),
            0x2A => Some(Self::SharedSubscriptionAvailable),
            _ => None,
        }
    }

    /// Whether the identifier may appear more than once in one packet.
    #[must_use]
    pub fn allows_multiple(self) -> bool {
        matches!(self, Self::UserProperty | Self::SubscriptionIdentifier)
    }

    /// Wire type of the value for this identifier.
    #[must_use]
    pub fn value_type(self) -> PropertyValueType {
        match self {
            Self::PayloadFormatIndicator
            | Self::RequestProblemInformation
            | Self::RequestResponseInformation
            | Self::MaximumQoS
            | Self::RetainAvailable
            | Self::WildcardSubscriptionAvailable
            | Self::SubscriptionIdentifierAvailable
            | Self::SharedSubscriptionAvailable => PropertyValueType::Byte,

            Self::ServerKeepAlive
            | Self::ReceiveMaximum
            | Self::TopicAliasMaximum
            | Self::TopicAlias => PropertyValueType::TwoByteInteger,

            Self::MessageExpiryInterval
            | Self::SessionExpiryInterval
            | Self::WillDelayInterval
            | Self::MaximumPacketSize => PropertyValueType::FourByteInteger,

            Self::SubscriptionIdentifier => PropertyValueType::VariableByteInteger,

            Self::ContentType
            | Self::ResponseTopic
            | Self::AssignedClientIdentifier
            | Self::AuthenticationMethod
            | Self::ResponseInformation
            | Self::ServerReference
            | Self::ReasonString => PropertyValueType::Utf8String,

            Self::CorrelationData | Self::AuthenticationData => PropertyValueType::BinaryData,

            Self::UserProperty => PropertyValueType::Utf8StringPair,
        }
    }
}

/// Wire types of property values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValueType {
    Byte,
    TwoByteInteger,
    FourByteInteger,
    VariableByteInteger,
    BinaryData,
    Utf8String,
    Utf8StringPair,
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    TwoByteInteger(u16),
    FourByteInteger(u32),
    VariableByteInteger(u32),
    BinaryData(Bytes),
    Utf8String(String),
    Utf8StringPair(String, String),
}

impl PropertyValue {
    #[must_use]
    pub fn value_type(&self) -> PropertyValueType {
        match self {
            Self::Byte(_) => PropertyValueType::Byte,
            Self::TwoByteInteger(_) => PropertyValueType::TwoByteInteger,
            Self::FourByteInteger(_) => PropertyValueType::FourByteInteger,
            Self::VariableByteInteger(_) => PropertyValueType::VariableByteInteger,
            Self::BinaryData(_) => PropertyValueType::BinaryData,
            Self::Utf8String(_) => PropertyValueType::Utf8String,
            Self::Utf8StringPair(_, _) => PropertyValueType::Utf8StringPair,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Byte(_) => 1,
            Self::TwoByteInteger(_) => 2,
            Self::FourByteInteger(_) => 4,
            Self::VariableByteInteger(v) => variable_int_len(*v),
            Self::BinaryData(v) => binary_len(v),
            Self::Utf8String(v) => string_len(v),
            Self::Utf8StringPair(k, v) => string_len(k) + string_len(v),
        }
    }
}

/// Container for an MQTT 5.0 property section.
///
/// Single-valued identifiers hold at most one entry; user properties (0x26)
/// keep their pair order and may repeat keys; subscription identifiers (0x0B)
/// may also repeat. Encoding writes identifiers in ascending order, so equal
/// property sets produce identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    properties: HashMap<PropertyId, Vec<PropertyValue>>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property value.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` on a value/identifier type mismatch and
    /// `DuplicatePropertyId` when a single-valued identifier repeats.
    pub fn add(&mut self, id: PropertyId, value: PropertyValue) -> Result<()> {
        if value.value_type() != id.value_type() {
            return Err(MqttError::ProtocolError(format!(
                "property {id:?} expects {:?}, got {:?}",
                id.value_type(),
                value.value_type()
            )));
        }
        if !id.allows_multiple() && self.properties.contains_key(&id) {
            return Err(MqttError::DuplicatePropertyId(id as u8));
        }
        self.properties.entry(id).or_default().push(value);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.properties.get(&id).and_then(|v| v.first())
    }

    #[must_use]
    pub fn get_all(&self, id: PropertyId) -> Option<&[PropertyValue]> {
        self.properties.get(&id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, id: PropertyId) -> bool {
        self.properties.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyValue)> + '_ {
        self.properties
            .iter()
            .flat_map(|(id, values)| values.iter().map(move |value| (*id, value)))
    }

    /// Encodes the property section: variable-byte-integer length then the
    /// identifier/value pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a value fails to encode.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut body = Vec::new();
        self.encode_values(&mut body)?;

        #[allow(clippy::cast_possible_truncation)]
        encode_variable_int(buf, body.len() as u32)?;
        buf.put_slice(&body);
        Ok(())
    }

    fn encode_values<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut sorted: Vec<_> = self.properties.iter().collect();
        sorted.sort_by_key(|(id, _)| **id as u8);

        for (id, values) in sorted {
            for value in values {
                encode_variable_int(buf, u32::from(*id as u8))?;
                match value {
                    PropertyValue::Byte(v) => buf.put_u8(*v),
                    PropertyValue::TwoByteInteger(v) => buf.put_u16(*v),
                    PropertyValue::FourByteInteger(v) => buf.put_u32(*v),
                    PropertyValue::VariableByteInteger(v) => encode_variable_int(buf, *v)?,
                    PropertyValue::BinaryData(v) => encode_binary(buf, v)?,
                    PropertyValue::Utf8String(v) => encode_string(buf, v)?,
                    PropertyValue::Utf8StringPair(k, v) => {
                        encode_string(buf, k)?;
                        encode_string(buf, v)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Decodes a property section.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPacket` on truncation, `InvalidPropertyId` for
    /// unknown identifiers, and `DuplicatePropertyId` for repeated
    /// single-valued identifiers.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let props_len = decode_variable_int(buf)? as usize;
        if buf.remaining() < props_len {
            return Err(MqttError::MalformedPacket(format!(
                "truncated property section: expected {props_len} bytes, got {}",
                buf.remaining()
            )));
        }

        let mut section = buf.copy_to_bytes(props_len);
        let mut properties = Self::new();

        while section.has_remaining() {
            let id_val = decode_variable_int(&mut section)?;
            let id_byte =
                u8::try_from(id_val).map_err(|_| MqttError::InvalidPropertyId(u8::MAX))?;
            let id = PropertyId::from_u8(id_byte).ok_or(MqttError::InvalidPropertyId(id_byte))?;

            let value = match id.value_type() {
                PropertyValueType::Byte => {
                    if !section.has_remaining() {
                        return Err(MqttError::MalformedPacket(
                            "truncated byte property".to_string(),
                        ));
                    }
                    PropertyValue::Byte(section.get_u8())
                }
                PropertyValueType::TwoByteInteger => {
                    if section.remaining() < 2 {
                        return Err(MqttError::MalformedPacket(
                            "truncated two-byte property".to_string(),
                        ));
                    }
                    PropertyValue::TwoByteInteger(section.get_u16())
                }
                PropertyValueType::FourByteInteger => {
                    if section.remaining() < 4 {
                        return Err(MqttError::MalformedPacket(
                            "truncated four-byte property".to_string(),
                        ));
                    }
                    PropertyValue::FourByteInteger(section.get_u32())
                }
                PropertyValueType::VariableByteInteger => {
                    PropertyValue::VariableByteInteger(decode_variable_int(&mut section)?)
                }
                PropertyValueType::BinaryData => {
                    PropertyValue::BinaryData(decode_binary(&mut section)?)
                }
                PropertyValueType::Utf8String => {
                    PropertyValue::Utf8String(decode_string(&mut section)?)
                }
                PropertyValueType::Utf8StringPair => {
                    let key = decode_string(&mut section)?;
                    let value = decode_string(&mut section)?;
                    PropertyValue::Utf8StringPair(key, value)
                }
            };

            properties.add(id, value)?;
        }

        Ok(properties)
    }

    /// Encoded length of the full property section (length prefix included).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let values_len: usize = self
            .iter()
            .map(|(id, value)| variable_int_len(u32::from(id as u8)) + value.encoded_len())
            .sum();
        #[allow(clippy::cast_possible_truncation)]
        let prefix = variable_int_len(values_len as u32);
        prefix + values_len
    }
}

/// Typed setters and getters for the identifiers the client works with.
impl Properties {
    pub fn set_session_expiry_interval(&mut self, seconds: u32) {
        let _ = self.add(
            PropertyId::SessionExpiryInterval,
            PropertyValue::FourByteInteger(seconds),
        );
    }

    pub fn set_receive_maximum(&mut self, max: u16) {
        let _ = self.add(
            PropertyId::ReceiveMaximum,
            PropertyValue::TwoByteInteger(max),
        );
    }

    pub fn set_topic_alias_maximum(&mut self, max: u16) {
        let _ = self.add(
            PropertyId::TopicAliasMaximum,
            PropertyValue::TwoByteInteger(max),
        );
    }

    pub fn set_topic_alias(&mut self, alias: u16) {
        let _ = self.add(PropertyId::TopicAlias, PropertyValue::TwoByteInteger(alias));
    }

    pub fn set_maximum_packet_size(&mut self, size: u32) {
        let _ = self.add(
            PropertyId::MaximumPacketSize,
            PropertyValue::FourByteInteger(size),
        );
    }

    pub fn set_message_expiry_interval(&mut self, seconds: u32) {
        let _ = self.add(
            PropertyId::MessageExpiryInterval,
            PropertyValue::FourByteInteger(seconds),
        );
    }

    pub fn set_payload_format_indicator(&mut self, is_utf8: bool) {
        let _ = self.add(
            PropertyId::PayloadFormatIndicator,
            PropertyValue::Byte(u8::from(is_utf8)),
        );
    }

    pub fn set_content_type(&mut self, content_type: String) {
        let _ = self.add(
            PropertyId::ContentType,
            PropertyValue::Utf8String(content_type),
        );
    }

    pub fn set_response_topic(&mut self, topic: String) {
        let _ = self.add(PropertyId::ResponseTopic, PropertyValue::Utf8String(topic));
    }

    pub fn set_correlation_data(&mut self, data: Bytes) {
        let _ = self.add(PropertyId::CorrelationData, PropertyValue::BinaryData(data));
    }

    pub fn set_subscription_identifier(&mut self, id: u32) {
        let _ = self.add(
            PropertyId::SubscriptionIdentifier,
            PropertyValue::VariableByteInteger(id),
        );
    }

    pub fn set_reason_string(&mut self, reason: String) {
        let _ = self.add(PropertyId::ReasonString, PropertyValue::Utf8String(reason));
    }

    pub fn set_will_delay_interval(&mut self, seconds: u32) {
        let _ = self.add(
            PropertyId::WillDelayInterval,
            PropertyValue::FourByteInteger(seconds),
        );
    }

    pub fn add_user_property(&mut self, key: String, value: String) {
        let _ = self.add(
            PropertyId::UserProperty,
            PropertyValue::Utf8StringPair(key, value),
        );
    }

    fn two_byte(&self, id: PropertyId) -> Option<u16> {
        match self.get(id) {
            Some(PropertyValue::TwoByteInteger(v)) => Some(*v),
            _ => None,
        }
    }

    fn four_byte(&self, id: PropertyId) -> Option<u32> {
        match self.get(id) {
            Some(PropertyValue::FourByteInteger(v)) => Some(*v),
            _ => None,
        }
    }

    fn string(&self, id: PropertyId) -> Option<&str> {
        match self.get(id) {
            Some(PropertyValue::Utf8String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        self.two_byte(PropertyId::TopicAlias)
    }

    #[must_use]
    pub fn topic_alias_maximum(&self) -> Option<u16> {
        self.two_byte(PropertyId::TopicAliasMaximum)
    }

    #[must_use]
    pub fn receive_maximum(&self) -> Option<u16> {
        self.two_byte(PropertyId::ReceiveMaximum)
    }

    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        self.two_byte(PropertyId::ServerKeepAlive)
    }

    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        self.four_byte(PropertyId::SessionExpiryInterval)
    }

    #[must_use]
    pub fn maximum_packet_size(&self) -> Option<u32> {
        self.four_byte(PropertyId::MaximumPacketSize)
    }

    #[must_use]
    pub fn message_expiry_interval(&self) -> Option<u32> {
        self.four_byte(PropertyId::MessageExpiryInterval)
    }

    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<&str> {
        self.string(PropertyId::AssignedClientIdentifier)
    }

    #[must_use]
    pub fn reason_string(&self) -> Option<&str> {
        self.string(PropertyId::ReasonString)
    }

    /// User properties in insertion order; duplicate keys preserved.
    #[must_use]
    pub fn user_properties(&self) -> Vec<(String, String)> {
        self.get_all(PropertyId::UserProperty)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| match v {
                        PropertyValue::Utf8StringPair(k, v) => Some((k.clone(), v.clone())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
