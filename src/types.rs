use crate::constants::defaults;
use crate::packet::publish::PublishPacket;
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use crate::session::store::SessionStore;
use crate::QoS;
use std::sync::Arc;
use std::time::Duration;

pub use crate::client::reconnect::ReconnectOptions;

/// Result of a publish operation.
///
/// ```
/// use mqtt_duo::PublishResult;
///
/// let result = PublishResult::QoS1Or2 { packet_id: 42 };
/// assert_eq!(result.packet_id(), Some(42));
/// assert_eq!(PublishResult::QoS0.packet_id(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResult {
    /// QoS 0 publish written; no packet id exists.
    QoS0,
    /// QoS 1/2 publish written; the broker's acknowledgement will carry this
    /// packet id.
    QoS1Or2 { packet_id: u16 },
}

impl PublishResult {
    #[must_use]
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Self::QoS0 => None,
            Self::QoS1Or2 { packet_id } => Some(*packet_id),
        }
    }
}

/// Result of the CONNECT / CONNACK handshake.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    /// Whether the broker resumed a previous session.
    pub session_present: bool,
    /// CONNACK reason code (0x00 on success; a 3.1.1 return code is mapped
    /// onto the same enum).
    pub reason_code: ReasonCode,
    /// CONNACK properties (empty under 3.1.1).
    pub properties: Properties,
}

/// TLS settings handed to the transport; the handshake itself is entirely
/// inside the transport implementation.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Server name for SNI and certificate validation; defaults to the host.
    pub server_name: Option<String>,
    /// Additional trust anchors as DER certificates, appended to the webpki
    /// roots.
    pub extra_root_certs_der: Vec<Vec<u8>>,
}

/// Immutable client configuration.
///
/// Built with fluent `with_*` derivations, each consuming the value and
/// returning the updated one:
///
/// ```
/// use mqtt_duo::{ClientOptions, ProtocolVersion};
/// use std::time::Duration;
///
/// let options = ClientOptions::new("meter-7")
///     .with_host("broker.example.com")
///     .with_port(1883)
///     .with_protocol_version(ProtocolVersion::V311)
///     .with_keep_alive(Duration::from_secs(30))
///     .with_clean_session(false)
///     .with_automatic_reconnect(true);
/// assert_eq!(options.port, 1883);
/// ```
#[derive(Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub protocol_version: ProtocolVersion,
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    /// `Some` switches the transport to TLS.
    pub tls: Option<TlsOptions>,
    pub will: Option<WillMessage>,
    /// v5 session-expiry-interval; `None` omits the property.
    pub session_expiry_interval: Option<u32>,
    pub reconnect: ReconnectOptions,
    /// Outbound topic-alias maximum; 0 disables aliasing. The same value is
    /// advertised to the broker for inbound aliases.
    pub topic_alias_maximum: u16,
    /// Receive maximum advertised in CONNECT and used for outbound flow
    /// control until CONNACK overrides it (1..=65535).
    pub receive_maximum: u16,
    /// Client-side delivery filters; when non-empty an inbound PUBLISH is
    /// handed to the application only if its (alias-resolved) topic matches
    /// one of these patterns.
    pub message_filters: Vec<String>,
    /// Further v5 CONNECT properties.
    pub connect_properties: ConnectProperties,
    pub connect_timeout: Duration,
    pub session_store: Option<Arc<dyn SessionStore>>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol_version", &self.protocol_version)
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .field("username", &self.username)
            .field("tls", &self.tls.is_some())
            .field("will", &self.will)
            .field("session_expiry_interval", &self.session_expiry_interval)
            .field("reconnect", &self.reconnect)
            .field("topic_alias_maximum", &self.topic_alias_maximum)
            .field("receive_maximum", &self.receive_maximum)
            .field("message_filters", &self.message_filters)
            .field("session_store", &self.session_store.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientOptions {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            protocol_version: ProtocolVersion::V5,
            client_id: client_id.into(),
            keep_alive: defaults::KEEP_ALIVE,
            clean_session: true,
            username: None,
            password: None,
            tls: None,
            will: None,
            session_expiry_interval: None,
            reconnect: ReconnectOptions::default(),
            topic_alias_maximum: 0,
            receive_maximum: defaults::RECEIVE_MAXIMUM,
            message_filters: Vec::new(),
            connect_properties: ConnectProperties::default(),
            connect_timeout: defaults::CONNECT_TIMEOUT,
            session_store: None,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: WillMessage) -> Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn with_session_expiry_interval(mut self, seconds: u32) -> Self {
        self.session_expiry_interval = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_automatic_reconnect(mut self, enabled: bool) -> Self {
        self.reconnect.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_reconnect_options(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_topic_alias_maximum(mut self, maximum: u16) -> Self {
        self.topic_alias_maximum = maximum;
        self
    }

    /// Clamps 0 to 1; the protocol reserves receive-maximum 0.
    #[must_use]
    pub fn with_receive_maximum(mut self, maximum: u16) -> Self {
        self.receive_maximum = maximum.max(1);
        self
    }

    #[must_use]
    pub fn with_message_filters(mut self, filters: Vec<String>) -> Self {
        self.message_filters = filters;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }
}

/// v5 CONNECT properties beyond the ones with dedicated options fields.
#[derive(Debug, Clone, Default)]
pub struct ConnectProperties {
    pub maximum_packet_size: Option<u32>,
    pub request_response_information: Option<bool>,
    pub request_problem_information: Option<bool>,
    pub user_properties: Vec<(String, String)>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Vec<u8>>,
}

/// Message the broker publishes on the client's behalf if the connection
/// terminates abnormally.
#[derive(Debug, Clone)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub properties: WillProperties,
}

impl WillMessage {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            properties: WillProperties::default(),
        }
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct WillProperties {
    pub will_delay_interval: Option<u32>,
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub user_properties: Vec<(String, String)>,
}

impl From<&WillProperties> for Properties {
    fn from(will: &WillProperties) -> Self {
        let mut properties = Properties::default();
        if let Some(delay) = will.will_delay_interval {
            properties.set_will_delay_interval(delay);
        }
        if let Some(format) = will.payload_format_indicator {
            properties.set_payload_format_indicator(format);
        }
        if let Some(expiry) = will.message_expiry_interval {
            properties.set_message_expiry_interval(expiry);
        }
        if let Some(ref content_type) = will.content_type {
            properties.set_content_type(content_type.clone());
        }
        if let Some(ref topic) = will.response_topic {
            properties.set_response_topic(topic.clone());
        }
        if let Some(ref data) = will.correlation_data {
            properties.set_correlation_data(data.clone().into());
        }
        for (key, value) in &will.user_properties {
            properties.add_user_property(key.clone(), value.clone());
        }
        properties
    }
}

/// Options for a single publish.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
    pub properties: PublishProperties,
}

/// v5 PUBLISH properties settable by the application.
#[derive(Debug, Clone, Default)]
pub struct PublishProperties {
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    /// Explicit topic alias. Setting this together with an empty topic name
    /// publishes by alias alone (the caller owns the alias agreement).
    pub topic_alias: Option<u16>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl From<&PublishProperties> for Properties {
    fn from(props: &PublishProperties) -> Self {
        let mut properties = Properties::default();
        if let Some(format) = props.payload_format_indicator {
            properties.set_payload_format_indicator(format);
        }
        if let Some(alias) = props.topic_alias {
            properties.set_topic_alias(alias);
        }
        if let Some(expiry) = props.message_expiry_interval {
            properties.set_message_expiry_interval(expiry);
        }
        if let Some(ref topic) = props.response_topic {
            properties.set_response_topic(topic.clone());
        }
        if let Some(ref data) = props.correlation_data {
            properties.set_correlation_data(data.clone().into());
        }
        if let Some(ref content_type) = props.content_type {
            properties.set_content_type(content_type.clone());
        }
        for (key, value) in &props.user_properties {
            properties.add_user_property(key.clone(), value.clone());
        }
        properties
    }
}

/// An application message received from a subscription.
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic the message was published on, after alias resolution.
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub properties: MessageProperties,
}

/// Inbound message metadata extracted from the v5 property section.
#[derive(Debug, Clone, Default)]
pub struct MessageProperties {
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub user_properties: Vec<(String, String)>,
    pub subscription_identifiers: Vec<u32>,
}

impl From<&Properties> for MessageProperties {
    fn from(props: &Properties) -> Self {
        use crate::protocol::v5::properties::{PropertyId, PropertyValue};

        let mut result = Self::default();
        for (id, value) in props.iter() {
            match (id, value) {
                (PropertyId::PayloadFormatIndicator, PropertyValue::Byte(v)) => {
                    result.payload_format_indicator = Some(*v != 0);
                }
                (PropertyId::MessageExpiryInterval, PropertyValue::FourByteInteger(v)) => {
                    result.message_expiry_interval = Some(*v);
                }
                (PropertyId::ResponseTopic, PropertyValue::Utf8String(v)) => {
                    result.response_topic = Some(v.clone());
                }
                (PropertyId::CorrelationData, PropertyValue::BinaryData(v)) => {
                    result.correlation_data = Some(v.to_vec());
                }
                (PropertyId::ContentType, PropertyValue::Utf8String(v)) => {
                    result.content_type = Some(v.clone());
                }
                (PropertyId::UserProperty, PropertyValue::Utf8StringPair(k, v)) => {
                    result.user_properties.push((k.clone(), v.clone()));
                }
                (PropertyId::SubscriptionIdentifier, PropertyValue::VariableByteInteger(v)) => {
                    result.subscription_identifiers.push(*v);
                }
                _ => {}
            }
        }
        result
    }
}

impl Message {
    /// Builds a message from a PUBLISH whose topic has already been resolved
    /// through the inbound alias map.
    #[must_use]
    pub fn from_publish(resolved_topic: String, packet: &PublishPacket) -> Self {
        Self {
            topic: resolved_topic,
            payload: packet.payload.clone(),
            qos: packet.qos,
            retain: packet.retain,
            dup: packet.dup,
            properties: MessageProperties::from(&packet.properties),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_derivations_do_not_mutate_source() {
        let base = ClientOptions::new("c1");
        let derived = base.clone().with_port(8883).with_clean_session(false);
        assert_eq!(base.port, 1883);
        assert!(base.clean_session);
        assert_eq!(derived.port, 8883);
        assert!(!derived.clean_session);
    }

    #[test]
    fn receive_maximum_zero_is_clamped() {
        let options = ClientOptions::new("c").with_receive_maximum(0);
        assert_eq!(options.receive_maximum, 1);
    }

    #[test]
    fn will_properties_mapping() {
        let props = WillProperties {
            will_delay_interval: Some(5),
            content_type: Some("text/plain".to_string()),
            user_properties: vec![("a".to_string(), "b".to_string())],
            ..Default::default()
        };
        let mapped = Properties::from(&props);
        assert_eq!(mapped.user_properties().len(), 1);
        assert!(mapped.contains(crate::protocol::v5::properties::PropertyId::WillDelayInterval));
    }

    #[test]
    fn message_from_publish_resolves_topic() {
        let packet = PublishPacket::new("", b"22.5", QoS::AtMostOnce).with_topic_alias(2);
        let message = Message::from_publish("sensors/t".to_string(), &packet);
        assert_eq!(message.topic, "sensors/t");
        assert_eq!(message.payload, b"22.5");
    }
}
