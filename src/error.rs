use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

/// Error taxonomy for the client.
///
/// Decode failures are `MalformedPacket`; packets that decode but are
/// semantically illegal are `ProtocolError`. Transport failures surface as
/// `Io`, refused handshakes as `ConnectionRefused`, and a v5 DISCONNECT from
/// the broker as `ServerDisconnected` carrying its reason code and
/// properties.
#[derive(Error, Debug, Clone)]
pub enum MqttError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("connection refused: {0:?}")]
    ConnectionRefused(ReasonCode),

    #[error("server disconnected: {reason_code:?}")]
    ServerDisconnected {
        reason_code: ReasonCode,
        properties: Properties,
    },

    #[error("operation timed out: {0}")]
    Timeout(&'static str),

    #[error("flow control admission timed out")]
    FlowControlTimeout,

    #[error("keep alive timeout")]
    KeepAliveTimeout,

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("no packet identifiers available")]
    NoPacketIdsAvailable,

    #[error("session store error: {0}")]
    SessionStoreError(String),

    #[error("packet too large: size {size} exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("invalid property identifier: {0}")]
    InvalidPropertyId(u8),

    #[error("duplicate property identifier: {0}")]
    DuplicatePropertyId(u8),

    #[error("invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("topic alias invalid: {0}")]
    TopicAliasInvalid(u16),

    #[error("unsupported protocol version")]
    UnsupportedProtocolVersion,
}

impl MqttError {
    /// Whether the reconnect loop should run after a connection terminated
    /// with this error. A clean server disconnect (reason 0x00) and local
    /// protocol violations do not trigger reconnection.
    #[must_use]
    pub fn triggers_reconnect(&self) -> bool {
        match self {
            MqttError::Io(_) | MqttError::KeepAliveTimeout => true,
            MqttError::ServerDisconnected { reason_code, .. } => reason_code.is_error(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = MqttError::PacketTooLarge {
            size: 1000,
            max: 500,
        };
        assert_eq!(
            err.to_string(),
            "packet too large: size 1000 exceeds maximum 500"
        );

        let err = MqttError::ConnectionRefused(ReasonCode::BadUsernameOrPassword);
        assert_eq!(err.to_string(), "connection refused: BadUsernameOrPassword");

        let err = MqttError::Timeout("suback");
        assert_eq!(err.to_string(), "operation timed out: suback");
    }

    #[test]
    fn io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        let err: MqttError = io_err.into();
        match err {
            MqttError::Io(msg) => assert!(msg.contains("nope")),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn reconnect_classification() {
        assert!(MqttError::Io("reset".into()).triggers_reconnect());
        assert!(MqttError::KeepAliveTimeout.triggers_reconnect());
        assert!(MqttError::ServerDisconnected {
            reason_code: ReasonCode::SessionTakenOver,
            properties: Properties::default(),
        }
        .triggers_reconnect());
        assert!(!MqttError::ServerDisconnected {
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        }
        .triggers_reconnect());
        assert!(!MqttError::ProtocolError("bad".into()).triggers_reconnect());
    }
}
