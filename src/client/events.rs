use crate::error::MqttError;
use crate::packet::disconnect::DisconnectPacket;

/// Typed events delivered to connection observers, synchronously and in
/// packet-arrival order.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// CONNACK accepted the handshake.
    Connected { session_present: bool },
    /// The connection ended.
    Disconnected { reason: DisconnectReason },
    /// A reconnect attempt is about to run.
    Reconnecting { attempt: u32 },
    /// A reconnect attempt failed (another may follow).
    ReconnectFailed { error: MqttError },
    /// The broker sent a v5 DISCONNECT.
    ServerDisconnect {
        packet: DisconnectPacket,
        /// Whether the reconnect loop will run for this disconnect.
        will_reconnect: bool,
    },
}

/// Why a connection ended.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// The application called `disconnect`.
    ClientInitiated,
    /// The broker closed the connection (including v5 DISCONNECT 0x00).
    ServerClosed,
    NetworkError(String),
    ProtocolError(String),
    /// No inbound traffic within 1.5x the keep-alive interval.
    KeepAliveTimeout,
}

impl DisconnectReason {
    /// Classifies a terminal connection error.
    #[must_use]
    pub fn from_error(error: &MqttError) -> Self {
        match error {
            MqttError::KeepAliveTimeout => Self::KeepAliveTimeout,
            MqttError::Io(msg) => Self::NetworkError(msg.clone()),
            MqttError::ServerDisconnected { reason_code, .. } if reason_code.is_success() => {
                Self::ServerClosed
            }
            MqttError::ServerDisconnected { reason_code, .. } => {
                Self::ProtocolError(format!("server disconnect: {reason_code:?}"))
            }
            other => Self::ProtocolError(other.to_string()),
        }
    }
}
