pub mod v5;

use crate::error::{MqttError, Result};

/// Wire protocol level negotiated with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// MQTT 3.1.1 (protocol level 4).
    V311,
    /// MQTT 5.0 (protocol level 5).
    #[default]
    V5,
}

impl ProtocolVersion {
    /// Protocol level byte carried in the CONNECT variable header.
    #[must_use]
    pub fn wire_byte(self) -> u8 {
        match self {
            ProtocolVersion::V311 => 4,
            ProtocolVersion::V5 => 5,
        }
    }

    /// Parses a CONNECT protocol level byte.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedProtocolVersion` for anything but levels 4 and 5.
    pub fn from_wire_byte(byte: u8) -> Result<Self> {
        match byte {
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            _ => Err(MqttError::UnsupportedProtocolVersion),
        }
    }

    /// Whether packets carry v5 property sections.
    #[must_use]
    pub fn is_v5(self) -> bool {
        matches!(self, ProtocolVersion::V5)
    }
}
