//! # Dual-version MQTT client library
//!
//! An MQTT client supporting both protocol 3.1.1 and 5.0 over a pluggable
//! byte-stream transport (plain TCP or TLS). The client establishes a session
//! with a broker, publishes at QoS 0/1/2 under receive-maximum flow control,
//! maintains subscriptions, dispatches inbound messages to an application
//! handler, and covers the MQTT 5.0 feature set: session expiry, topic
//! aliases, shared subscriptions, reason-coded server disconnects, and
//! user properties.
//!
//! The API is direct async - operations are plain `async fn`s on
//! [`MqttClient`], with only two background tasks per connection (the packet
//! read loop and the keep-alive pinger).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mqtt_duo::{ClientOptions, MqttClient, PublishOptions, QoS};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ClientOptions::new("weather-station")
//!         .with_host("test.mosquitto.org")
//!         .with_clean_session(false)
//!         .with_automatic_reconnect(true);
//!
//!     let client = MqttClient::new(options);
//!     client.connect().await?;
//!
//!     client.on_message(|msg| {
//!         println!("{}: {}", msg.topic, String::from_utf8_lossy(&msg.payload));
//!     });
//!     client.subscribe_one("sensors/+/temperature", Default::default()).await?;
//!
//!     let mut opts = PublishOptions::default();
//!     opts.qos = QoS::AtLeastOnce;
//!     client.publish_with_options("sensors/local/temperature", b"22.5", opts).await?;
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod callback;
pub mod client;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod flags;
pub mod packet;
pub mod packet_id;
pub mod protocol;
pub mod session;
pub mod topic_matching;
pub mod transport;
pub mod types;

pub use client::{ConnectionEvent, ConnectionState, DisconnectReason, MqttClient};
pub use error::{MqttError, Result};
pub use packet::publish::PublishPacket;
pub use packet::subscribe::{RetainHandling, SubscriptionOptions};
pub use packet::{FixedHeader, Packet, PacketType};
pub use protocol::v5::properties::{Properties, PropertyId, PropertyValue};
pub use protocol::v5::reason_codes::ReasonCode;
pub use protocol::ProtocolVersion;
pub use session::store::{FileSessionStore, SessionSnapshot, SessionStore};
pub use types::{
    ClientOptions, ConnectProperties, ConnectResult, Message, MessageProperties, PublishOptions,
    PublishProperties, PublishResult, ReconnectOptions, TlsOptions, WillMessage, WillProperties,
};

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    /// Converts a wire value, rejecting the reserved value 3.
    ///
    /// # Errors
    ///
    /// Returns `MqttError::InvalidQoS` for values above 2.
    pub fn try_from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(MqttError::InvalidQoS(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}
