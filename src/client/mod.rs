//! Public client API.
//!
//! [`MqttClient`] is a cheap-to-clone handle around the shared connection
//! engine. All operations are direct async methods; only the packet read
//! loop and the keep-alive pinger run as background tasks.

mod events;
mod inner;
pub(crate) mod reconnect;

pub use self::events::{ConnectionEvent, DisconnectReason};
pub use self::reconnect::ReconnectOptions;

use crate::constants::defaults;
use crate::error::Result;
use crate::packet::suback::SubAckReasonCode;
use crate::packet::subscribe::SubscriptionOptions;
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::{ReasonCode, NORMAL_DISCONNECTION};
use crate::types::{ClientOptions, ConnectResult, Message, PublishOptions, PublishResult};
use self::inner::ClientInner;
use std::sync::Arc;
use std::time::Duration;

/// Client connection lifecycle.
///
/// `Connected` is the only state in which publish, subscribe and
/// unsubscribe are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Waiting between automatic reconnect attempts.
    Reconnecting,
}

/// MQTT 3.1.1 / 5.0 client.
///
/// ```rust,no_run
/// use mqtt_duo::{ClientOptions, MqttClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = MqttClient::new(ClientOptions::new("demo").with_host("localhost"));
/// client.connect().await?;
/// client.subscribe_one("greetings/#", Default::default()).await?;
/// client.publish("greetings/hello", b"hi").await?;
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MqttClient {
    inner: Arc<ClientInner>,
}

impl MqttClient {
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self {
            inner: Arc::new(ClientInner::new(options)),
        }
    }

    /// The options this client was built with.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// The effective client identifier (the broker-assigned one after a v5
    /// CONNACK carried an assigned-client-identifier).
    #[must_use]
    pub fn client_id(&self) -> String {
        self.inner.client_id()
    }

    /// Outstanding QoS 1/2 publishes counted against the receive maximum.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight()
    }

    /// Current subscription registry as (filter, granted QoS) pairs, in
    /// subscription order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(String, crate::QoS)> {
        self.inner.subscriptions()
    }

    /// Connects to the configured broker: transport connect, CONNECT /
    /// CONNACK handshake, session restoration, background task start.
    ///
    /// # Errors
    ///
    /// `ConnectionRefused` when the broker rejects the handshake, `Io` /
    /// `Timeout` for transport trouble, `AlreadyConnected` when called
    /// twice.
    pub async fn connect(&self) -> Result<ConnectResult> {
        self.inner.connect().await
    }

    /// Publishes with default options (QoS 0, no retain).
    ///
    /// # Errors
    ///
    /// See [`publish_with_options`](Self::publish_with_options).
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<PublishResult> {
        self.publish_with_options(topic, payload, PublishOptions::default())
            .await
    }

    /// Publishes a message. For QoS 1/2 the returned packet id correlates
    /// the asynchronous broker acknowledgement; the call itself returns
    /// once the bytes are written.
    ///
    /// # Errors
    ///
    /// `NotConnected` outside the connected state, `FlowControlTimeout`
    /// when no in-flight slot opens within the default admission wait,
    /// `NoPacketIdsAvailable` on id exhaustion, `PacketTooLarge` when the
    /// encoded packet exceeds the broker's maximum-packet-size.
    pub async fn publish_with_options(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<PublishResult> {
        self.inner
            .publish(topic, payload, &options, defaults::FLOW_ADMISSION_TIMEOUT)
            .await
    }

    /// Like [`publish_with_options`](Self::publish_with_options) with a
    /// caller-chosen flow-control admission timeout.
    ///
    /// # Errors
    ///
    /// See [`publish_with_options`](Self::publish_with_options).
    pub async fn publish_with_timeout(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
        admission_timeout: Duration,
    ) -> Result<PublishResult> {
        self.inner
            .publish(topic, payload, &options, admission_timeout)
            .await
    }

    /// Subscribes to a batch of filters; returns the broker's per-filter
    /// reason codes in order.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `InvalidTopicFilter`, or `Timeout` when the SUBACK
    /// does not arrive.
    pub async fn subscribe(
        &self,
        filters: Vec<(String, SubscriptionOptions)>,
    ) -> Result<Vec<SubAckReasonCode>> {
        self.inner.subscribe(filters).await
    }

    /// Subscribes to a single filter.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub async fn subscribe_one(
        &self,
        filter: impl Into<String>,
        options: SubscriptionOptions,
    ) -> Result<SubAckReasonCode> {
        let codes = self.subscribe(vec![(filter.into(), options)]).await?;
        codes
            .into_iter()
            .next()
            .ok_or_else(|| crate::MqttError::ProtocolError("empty SUBACK".to_string()))
    }

    /// Unsubscribes from a batch of filters; returns per-filter reason
    /// codes (synthesized as success under 3.1.1, which has none on the
    /// wire).
    ///
    /// # Errors
    ///
    /// `NotConnected` or `Timeout` when the UNSUBACK does not arrive.
    pub async fn unsubscribe(&self, filters: Vec<String>) -> Result<Vec<ReasonCode>> {
        self.inner.unsubscribe(filters).await
    }

    /// Gracefully disconnects: session state is saved, a DISCONNECT is
    /// written, the transport is closed.
    ///
    /// # Errors
    ///
    /// `NotConnected` when there is no connection to close.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner
            .disconnect(NORMAL_DISCONNECTION, Properties::default())
            .await
    }

    /// Disconnects with an explicit v5 reason code and properties (both
    /// ignored on the 3.1.1 wire).
    ///
    /// # Errors
    ///
    /// `NotConnected` when there is no connection to close.
    pub async fn disconnect_with(
        &self,
        reason_code: ReasonCode,
        properties: Properties,
    ) -> Result<()> {
        self.inner.disconnect(reason_code, properties).await
    }

    /// Installs the application message handler. Registration only; the
    /// handler runs on the read loop, in broker delivery order.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.inner.callbacks.set_message_handler(Arc::new(handler));
    }

    /// Registers a connection event observer (connects, disconnects,
    /// reconnect attempts, server DISCONNECTs).
    pub fn on_connection_event<F>(&self, observer: F)
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.callbacks.add_event_observer(Arc::new(observer));
    }

    /// Waits up to `wait` for the next inbound message. Only meaningful
    /// when no [`on_message`](Self::on_message) handler is installed;
    /// returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// `NotConnected` when called while disconnected, or when a disconnect
    /// aborts the wait.
    pub async fn await_message(&self, wait: Duration) -> Result<Option<Message>> {
        self.inner.await_message(wait).await
    }

    /// Installs `handler` and parks until the connection ends, polling at
    /// `idle` granularity.
    ///
    /// # Errors
    ///
    /// Propagates the connection-terminating error, if any.
    pub async fn run<F>(&self, handler: F, idle: Duration) -> Result<()>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.on_message(handler);
        let idle = idle.max(Duration::from_millis(10));
        loop {
            match self.state() {
                ConnectionState::Disconnected => {
                    return match self.inner.take_last_error() {
                        Some(error) => Err(error),
                        None => Ok(()),
                    };
                }
                _ => tokio::time::sleep(idle).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_client_is_disconnected() {
        let client = MqttClient::new(ClientOptions::new("fresh"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.client_id(), "fresh");
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn api_rejects_when_disconnected() {
        let client = MqttClient::new(ClientOptions::new("d"));
        assert!(client.publish("t", b"x").await.is_err());
        assert!(client.unsubscribe(vec!["t".to_string()]).await.is_err());
        assert!(client.disconnect().await.is_err());
    }

    #[test]
    fn clones_share_state() {
        let client = MqttClient::new(ClientOptions::new("shared"));
        let other = client.clone();
        client.on_message(|_| {});
        // Both handles see the handler through the shared inner.
        assert!(other.inner.callbacks.has_message_handler());
    }
}
