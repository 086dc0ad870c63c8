//! Connection engine: handshake, read loop, QoS state machines, keep-alive
//! and the reconnect loop.
//!
//! One `ClientInner` is shared between the public API, the packet read loop
//! and the keep-alive task. Mutable state lives behind per-field locks that
//! are never held across an await; the transport write half sits in an async
//! mutex so writes serialize in call order.

use crate::callback::CallbackRegistry;
use crate::client::events::{ConnectionEvent, DisconnectReason};
use crate::client::ConnectionState;
use crate::constants::defaults;
use crate::error::{MqttError, Result};
use crate::packet::connect::ConnectPacket;
use crate::packet::disconnect::DisconnectPacket;
use crate::packet::puback::PubAckPacket;
use crate::packet::pubcomp::PubCompPacket;
use crate::packet::publish::PublishPacket;
use crate::packet::pubrec::PubRecPacket;
use crate::packet::pubrel::PubRelPacket;
use crate::packet::suback::SubAckReasonCode;
use crate::packet::subscribe::{SubscribePacket, SubscriptionOptions, TopicFilter};
use crate::packet::unsubscribe::UnsubscribePacket;
use crate::packet::{MqttPacket as _, Packet};
use crate::packet_id::PacketIdAllocator;
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use crate::session::alias::TopicAliasManager;
use crate::session::flow_control::FlowControl;
use crate::session::state::SessionState;
use crate::session::subscription::SubscriptionEntry;
use crate::topic_matching;
use crate::transport::tcp::{TcpConfig, TcpTransport};
use crate::transport::tls::{TlsConfig, TlsTransport};
use crate::transport::{BoxedReader, BoxedWriter, PacketReader, PacketWriter, Transport, TransportType};
use crate::types::{ClientOptions, ConnectResult, Message, PublishOptions, PublishResult};
use crate::QoS;
use bytes::BytesMut;
use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at};
use tracing::{debug, error, info, trace, warn};

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write half of the transport plus the negotiated wire version.
///
/// Packets are fully encoded before a single `write_all`, so callers that
/// time out never leave a partial packet on the wire.
pub(crate) struct PacketSink {
    writer: BoxedWriter,
    version: ProtocolVersion,
    last_write: Instant,
}

impl PacketSink {
    fn new(writer: BoxedWriter, version: ProtocolVersion) -> Self {
        Self {
            writer,
            version,
            last_write: Instant::now(),
        }
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.writer.write_packet(packet, self.version).await?;
        self.last_write = Instant::now();
        Ok(())
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        self.last_write = Instant::now();
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Settings the CONNACK may override.
#[derive(Debug, Clone)]
struct Negotiated {
    keep_alive: Duration,
    maximum_packet_size: Option<u32>,
}

#[derive(Default)]
struct TaskHandles {
    reader: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

pub(crate) struct ClientInner {
    pub(crate) options: ClientOptions,
    pub(crate) callbacks: CallbackRegistry,
    state: RwLock<ConnectionState>,
    writer: AsyncMutex<Option<PacketSink>>,
    session: Mutex<SessionState>,
    allocator: PacketIdAllocator,
    flow: FlowControl,
    outbound_aliases: Mutex<TopicAliasManager>,
    inbound_aliases: Mutex<TopicAliasManager>,
    pending_subacks: Mutex<HashMap<u16, oneshot::Sender<Vec<SubAckReasonCode>>>>,
    pending_unsubacks: Mutex<HashMap<u16, oneshot::Sender<Vec<ReasonCode>>>>,
    inbound_queue: Mutex<VecDeque<Message>>,
    inbound_notify: Notify,
    inbound_open: AtomicBool,
    negotiated: Mutex<Negotiated>,
    last_error: Mutex<Option<MqttError>>,
    tasks: Mutex<TaskHandles>,
    closed_by_user: AtomicBool,
}

impl ClientInner {
    pub(crate) fn new(options: ClientOptions) -> Self {
        let negotiated = Negotiated {
            keep_alive: options.keep_alive,
            maximum_packet_size: None,
        };
        Self {
            session: Mutex::new(SessionState::new(options.client_id.clone())),
            writer: AsyncMutex::new(None),
            allocator: PacketIdAllocator::new(),
            flow: FlowControl::new(options.receive_maximum),
            outbound_aliases: Mutex::new(TopicAliasManager::new(0)),
            inbound_aliases: Mutex::new(TopicAliasManager::new(0)),
            callbacks: CallbackRegistry::new(),
            pending_subacks: Mutex::new(HashMap::new()),
            pending_unsubacks: Mutex::new(HashMap::new()),
            inbound_queue: Mutex::new(VecDeque::new()),
            inbound_notify: Notify::new(),
            inbound_open: AtomicBool::new(false),
            negotiated: Mutex::new(negotiated),
            last_error: Mutex::new(None),
            tasks: Mutex::new(TaskHandles::default()),
            closed_by_user: AtomicBool::new(false),
            state: RwLock::new(ConnectionState::Disconnected),
            options,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub(crate) fn client_id(&self) -> String {
        lock(&self.session).client_id().to_string()
    }

    pub(crate) fn take_last_error(&self) -> Option<MqttError> {
        lock(&self.last_error).take()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.flow.in_flight()
    }

    pub(crate) fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.session)
            .subscriptions()
            .iter()
            .map(|(filter, entry)| (filter.to_string(), entry.qos))
            .collect()
    }

    fn version(&self) -> ProtocolVersion {
        self.options.protocol_version
    }

    fn negotiated_keep_alive(&self) -> Duration {
        lock(&self.negotiated).keep_alive
    }

    fn maximum_packet_size(&self) -> Option<u32> {
        lock(&self.negotiated).maximum_packet_size
    }

    // Connect --------------------------------------------------------------

    pub(crate) async fn connect(self: &Arc<Self>) -> Result<ConnectResult> {
        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting => return Err(MqttError::AlreadyConnected),
            ConnectionState::Disconnecting => return Err(MqttError::AlreadyConnected),
        }
        self.closed_by_user.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        match self.establish().await {
            Ok(result) => Ok(result),
            Err(error) => {
                self.set_state(ConnectionState::Disconnected);
                Err(error)
            }
        }
    }

    /// Runs the transport connect and MQTT handshake, restores session
    /// state, spawns the background tasks and replays pending QoS 2 state.
    /// Shared between `connect` and the reconnect loop.
    async fn establish(self: &Arc<Self>) -> Result<ConnectResult> {
        let version = self.version();
        let mut transport = self.build_transport();
        transport.connect().await?;
        let (mut reader, writer) = transport.into_duplex()?;

        let mut sink = PacketSink::new(writer, version);
        let connect_packet = self.build_connect_packet();
        sink.send(&Packet::Connect(Box::new(connect_packet))).await?;

        let packet = timeout(self.options.connect_timeout, reader.read_packet(version))
            .await
            .map_err(|_| MqttError::Timeout("connack"))??;
        let Packet::ConnAck(connack) = packet else {
            return Err(MqttError::ProtocolError(format!(
                "expected CONNACK, got {:?}",
                packet.packet_type()
            )));
        };

        if connack.reason_code.is_error() {
            return Err(MqttError::ConnectionRefused(connack.reason_code));
        }

        self.apply_connack_overrides(&connack.properties);

        let session_present = connack.session_present;
        let resumed = self.prepare_session(session_present);

        {
            let mut writer = self.writer.lock().await;
            if let Some(mut stale) = writer.replace(sink) {
                stale.shutdown().await;
            }
        }

        self.inbound_open.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        *lock(&self.last_error) = None;

        self.spawn_tasks(reader);
        info!(
            client_id = %self.client_id(),
            session_present,
            "connected to {}:{}",
            self.options.host,
            self.options.port
        );
        self.callbacks
            .emit_event(&ConnectionEvent::Connected { session_present });

        if resumed {
            self.replay_session_state().await;
        }

        Ok(ConnectResult {
            session_present,
            reason_code: connack.reason_code,
            properties: connack.properties,
        })
    }

    fn build_transport(&self) -> TransportType {
        match &self.options.tls {
            Some(tls) => {
                let mut config = TlsConfig::new(self.options.host.clone(), self.options.port)
                    .with_connect_timeout(self.options.connect_timeout);
                if let Some(ref name) = tls.server_name {
                    config = config.with_server_name(name.clone());
                }
                for cert in &tls.extra_root_certs_der {
                    config = config.with_extra_root_cert_der(cert.clone());
                }
                TransportType::Tls(Box::new(TlsTransport::new(config)))
            }
            None => TransportType::Tcp(TcpTransport::new(
                TcpConfig::new(self.options.host.clone(), self.options.port)
                    .with_connect_timeout(self.options.connect_timeout),
            )),
        }
    }

    fn build_connect_packet(&self) -> ConnectPacket {
        let options = &self.options;
        let mut properties = Properties::default();
        let mut will_properties = Properties::default();

        if options.protocol_version.is_v5() {
            if let Some(expiry) = options.session_expiry_interval {
                properties.set_session_expiry_interval(expiry);
            }
            properties.set_receive_maximum(options.receive_maximum);
            if options.topic_alias_maximum > 0 {
                properties.set_topic_alias_maximum(options.topic_alias_maximum);
            }
            let extra = &options.connect_properties;
            if let Some(size) = extra.maximum_packet_size {
                properties.set_maximum_packet_size(size);
            }
            if let Some(val) = extra.request_response_information {
                let _ = properties.add(
                    crate::protocol::v5::properties::PropertyId::RequestResponseInformation,
                    crate::protocol::v5::properties::PropertyValue::Byte(u8::from(val)),
                );
            }
            if let Some(val) = extra.request_problem_information {
                let _ = properties.add(
                    crate::protocol::v5::properties::PropertyId::RequestProblemInformation,
                    crate::protocol::v5::properties::PropertyValue::Byte(u8::from(val)),
                );
            }
            if let Some(ref method) = extra.authentication_method {
                let _ = properties.add(
                    crate::protocol::v5::properties::PropertyId::AuthenticationMethod,
                    crate::protocol::v5::properties::PropertyValue::Utf8String(method.clone()),
                );
            }
            if let Some(ref data) = extra.authentication_data {
                let _ = properties.add(
                    crate::protocol::v5::properties::PropertyId::AuthenticationData,
                    crate::protocol::v5::properties::PropertyValue::BinaryData(
                        data.clone().into(),
                    ),
                );
            }
            for (key, value) in &extra.user_properties {
                properties.add_user_property(key.clone(), value.clone());
            }
            if let Some(ref will) = options.will {
                will_properties = Properties::from(&will.properties);
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let keep_alive = options.keep_alive.as_secs().min(u64::from(u16::MAX)) as u16;

        ConnectPacket {
            version: options.protocol_version,
            clean_session: options.clean_session,
            keep_alive,
            client_id: self.client_id(),
            username: options.username.clone(),
            password: options.password.clone(),
            will: options.will.clone(),
            properties,
            will_properties,
        }
    }

    fn apply_connack_overrides(&self, properties: &Properties) {
        let mut negotiated = Negotiated {
            keep_alive: self.options.keep_alive,
            maximum_packet_size: None,
        };

        if self.version().is_v5() {
            if let Some(server_keep_alive) = properties.server_keep_alive() {
                debug!(server_keep_alive, "server overrides keep alive");
                negotiated.keep_alive = Duration::from_secs(u64::from(server_keep_alive));
            }
            negotiated.maximum_packet_size = properties.maximum_packet_size();

            self.flow
                .set_limit(properties.receive_maximum().unwrap_or(u16::MAX));

            // The broker's topic-alias-maximum caps what we may send; absent
            // means zero.
            let outbound_max = properties
                .topic_alias_maximum()
                .unwrap_or(0)
                .min(self.options.topic_alias_maximum);
            {
                let mut aliases = lock(&self.outbound_aliases);
                aliases.reset();
                aliases.set_maximum(outbound_max);
            }
            {
                let mut aliases = lock(&self.inbound_aliases);
                aliases.reset();
                aliases.set_maximum(self.options.topic_alias_maximum);
            }

            if let Some(assigned) = properties.assigned_client_identifier() {
                let mut session = lock(&self.session);
                if session.client_id().is_empty() {
                    debug!(assigned, "adopting assigned client identifier");
                    session.set_client_id(assigned);
                }
            }
        } else {
            self.flow.set_limit(self.options.receive_maximum);
        }

        *lock(&self.negotiated) = negotiated;
    }

    /// Applies the CONNACK session-present / local-state table. Returns
    /// whether stored state was resumed (and must be replayed).
    fn prepare_session(&self, session_present: bool) -> bool {
        let client_id = self.client_id();
        let store = self.options.session_store.as_deref();

        if self.options.clean_session {
            lock(&self.session).clear();
            self.allocator.clear();
            self.flow.clear();
            if let Some(store) = store {
                if let Err(e) = store.delete(&client_id) {
                    warn!("session store delete failed: {e}");
                }
            }
            return false;
        }

        if session_present {
            if let Some(store) = store {
                match store.load(&client_id) {
                    Ok(Some(snapshot)) => {
                        debug!(
                            subscriptions = snapshot.subscriptions.len(),
                            pending_qos2 = snapshot.pending_qos2.len(),
                            "restoring persisted session"
                        );
                        let mut session = lock(&self.session);
                        session.restore(snapshot);
                        for id in session.pending_pubrel() {
                            self.allocator.reserve(id);
                        }
                    }
                    Ok(None) => debug!("session present but nothing persisted locally"),
                    Err(e) => warn!("session store load failed: {e}"),
                }
            }
            return true;
        }

        // Broker lost the session: drop local state too.
        info!(%client_id, "broker reports no session; clearing local state");
        lock(&self.session).clear();
        self.allocator.clear();
        self.flow.clear();
        if let Some(store) = store {
            if let Err(e) = store.delete(&client_id) {
                warn!("session store delete failed: {e}");
            }
        }
        false
    }

    /// Replays PUBREL for resumed QoS 2 exchanges and resends unacknowledged
    /// publishes with DUP=1.
    async fn replay_session_state(&self) {
        let (pubrels, resends) = {
            let session = lock(&self.session);
            (session.pending_pubrel(), session.unacked_for_resend())
        };

        for id in pubrels {
            debug!(packet_id = id, "replaying PUBREL");
            if let Err(e) = self
                .send_packet(&Packet::PubRel(PubRelPacket::new(id)))
                .await
            {
                warn!("PUBREL replay failed: {e}");
                return;
            }
        }
        for packet in resends {
            debug!(packet_id = ?packet.packet_id, "resending unacknowledged publish");
            if let Err(e) = self.send_packet(&Packet::Publish(packet)).await {
                warn!("publish resend failed: {e}");
                return;
            }
        }
    }

    fn spawn_tasks(self: &Arc<Self>, reader: BoxedReader) {
        let mut tasks = lock(&self.tasks);
        if let Some(handle) = tasks.reader.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.keepalive.take() {
            handle.abort();
        }

        let inner = self.clone();
        tasks.reader = Some(tokio::spawn(async move {
            read_loop(inner, reader).await;
        }));

        let inner = self.clone();
        tasks.keepalive = Some(tokio::spawn(async move {
            keepalive_loop(&inner).await;
        }));
    }

    // Outbound operations --------------------------------------------------

    async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink.send(packet).await,
            None => Err(MqttError::NotConnected),
        }
    }

    pub(crate) async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        options: &PublishOptions,
        admission_timeout: Duration,
    ) -> Result<PublishResult> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }

        let version = self.version();
        let explicit_alias = options.properties.topic_alias;
        if topic.is_empty() {
            // Publishing by alias alone requires an explicit alias.
            if !version.is_v5() || explicit_alias.is_none() {
                return Err(MqttError::InvalidTopicName(topic.to_string()));
            }
        } else {
            topic_matching::validate_topic(topic)?;
        }

        if options.qos == QoS::AtMostOnce {
            let packet = self.build_publish(topic, payload, options, None);
            self.send_checked(&packet).await?;
            return Ok(PublishResult::QoS0);
        }

        let packet_id = self.allocator.acquire()?;
        if let Err(e) = self.flow.acquire(packet_id, admission_timeout).await {
            self.allocator.release(packet_id);
            return Err(e);
        }

        let packet = self.build_publish(topic, payload, options, Some(packet_id));
        lock(&self.session).store_unacked_publish(packet.clone());

        if let Err(e) = self.send_checked(&packet).await {
            lock(&self.session).remove_unacked_publish(packet_id);
            self.flow.release(packet_id);
            self.allocator.release(packet_id);
            return Err(e);
        }

        Ok(PublishResult::QoS1Or2 { packet_id })
    }

    fn build_publish(
        &self,
        topic: &str,
        payload: &[u8],
        options: &PublishOptions,
        packet_id: Option<u16>,
    ) -> PublishPacket {
        let mut packet = PublishPacket {
            topic_name: topic.to_string(),
            packet_id,
            payload: payload.to_vec(),
            qos: options.qos,
            retain: options.retain,
            dup: false,
            properties: Properties::from(&options.properties),
        };

        // Outbound alias assignment; the topic string still rides along on
        // reuse so brokers that dropped their alias state stay in sync.
        if self.version().is_v5()
            && options.properties.topic_alias.is_none()
            && !topic.is_empty()
        {
            if let Some(assignment) = lock(&self.outbound_aliases).assign(topic) {
                trace!(topic, ?assignment, "outbound topic alias");
                packet.properties.set_topic_alias(assignment.alias());
            }
        }

        packet
    }

    /// Encodes, enforces the negotiated maximum packet size, and writes the
    /// bytes in one piece.
    async fn send_checked(&self, packet: &PublishPacket) -> Result<()> {
        let mut buf = BytesMut::with_capacity(packet.payload.len() + 64);
        packet.encode(&mut buf, self.version())?;

        if let Some(max) = self.maximum_packet_size() {
            if buf.len() > max as usize {
                return Err(MqttError::PacketTooLarge {
                    size: buf.len(),
                    max: max as usize,
                });
            }
        }

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink.send_raw(&buf).await,
            None => Err(MqttError::NotConnected),
        }
    }

    pub(crate) async fn subscribe(
        &self,
        filters: Vec<(String, SubscriptionOptions)>,
    ) -> Result<Vec<SubAckReasonCode>> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        if filters.is_empty() {
            return Err(MqttError::InvalidTopicFilter("empty filter list".to_string()));
        }
        for (filter, _) in &filters {
            topic_matching::validate_filter(filter)?;
        }

        let packet_id = self.allocator.acquire()?;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_subacks).insert(packet_id, tx);

        let packet = SubscribePacket {
            packet_id,
            properties: Properties::default(),
            filters: filters
                .iter()
                .map(|(filter, options)| TopicFilter {
                    filter: filter.clone(),
                    options: *options,
                })
                .collect(),
        };

        if let Err(e) = self.send_packet(&Packet::Subscribe(packet)).await {
            lock(&self.pending_subacks).remove(&packet_id);
            self.allocator.release(packet_id);
            return Err(e);
        }

        let codes = match timeout(defaults::ACK_TIMEOUT, rx).await {
            Ok(Ok(codes)) => codes,
            Ok(Err(_)) => {
                self.allocator.release(packet_id);
                return Err(MqttError::NotConnected);
            }
            Err(_) => {
                lock(&self.pending_subacks).remove(&packet_id);
                self.allocator.release(packet_id);
                return Err(MqttError::Timeout("suback"));
            }
        };
        self.allocator.release(packet_id);

        // Record granted subscriptions with the granted (not requested) QoS.
        {
            let mut session = lock(&self.session);
            for ((filter, requested), code) in filters.iter().zip(codes.iter()) {
                if let Some(granted) = code.granted_qos() {
                    let entry = if self.version().is_v5() {
                        SubscriptionEntry::with_options(granted, *requested)
                    } else {
                        SubscriptionEntry::new(granted)
                    };
                    session.add_subscription(filter.clone(), entry);
                } else {
                    warn!(%filter, code = ?code, "subscription rejected");
                }
            }
        }

        Ok(codes)
    }

    pub(crate) async fn unsubscribe(&self, filters: Vec<String>) -> Result<Vec<ReasonCode>> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        if filters.is_empty() {
            return Err(MqttError::InvalidTopicFilter("empty filter list".to_string()));
        }

        let packet_id = self.allocator.acquire()?;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_unsubacks).insert(packet_id, tx);

        let packet = UnsubscribePacket {
            packet_id,
            properties: Properties::default(),
            filters: filters.clone(),
        };

        if let Err(e) = self.send_packet(&Packet::Unsubscribe(packet)).await {
            lock(&self.pending_unsubacks).remove(&packet_id);
            self.allocator.release(packet_id);
            return Err(e);
        }

        let codes = match timeout(defaults::ACK_TIMEOUT, rx).await {
            Ok(Ok(codes)) => codes,
            Ok(Err(_)) => {
                self.allocator.release(packet_id);
                return Err(MqttError::NotConnected);
            }
            Err(_) => {
                lock(&self.pending_unsubacks).remove(&packet_id);
                self.allocator.release(packet_id);
                return Err(MqttError::Timeout("unsuback"));
            }
        };
        self.allocator.release(packet_id);

        {
            let mut session = lock(&self.session);
            for filter in &filters {
                session.remove_subscription(filter);
            }
        }

        // 3.1.1 UNSUBACK carries no codes; report success per filter.
        if codes.is_empty() {
            return Ok(vec![ReasonCode::Success; filters.len()]);
        }
        Ok(codes)
    }

    pub(crate) async fn disconnect(
        self: &Arc<Self>,
        reason_code: ReasonCode,
        properties: Properties,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        self.closed_by_user.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnecting);

        self.persist_session();

        let packet = Packet::Disconnect(DisconnectPacket {
            reason_code,
            properties,
        });
        if let Err(e) = self.send_packet(&packet).await {
            debug!("DISCONNECT write failed: {e}");
        }

        self.teardown_connection(true).await;
        self.set_state(ConnectionState::Disconnected);
        self.callbacks.emit_event(&ConnectionEvent::Disconnected {
            reason: DisconnectReason::ClientInitiated,
        });
        info!(client_id = %self.client_id(), "disconnected");
        Ok(())
    }

    fn persist_session(&self) {
        if self.options.clean_session {
            return;
        }
        let Some(store) = self.options.session_store.as_deref() else {
            return;
        };
        let (client_id, snapshot) = {
            let session = lock(&self.session);
            (session.client_id().to_string(), session.snapshot())
        };
        if let Err(e) = store.save(&client_id, &snapshot) {
            error!("session store save failed: {e}");
        }
    }

    /// Closes the transport and clears connection-scoped state. `abort_reader`
    /// is false when the read loop itself is tearing down.
    async fn teardown_connection(&self, abort_reader: bool) {
        {
            let mut tasks = lock(&self.tasks);
            if abort_reader {
                if let Some(handle) = tasks.reader.take() {
                    handle.abort();
                }
            } else {
                tasks.reader = None;
            }
            if let Some(handle) = tasks.keepalive.take() {
                handle.abort();
            }
        }

        if let Some(mut sink) = self.writer.lock().await.take() {
            sink.shutdown().await;
        }

        lock(&self.outbound_aliases).reset();
        lock(&self.inbound_aliases).reset();
        lock(&self.pending_subacks).clear();
        lock(&self.pending_unsubacks).clear();

        self.inbound_open.store(false, Ordering::SeqCst);
        self.inbound_notify.notify_waiters();
    }

    // Inbound dispatch -----------------------------------------------------

    /// Handles one decoded packet. An `Err` terminates the connection.
    async fn handle_packet(&self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Publish(publish) => self.handle_inbound_publish(publish).await,
            Packet::PubAck(ack) => {
                self.finish_outbound(ack.packet_id, ack.reason_code);
                Ok(())
            }
            Packet::PubRec(rec) => self.handle_pubrec(&rec).await,
            Packet::PubComp(comp) => {
                if comp.reason_code.is_error() {
                    warn!(packet_id = comp.packet_id, code = ?comp.reason_code, "PUBCOMP error");
                }
                lock(&self.session).complete_pubrel(comp.packet_id);
                self.flow.release(comp.packet_id);
                self.allocator.release(comp.packet_id);
                Ok(())
            }
            Packet::PubRel(rel) => {
                // Duplicate PUBRELs get a PUBCOMP unconditionally.
                lock(&self.session).finish_inbound_qos2(rel.packet_id);
                self.send_packet(&Packet::PubComp(PubCompPacket::new(rel.packet_id)))
                    .await
            }
            Packet::SubAck(suback) => {
                if let Some(tx) = lock(&self.pending_subacks).remove(&suback.packet_id) {
                    let _ = tx.send(suback.reason_codes);
                } else {
                    warn!(packet_id = suback.packet_id, "unexpected SUBACK");
                }
                Ok(())
            }
            Packet::UnsubAck(unsuback) => {
                if let Some(tx) = lock(&self.pending_unsubacks).remove(&unsuback.packet_id) {
                    let _ = tx.send(unsuback.reason_codes);
                } else {
                    warn!(packet_id = unsuback.packet_id, "unexpected UNSUBACK");
                }
                Ok(())
            }
            Packet::PingResp => {
                trace!("PINGRESP");
                Ok(())
            }
            Packet::PingReq => {
                debug!("broker sent PINGREQ; ignoring");
                Ok(())
            }
            Packet::Disconnect(disconnect) => {
                let will_reconnect = self.options.reconnect.enabled
                    && disconnect.reason_code.is_error()
                    && !self.closed_by_user.load(Ordering::SeqCst);
                warn!(code = ?disconnect.reason_code, will_reconnect, "server DISCONNECT");
                self.callbacks.emit_event(&ConnectionEvent::ServerDisconnect {
                    packet: disconnect.clone(),
                    will_reconnect,
                });
                Err(MqttError::ServerDisconnected {
                    reason_code: disconnect.reason_code,
                    properties: disconnect.properties,
                })
            }
            Packet::Auth(auth) => {
                debug!(code = ?auth.reason_code, "AUTH received; enhanced auth not negotiated");
                Ok(())
            }
            Packet::Connect(_) | Packet::ConnAck(_) | Packet::Subscribe(_)
            | Packet::Unsubscribe(_) => Err(MqttError::ProtocolError(format!(
                "unexpected {:?} from broker",
                packet.packet_type()
            ))),
        }
    }

    /// Terminal handling for an outbound QoS 1 exchange (or a rejected
    /// QoS 2 one): release id and flow slot, drop the unacked copy.
    fn finish_outbound(&self, packet_id: u16, reason_code: ReasonCode) {
        if reason_code.is_error() {
            // The broker rejected the publish; the id is released and the
            // packet is not retried.
            warn!(packet_id, code = ?reason_code, "publish rejected by broker");
        }
        lock(&self.session).remove_unacked_publish(packet_id);
        self.flow.release(packet_id);
        self.allocator.release(packet_id);
    }

    async fn handle_pubrec(&self, rec: &PubRecPacket) -> Result<()> {
        if rec.reason_code.is_error() {
            lock(&self.session).complete_pubrel(rec.packet_id);
            self.finish_outbound(rec.packet_id, rec.reason_code);
            return Ok(());
        }
        lock(&self.session).store_pubrel(rec.packet_id);
        self.send_packet(&Packet::PubRel(PubRelPacket::new(rec.packet_id)))
            .await
    }

    async fn handle_inbound_publish(&self, publish: PublishPacket) -> Result<()> {
        let topic = match self.resolve_topic(&publish) {
            Ok(topic) => topic,
            Err(e) => {
                // Invalid alias: DISCONNECT 0x94 and drop the connection.
                let packet = Packet::Disconnect(DisconnectPacket::new(
                    ReasonCode::TopicAliasInvalid,
                ));
                let _ = self.send_packet(&packet).await;
                return Err(e);
            }
        };

        let admitted = topic_matching::matches_any(&topic, &self.options.message_filters);

        match publish.qos {
            QoS::AtMostOnce => {
                if admitted {
                    self.deliver(Message::from_publish(topic, &publish));
                }
                Ok(())
            }
            QoS::AtLeastOnce => {
                let packet_id = publish.packet_id.ok_or_else(|| {
                    MqttError::ProtocolError("QoS 1 PUBLISH without packet id".to_string())
                })?;
                if admitted {
                    self.deliver(Message::from_publish(topic, &publish));
                }
                self.send_packet(&Packet::PubAck(PubAckPacket::new(packet_id)))
                    .await
            }
            QoS::ExactlyOnce => {
                let packet_id = publish.packet_id.ok_or_else(|| {
                    MqttError::ProtocolError("QoS 2 PUBLISH without packet id".to_string())
                })?;
                // First delivery only; a DUP replay of a pending id is
                // answered with PUBREC and suppressed.
                let first = lock(&self.session).start_inbound_qos2(packet_id);
                if first && admitted {
                    self.deliver(Message::from_publish(topic, &publish));
                }
                self.send_packet(&Packet::PubRec(PubRecPacket::new(packet_id)))
                    .await
            }
        }
    }

    /// Resolves the effective topic of an inbound PUBLISH through the
    /// inbound alias map.
    fn resolve_topic(&self, publish: &PublishPacket) -> Result<String> {
        if !self.version().is_v5() {
            if publish.topic_name.is_empty() {
                return Err(MqttError::ProtocolError(
                    "PUBLISH with empty topic".to_string(),
                ));
            }
            return Ok(publish.topic_name.clone());
        }

        match publish.topic_alias() {
            Some(alias) => {
                let mut aliases = lock(&self.inbound_aliases);
                if !aliases.in_range(alias) {
                    return Err(MqttError::TopicAliasInvalid(alias));
                }
                if publish.topic_name.is_empty() {
                    match aliases.resolve(alias) {
                        Some(topic) => Ok(topic.to_string()),
                        None => Err(MqttError::TopicAliasInvalid(alias)),
                    }
                } else {
                    // Carrying both registers (or re-registers) the alias.
                    aliases.register(alias, &publish.topic_name)?;
                    Ok(publish.topic_name.clone())
                }
            }
            None if publish.topic_name.is_empty() => Err(MqttError::ProtocolError(
                "PUBLISH with neither topic nor alias".to_string(),
            )),
            None => Ok(publish.topic_name.clone()),
        }
    }

    fn deliver(&self, message: Message) {
        if self.callbacks.dispatch_message(message.clone()) {
            return;
        }
        // No handler installed: buffer for await_message.
        let mut queue = lock(&self.inbound_queue);
        if queue.len() >= defaults::INBOUND_QUEUE_CAPACITY {
            warn!("inbound queue full; dropping oldest message");
            queue.pop_front();
        }
        queue.push_back(message);
        drop(queue);
        self.inbound_notify.notify_waiters();
    }

    pub(crate) async fn await_message(&self, wait: Duration) -> Result<Option<Message>> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let mut notified = pin!(self.inbound_notify.notified());
            notified.as_mut().enable();

            if let Some(message) = lock(&self.inbound_queue).pop_front() {
                return Ok(Some(message));
            }
            if !self.inbound_open.load(Ordering::SeqCst) {
                // Disconnect aborts the wait immediately.
                return Err(MqttError::NotConnected);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    // Connection loss ------------------------------------------------------

    async fn on_connection_lost(self: &Arc<Self>, error: MqttError) {
        if self.closed_by_user.load(Ordering::SeqCst) {
            return;
        }

        warn!(client_id = %self.client_id(), "connection lost: {error}");
        let reason = DisconnectReason::from_error(&error);
        let reconnect = self.options.reconnect.enabled && error.triggers_reconnect();

        *lock(&self.last_error) = Some(error);
        self.persist_session();
        self.teardown_connection(false).await;

        self.callbacks
            .emit_event(&ConnectionEvent::Disconnected { reason });

        if reconnect {
            self.set_state(ConnectionState::Reconnecting);
            let inner = self.clone();
            let handle = tokio::spawn(async move {
                reconnect_loop(&inner).await;
            });
            lock(&self.tasks).reconnect = Some(handle);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

/// Whether the pinger should emit a PINGREQ given the write-idle time.
pub(crate) fn should_ping(idle: Duration, keep_alive: Duration) -> bool {
    !keep_alive.is_zero() && idle >= keep_alive / 2
}

/// Inbound-silence budget before the connection is declared dead.
pub(crate) fn read_deadline(keep_alive: Duration) -> Option<Duration> {
    if keep_alive.is_zero() {
        None
    } else {
        Some(keep_alive * 3 / 2)
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut reader: BoxedReader) {
    let version = inner.options.protocol_version;
    let error = loop {
        let result = match read_deadline(inner.negotiated_keep_alive()) {
            Some(deadline) => match timeout(deadline, reader.read_packet(version)).await {
                Ok(result) => result,
                Err(_) => break MqttError::KeepAliveTimeout,
            },
            None => reader.read_packet(version).await,
        };

        match result {
            Ok(packet) => {
                if let Err(e) = inner.handle_packet(packet).await {
                    break e;
                }
            }
            Err(e) => break e,
        }
    };

    inner.on_connection_lost(error).await;
}

async fn keepalive_loop(inner: &Arc<ClientInner>) {
    loop {
        let keep_alive = inner.negotiated_keep_alive();
        if keep_alive.is_zero() {
            return;
        }
        tokio::time::sleep(keep_alive / 4).await;

        if !inner.is_connected() {
            return;
        }
        let mut writer = inner.writer.lock().await;
        let Some(sink) = writer.as_mut() else { return };
        if should_ping(sink.last_write.elapsed(), keep_alive) {
            trace!("PINGREQ");
            if let Err(e) = sink.send(&Packet::PingReq).await {
                // The read loop will observe the same failure and tear down.
                warn!("PINGREQ write failed: {e}");
                return;
            }
        }
    }
}

async fn reconnect_loop(inner: &Arc<ClientInner>) {
    let options = inner.options.reconnect.clone();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if !options.attempt_allowed(attempt) {
            warn!(attempt, "reconnect budget exhausted");
            inner.set_state(ConnectionState::Disconnected);
            return;
        }

        let delay = options.jittered_delay(attempt);
        debug!(attempt, ?delay, "scheduling reconnect");
        inner
            .callbacks
            .emit_event(&ConnectionEvent::Reconnecting { attempt });
        tokio::time::sleep(delay).await;

        if inner.closed_by_user.load(Ordering::SeqCst) {
            inner.set_state(ConnectionState::Disconnected);
            return;
        }

        match inner.establish().await {
            Ok(_) => {
                // The attempt counter resets by construction: a future drop
                // spawns a fresh loop.
                info!(attempt, "reconnected");
                return;
            }
            Err(error) => {
                warn!(attempt, "reconnect attempt failed: {error}");
                inner
                    .callbacks
                    .emit_event(&ConnectionEvent::ReconnectFailed { error });
                inner.set_state(ConnectionState::Reconnecting);
            }
        }
    }
}
