//! In-memory session state.

use crate::packet::publish::PublishPacket;
use crate::session::store::SessionSnapshot;
use crate::session::subscription::{SubscriptionEntry, SubscriptionRegistry};
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// Everything the client remembers about one session.
///
/// The subscription registry and the outbound pending-PUBREL set survive
/// reconnects (and disconnects, through the session store); the inbound
/// QoS 2 dedupe set and the unacknowledged-publish buffer are rebuilt from
/// traffic.
#[derive(Debug)]
pub struct SessionState {
    client_id: String,
    subscriptions: SubscriptionRegistry,
    /// Inbound QoS 2 packet ids between PUBLISH and PUBREL; duplicates of
    /// these ids are not redelivered to the application.
    inbound_qos2: HashSet<u16>,
    /// Outbound QoS 2 packet ids between PUBREC and PUBCOMP. Persisted so a
    /// resumed session replays only PUBREL.
    pending_pubrel: HashSet<u16>,
    /// Outbound QoS 1/2 publishes not yet past their first acknowledgement;
    /// resent with DUP=1 when the session is resumed.
    unacked_publish: HashMap<u16, PublishPacket>,
}

impl SessionState {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            subscriptions: SubscriptionRegistry::new(),
            inbound_qos2: HashSet::new(),
            pending_pubrel: HashSet::new(),
            unacked_publish: HashMap::new(),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Adopts the broker's assigned client identifier.
    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        self.client_id = client_id.into();
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn add_subscription(&mut self, filter: String, entry: SubscriptionEntry) {
        self.subscriptions.insert(filter, entry);
    }

    pub fn remove_subscription(&mut self, filter: &str) -> bool {
        self.subscriptions.remove(filter)
    }

    // Outbound QoS 1/2 -----------------------------------------------------

    pub fn store_unacked_publish(&mut self, packet: PublishPacket) {
        if let Some(id) = packet.packet_id {
            self.unacked_publish.insert(id, packet);
        }
    }

    pub fn remove_unacked_publish(&mut self, packet_id: u16) -> Option<PublishPacket> {
        self.unacked_publish.remove(&packet_id)
    }

    /// Unacknowledged publishes in packet-id order, flagged DUP for resend.
    #[must_use]
    pub fn unacked_for_resend(&self) -> Vec<PublishPacket> {
        let mut packets: Vec<PublishPacket> = self
            .unacked_publish
            .values()
            .map(|p| p.clone().with_dup(true))
            .collect();
        packets.sort_by_key(|p| p.packet_id);
        packets
    }

    /// PUBREC received: the PUBLISH is acknowledged, only PUBREL remains.
    pub fn store_pubrel(&mut self, packet_id: u16) {
        self.unacked_publish.remove(&packet_id);
        self.pending_pubrel.insert(packet_id);
    }

    /// PUBCOMP received. Returns `true` if the id was pending.
    pub fn complete_pubrel(&mut self, packet_id: u16) -> bool {
        self.pending_pubrel.remove(&packet_id)
    }

    /// Pending PUBREL ids in ascending order (deterministic replay).
    #[must_use]
    pub fn pending_pubrel(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.pending_pubrel.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    // Inbound QoS 2 --------------------------------------------------------

    /// Marks an inbound QoS 2 publish as received. Returns `false` when the
    /// id was already pending, i.e. the delivery is a duplicate.
    pub fn start_inbound_qos2(&mut self, packet_id: u16) -> bool {
        self.inbound_qos2.insert(packet_id)
    }

    /// PUBREL received for an inbound exchange. Returns `true` if the id was
    /// pending.
    pub fn finish_inbound_qos2(&mut self, packet_id: u16) -> bool {
        self.inbound_qos2.remove(&packet_id)
    }

    #[must_use]
    pub fn has_inbound_qos2(&self, packet_id: u16) -> bool {
        self.inbound_qos2.contains(&packet_id)
    }

    // Persistence ----------------------------------------------------------

    /// Snapshot for the session store; `saved_at` is stamped with the
    /// current unix second.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            subscriptions: self.subscriptions.clone(),
            pending_qos2: self.pending_pubrel(),
            saved_at: unix_now(),
        }
    }

    /// Restores registry and pending-PUBREL set from a stored snapshot.
    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        self.subscriptions = snapshot.subscriptions;
        self.pending_pubrel = snapshot.pending_qos2.into_iter().collect();
    }

    /// Drops all session data (clean start, or broker lost the session).
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.inbound_qos2.clear();
        self.pending_pubrel.clear();
        self.unacked_publish.clear();
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
