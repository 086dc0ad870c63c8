//! Session store contract tests against the file implementation.

use mqtt_duo::session::SubscriptionEntry;
use mqtt_duo::{FileSessionStore, QoS, SessionSnapshot, SessionStore, SubscriptionOptions};
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn snapshot_with(filters: &[(&str, QoS)], pending: &[u16]) -> SessionSnapshot {
    let mut snapshot = SessionSnapshot {
        subscriptions: Default::default(),
        pending_qos2: pending.to_vec(),
        saved_at: now(),
    };
    for (filter, qos) in filters {
        snapshot
            .subscriptions
            .insert((*filter).to_string(), SubscriptionEntry::new(*qos));
    }
    snapshot
}

#[test]
fn save_then_load_is_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).unwrap();

    let snapshot = snapshot_with(
        &[("sensors/#", QoS::AtLeastOnce), ("alerts/+", QoS::ExactlyOnce)],
        &[42, 7, 19],
    );
    store.save("round-trip", &snapshot).unwrap();
    let loaded = store.load("round-trip").unwrap().unwrap();

    // Set equality on pending ids, map equality on subscriptions.
    let stored: HashSet<u16> = snapshot.pending_qos2.iter().copied().collect();
    let restored: HashSet<u16> = loaded.pending_qos2.iter().copied().collect();
    assert_eq!(stored, restored);
    assert_eq!(loaded.subscriptions, snapshot.subscriptions);
    assert!(loaded.saved_at > 0);
}

#[test]
fn v5_options_survive_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).unwrap();

    let mut snapshot = snapshot_with(&[], &[]);
    snapshot.subscriptions.insert(
        "cmd/device".to_string(),
        SubscriptionEntry::with_options(
            QoS::AtLeastOnce,
            SubscriptionOptions::new(QoS::AtLeastOnce)
                .with_no_local(true)
                .with_retain_as_published(true),
        ),
    );
    store.save("optioned", &snapshot).unwrap();

    let loaded = store.load("optioned").unwrap().unwrap();
    let entry = loaded.subscriptions.get("cmd/device").unwrap();
    let options = entry.options.unwrap();
    assert!(options.no_local);
    assert!(options.retain_as_published);
}

#[test]
fn overwrite_replaces_previous_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).unwrap();

    store
        .save("c", &snapshot_with(&[("old/#", QoS::AtMostOnce)], &[1]))
        .unwrap();
    store
        .save("c", &snapshot_with(&[("new/#", QoS::AtLeastOnce)], &[2]))
        .unwrap();

    let loaded = store.load("c").unwrap().unwrap();
    assert!(loaded.subscriptions.get("new/#").is_some());
    assert!(loaded.subscriptions.get("old/#").is_none());
    assert_eq!(loaded.pending_qos2, vec![2]);
}

#[test]
fn expiry_applies_per_load_and_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path())
        .unwrap()
        .with_default_expiry(Duration::from_secs(300));

    let mut expired = snapshot_with(&[("a", QoS::AtMostOnce)], &[]);
    expired.saved_at = now() - 301;
    store.save("expired", &expired).unwrap();
    store.save("live", &snapshot_with(&[], &[])).unwrap();

    assert!(store.load("expired").unwrap().is_none());
    assert!(store.load("live").unwrap().is_some());
    assert_eq!(store.cleanup_expired().unwrap(), 0); // already swept on load
}

proptest! {
    // Property 10: every client id maps to a filename with no separators,
    // either the id itself or mqtt_<40 hex chars>.
    #[test]
    fn filenames_are_always_safe(client_id in ".*") {
        let name = FileSessionStore::storage_file_name(&client_id);
        prop_assert!(!name.contains('/'));
        prop_assert!(!name.contains('\\'));
        prop_assert!(!name.contains(".."));

        let plain = name.len() <= 64
            && !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        let hashed = name.len() == 45
            && name.starts_with("mqtt_")
            && name[5..].chars().all(|c| c.is_ascii_hexdigit());
        prop_assert!(plain || hashed, "{} -> {}", client_id, name);
    }

    #[test]
    fn pending_ids_round_trip(ids in proptest::collection::hash_set(1u16.., 0..64)) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();

        let ids: Vec<u16> = ids.into_iter().collect();
        store.save("prop", &snapshot_with(&[], &ids)).unwrap();
        let loaded = store.load("prop").unwrap().unwrap();

        let stored: HashSet<u16> = ids.into_iter().collect();
        let restored: HashSet<u16> = loaded.pending_qos2.into_iter().collect();
        prop_assert_eq!(stored, restored);
    }
}
