//! Session persistence.

use crate::error::{MqttError, Result};
use crate::session::subscription::SubscriptionRegistry;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Persisted session document.
///
/// Invariants: `saved_at > 0` after any save; subscription entries carry the
/// granted (not requested) QoS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub subscriptions: SubscriptionRegistry,
    /// Outbound QoS 2 ids awaiting PUBCOMP; PUBREL is replayed for each on
    /// session resumption.
    pub pending_qos2: Vec<u16>,
    /// Unix seconds of the save.
    pub saved_at: u64,
}

/// Persistence contract for session state.
///
/// Implementations must be crash-atomic: a partially written store must not
/// come back as a valid load. Callers may invoke a store from arbitrary
/// contexts, but concurrent calls for the same client id are not required to
/// be supported; the client serialises its own calls.
pub trait SessionStore: Send + Sync {
    /// Persists `snapshot` for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError` if the write fails.
    fn save(&self, client_id: &str, snapshot: &SessionSnapshot) -> Result<()>;

    /// Loads the stored snapshot, or `None` when absent or expired.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError` if the read fails.
    fn load(&self, client_id: &str) -> Result<Option<SessionSnapshot>>;

    /// Removes any stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError` if the removal fails.
    fn delete(&self, client_id: &str) -> Result<()>;

    /// Whether a snapshot is stored for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError` if the check fails.
    fn exists(&self, client_id: &str) -> Result<bool>;
}

/// File-backed session store: one JSON document per client id.
///
/// Writes go to a temp file and are renamed into place under an exclusive
/// lock on a sidecar lock file, so a crash mid-write never leaves a
/// half-document behind. Client ids that are not strictly filename-safe are
/// rewritten to `mqtt_<sha1-hex>`, which also blocks directory traversal.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    default_expiry: Option<Duration>,
}

impl FileSessionStore {
    /// Opens (and creates) the storage directory.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError` if the directory cannot be created.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| MqttError::SessionStoreError(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            default_expiry: None,
        })
    }

    /// Sets the expiry applied on load: snapshots older than this are
    /// deleted and reported as absent.
    #[must_use]
    pub fn with_default_expiry(mut self, expiry: Duration) -> Self {
        self.default_expiry = Some(expiry);
        self
    }

    /// Filename a client id maps to: the id itself when it matches
    /// `[A-Za-z0-9_-]{1,64}`, otherwise `mqtt_<sha1-hex>`.
    #[must_use]
    pub fn storage_file_name(client_id: &str) -> String {
        let safe = !client_id.is_empty()
            && client_id.len() <= 64
            && client_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if safe {
            client_id.to_string()
        } else {
            let digest = Sha1::digest(client_id.as_bytes());
            let mut name = String::with_capacity(45);
            name.push_str("mqtt_");
            for byte in digest {
                let _ = write!(name, "{byte:02x}");
            }
            name
        }
    }

    fn document_path(&self, client_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", Self::storage_file_name(client_id)))
    }

    fn lock_path(&self, client_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.lock", Self::storage_file_name(client_id)))
    }

    fn store_err(context: &str, err: &dyn std::fmt::Display) -> MqttError {
        MqttError::SessionStoreError(format!("{context}: {err}"))
    }

    /// Takes the exclusive lock for a client id; released when the handle
    /// drops.
    fn lock(&self, client_id: &str) -> Result<fs::File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(client_id))
            .map_err(|e| Self::store_err("open lock file", &e))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| Self::store_err("acquire lock", &e))?;
        Ok(lock_file)
    }

    fn is_expired(&self, snapshot: &SessionSnapshot) -> bool {
        match self.default_expiry {
            Some(expiry) => {
                let now = crate::session::state::unix_now();
                now.saturating_sub(snapshot.saved_at) > expiry.as_secs()
            }
            None => false,
        }
    }

    /// Deletes every expired document. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError` if the directory scan fails; unreadable
    /// individual files are skipped with a warning.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let Some(_) = self.default_expiry else {
            return Ok(0);
        };

        let entries = fs::read_dir(&self.dir).map_err(|e| Self::store_err("read dir", &e))?;
        let mut removed = 0;
        for entry in entries {
            let path = match entry {
                Ok(e) => e.path(),
                Err(e) => {
                    warn!("session store: unreadable directory entry: {e}");
                    continue;
                }
            };
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let expired = fs::read(&path)
                .ok()
                .and_then(|data| serde_json::from_slice::<SessionSnapshot>(&data).ok())
                .is_some_and(|snapshot| self.is_expired(&snapshot));
            if expired {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("session store: remove {}: {e}", path.display());
                } else {
                    debug!("session store: expired {}", path.display());
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, client_id: &str, snapshot: &SessionSnapshot) -> Result<()> {
        let _lock = self.lock(client_id)?;
        let path = self.document_path(client_id);
        let tmp_path = path.with_extension("tmp");

        let data = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| Self::store_err("serialize snapshot", &e))?;

        let mut tmp = fs::File::create(&tmp_path)
            .map_err(|e| Self::store_err("create temp file", &e))?;
        tmp.write_all(&data)
            .and_then(|()| tmp.sync_all())
            .map_err(|e| Self::store_err("write temp file", &e))?;
        drop(tmp);

        fs::rename(&tmp_path, &path).map_err(|e| Self::store_err("rename into place", &e))?;
        debug!(client_id, path = %path.display(), "session saved");
        Ok(())
    }

    fn load(&self, client_id: &str) -> Result<Option<SessionSnapshot>> {
        let _lock = self.lock(client_id)?;
        let path = self.document_path(client_id);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::store_err("read document", &e)),
        };

        let snapshot: SessionSnapshot = serde_json::from_slice(&data)
            .map_err(|e| Self::store_err("parse document", &e))?;

        if self.is_expired(&snapshot) {
            fs::remove_file(&path).map_err(|e| Self::store_err("remove expired", &e))?;
            debug!(client_id, "stored session expired");
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    fn delete(&self, client_id: &str) -> Result<()> {
        let _lock = self.lock(client_id)?;
        match fs::remove_file(self.document_path(client_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::store_err("delete document", &e)),
        }
    }

    fn exists(&self, client_id: &str) -> Result<bool> {
        Ok(self.document_path(client_id).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::subscription::SubscriptionEntry;
    use crate::QoS;

    fn sample_snapshot() -> SessionSnapshot {
        let mut subscriptions = SubscriptionRegistry::new();
        subscriptions.insert(
            "sensors/#".to_string(),
            SubscriptionEntry::new(QoS::AtLeastOnce),
        );
        SessionSnapshot {
            subscriptions,
            pending_qos2: vec![42],
            saved_at: crate::session::state::unix_now(),
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        let snapshot = sample_snapshot();

        store.save("client-1", &snapshot).unwrap();
        assert!(store.exists("client-1").unwrap());

        let loaded = store.load("client-1").unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn load_absent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        assert!(store.load("nobody").unwrap().is_none());
        assert!(!store.exists("nobody").unwrap());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        store.save("c", &sample_snapshot()).unwrap();
        store.delete("c").unwrap();
        store.delete("c").unwrap();
        assert!(!store.exists("c").unwrap());
    }

    #[test]
    fn expired_document_is_deleted_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FileSessionStore::new(dir.path()).unwrap().with_default_expiry(Duration::from_secs(60));

        let mut snapshot = sample_snapshot();
        snapshot.saved_at = crate::session::state::unix_now() - 3600;
        store.save("stale", &snapshot).unwrap();

        assert!(store.load("stale").unwrap().is_none());
        assert!(!store.exists("stale").unwrap());
    }

    #[test]
    fn cleanup_sweeps_expired_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FileSessionStore::new(dir.path()).unwrap().with_default_expiry(Duration::from_secs(60));

        let mut stale = sample_snapshot();
        stale.saved_at = crate::session::state::unix_now() - 3600;
        store.save("stale", &stale).unwrap();
        store.save("fresh", &sample_snapshot()).unwrap();

        assert_eq!(store.cleanup_expired().unwrap(), 1);
        assert!(!store.exists("stale").unwrap());
        assert!(store.exists("fresh").unwrap());
    }

    #[test]
    fn filename_safety() {
        assert_eq!(FileSessionStore::storage_file_name("simple-id_1"), "simple-id_1");

        for nasty in ["../../etc/passwd", "a/b", "id with spaces", "", "日本語", &"x".repeat(65)] {
            let name = FileSessionStore::storage_file_name(nasty);
            assert!(name.starts_with("mqtt_"), "{nasty} -> {name}");
            assert_eq!(name.len(), 45);
            assert!(name[5..].chars().all(|c| c.is_ascii_hexdigit()));
            assert!(!name.contains('/') && !name.contains('\\'));
        }
    }

    #[test]
    fn traversal_ids_stay_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        store.save("../escape", &sample_snapshot()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(entries.iter().all(|name| name.starts_with("mqtt_")));
    }

    #[test]
    fn corrupt_document_is_an_error_not_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"{ truncated").unwrap();
        assert!(store.load("bad").is_err());
    }

    #[test]
    fn on_disk_layout_matches_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        store.save("layout", &sample_snapshot()).unwrap();

        let raw = fs::read_to_string(dir.path().join("layout.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["subscriptions"].is_object());
        assert_eq!(value["subscriptions"]["sensors/#"]["qos"], 1);
        assert_eq!(value["pending_qos2"][0], 42);
        assert!(value["saved_at"].as_u64().unwrap() > 0);
    }
}
