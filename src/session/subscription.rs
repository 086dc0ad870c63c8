//! Ordered subscription registry.

use crate::packet::subscribe::{RetainHandling, SubscriptionOptions};
use crate::QoS;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One granted subscription: the QoS the broker granted plus the v5 options
/// it was requested with (`None` for a 3.1.1 subscription).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub qos: QoS,
    pub options: Option<SubscriptionOptions>,
}

impl SubscriptionEntry {
    #[must_use]
    pub fn new(qos: QoS) -> Self {
        Self { qos, options: None }
    }

    #[must_use]
    pub fn with_options(qos: QoS, options: SubscriptionOptions) -> Self {
        Self {
            qos,
            options: Some(options),
        }
    }
}

/// Registry of topic filter -> granted subscription.
///
/// Filters are unique; insertion order is preserved so a restored session
/// re-subscribes deterministically. Serializes as a JSON object
/// `filter -> {qos, options}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionRegistry {
    entries: Vec<(String, SubscriptionEntry)>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a filter, keeping its original position on update.
    pub fn insert(&mut self, filter: String, entry: SubscriptionEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|(f, _)| *f == filter) {
            existing.1 = entry;
        } else {
            self.entries.push((filter, entry));
        }
    }

    /// Removes a filter. Returns `true` if it was present.
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(f, _)| f != filter);
        self.entries.len() != before
    }

    #[must_use]
    pub fn get(&self, filter: &str) -> Option<&SubscriptionEntry> {
        self.entries
            .iter()
            .find(|(f, _)| f == filter)
            .map(|(_, e)| e)
    }

    #[must_use]
    pub fn contains(&self, filter: &str) -> bool {
        self.get(filter).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SubscriptionEntry)> {
        self.entries.iter().map(|(f, e)| (f.as_str(), e))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// On-disk form of the v5 options: {"no_local":…,"retain_as_published":…,
// "retain_handling":0|1|2}.
#[derive(Serialize, Deserialize)]
struct StoredOptions {
    no_local: bool,
    retain_as_published: bool,
    retain_handling: u8,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    qos: u8,
    options: Option<StoredOptions>,
}

impl From<&SubscriptionEntry> for StoredEntry {
    fn from(entry: &SubscriptionEntry) -> Self {
        Self {
            qos: entry.qos as u8,
            options: entry.options.map(|o| StoredOptions {
                no_local: o.no_local,
                retain_as_published: o.retain_as_published,
                retain_handling: o.retain_handling as u8,
            }),
        }
    }
}

impl StoredEntry {
    fn into_entry(self) -> Option<SubscriptionEntry> {
        let qos = QoS::try_from_u8(self.qos).ok()?;
        let options = match self.options {
            None => None,
            Some(o) => Some(SubscriptionOptions {
                qos,
                no_local: o.no_local,
                retain_as_published: o.retain_as_published,
                retain_handling: RetainHandling::from_u8(o.retain_handling)?,
            }),
        };
        Some(SubscriptionEntry { qos, options })
    }
}

impl Serialize for SubscriptionRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (filter, entry) in &self.entries {
            map.serialize_entry(filter, &StoredEntry::from(entry))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SubscriptionRegistry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RegistryVisitor;

        impl<'de> Visitor<'de> for RegistryVisitor {
            type Value = SubscriptionRegistry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of topic filter to subscription entry")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut registry = SubscriptionRegistry::new();
                while let Some((filter, stored)) = access.next_entry::<String, StoredEntry>()? {
                    let entry = stored
                        .into_entry()
                        .ok_or_else(|| serde::de::Error::custom("invalid subscription entry"))?;
                    registry.insert(filter, entry);
                }
                Ok(registry)
            }
        }

        deserializer.deserialize_map(RegistryVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_order_and_uniqueness() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("b/#".to_string(), SubscriptionEntry::new(QoS::AtMostOnce));
        registry.insert("a/+".to_string(), SubscriptionEntry::new(QoS::AtLeastOnce));
        registry.insert("b/#".to_string(), SubscriptionEntry::new(QoS::ExactlyOnce));

        let filters: Vec<_> = registry.iter().map(|(f, _)| f.to_string()).collect();
        assert_eq!(filters, vec!["b/#", "a/+"]);
        assert_eq!(registry.get("b/#").unwrap().qos, QoS::ExactlyOnce);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_and_contains() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("x".to_string(), SubscriptionEntry::new(QoS::AtMostOnce));
        assert!(registry.contains("x"));
        assert!(registry.remove("x"));
        assert!(!registry.remove("x"));
        assert!(registry.is_empty());
    }

    #[test]
    fn json_round_trip_preserves_order() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(
            "z/#".to_string(),
            SubscriptionEntry::with_options(
                QoS::AtLeastOnce,
                SubscriptionOptions::new(QoS::AtLeastOnce).with_no_local(true),
            ),
        );
        registry.insert("a/b".to_string(), SubscriptionEntry::new(QoS::AtMostOnce));

        let json = serde_json::to_string(&registry).unwrap();
        // Insertion order survives serialization.
        assert!(json.find("z/#").unwrap() < json.find("a/b").unwrap());

        let restored: SubscriptionRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, registry);
    }

    #[test]
    fn v311_entry_serializes_null_options() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("t".to_string(), SubscriptionEntry::new(QoS::AtLeastOnce));
        let json = serde_json::to_string(&registry).unwrap();
        assert!(json.contains("\"options\":null"));
    }
}
