/*!
The tag registry: every identifier the tracker has ever seen, with its
display name and absence timeout, written through to a durable store
*/

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{TrackerError, TrackerResult};
use crate::store::RegistryStore;

/// Opaque identifier decoded from a tag's signal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(String);

impl TagId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TagId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TagId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A registered tag: identity, human-readable name, and absence timeout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: TagId,
    pub display_name: String,
    /// Seconds the tag may stay out of the zone before an alert; 0 disables alerting
    pub absence_timeout_secs: u64,
}

impl TagRecord {
    pub fn new(id: TagId, display_name: impl Into<String>, absence_timeout_secs: u64) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            absence_timeout_secs,
        }
    }

    /// The absence timeout as a duration, or `None` when alerting is disabled
    pub fn absence_timeout(&self) -> Option<Duration> {
        (self.absence_timeout_secs > 0).then(|| Duration::from_secs(self.absence_timeout_secs))
    }
}

/// In-memory registry keyed by identifier, persisted after every mutation.
///
/// Records are only ever added or updated. Forgetting a tag is not supported;
/// a tag that should stop alerting gets its timeout set to zero instead.
pub struct TagRegistry {
    records: HashMap<TagId, TagRecord>,
    store: Box<dyn RegistryStore>,
}

impl TagRegistry {
    /// Load all persisted records from the given store
    pub async fn open(mut store: Box<dyn RegistryStore>) -> TrackerResult<Self> {
        let records = store.load().await?;
        info!(
            "Loaded {} tag record(s) from {}",
            records.len(),
            store.describe()
        );
        Ok(Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            store,
        })
    }

    pub fn lookup(&self, id: &TagId) -> Option<&TagRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &TagId) -> bool {
        self.records.contains_key(id)
    }

    /// Add a brand-new record, persist the registry, and return the record.
    ///
    /// Fails with [`TrackerError::DuplicateId`] if the identifier is already
    /// registered, leaving the registry untouched.
    pub async fn register(
        &mut self,
        id: TagId,
        display_name: impl Into<String>,
        absence_timeout_secs: u64,
    ) -> TrackerResult<&TagRecord> {
        if self.records.contains_key(&id) {
            return Err(TrackerError::DuplicateId(id));
        }
        let record = TagRecord::new(id.clone(), display_name, absence_timeout_secs);
        debug!(tag = %id, name = %record.display_name, "Registered new tag");
        self.records.insert(id.clone(), record);
        self.persist().await?;
        Ok(&self.records[&id])
    }

    /// Change a tag's display name and persist the registry
    pub async fn rename(&mut self, id: &TagId, new_name: impl Into<String>) -> TrackerResult<()> {
        match self.records.get_mut(id) {
            Some(record) => {
                record.display_name = new_name.into();
                self.persist().await
            }
            None => Err(TrackerError::UnknownId(id.clone())),
        }
    }

    /// Change a tag's absence timeout and persist the registry.
    ///
    /// Timers already running keep their original duration; the new value
    /// applies from the tag's next departure.
    pub async fn set_timeout(&mut self, id: &TagId, timeout: Duration) -> TrackerResult<()> {
        match self.records.get_mut(id) {
            Some(record) => {
                record.absence_timeout_secs = timeout.as_secs();
                self.persist().await
            }
            None => Err(TrackerError::UnknownId(id.clone())),
        }
    }

    /// All known records in identifier order
    pub fn records(&self) -> Vec<TagRecord> {
        let mut records: Vec<TagRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    async fn persist(&mut self) -> TrackerResult<()> {
        let records = self.records();
        self.store.persist(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn open_empty() -> TagRegistry {
        TagRegistry::open(Box::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_then_lookup_round_trips() {
        let mut registry = open_empty().await;
        let registered = registry
            .register(TagId::from("T1"), "Box A", 300)
            .await
            .unwrap();
        assert_eq!(registered.display_name, "Box A");

        let record = registry.lookup(&TagId::from("T1")).unwrap();
        assert_eq!(record.id, TagId::from("T1"));
        assert_eq!(record.display_name, "Box A");
        assert_eq!(record.absence_timeout(), Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let mut registry = open_empty().await;
        registry
            .register(TagId::from("T1"), "Box A", 300)
            .await
            .unwrap();

        let err = registry
            .register(TagId::from("T1"), "Box B", 60)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateId(_)));

        // The original record survives untouched
        let record = registry.lookup(&TagId::from("T1")).unwrap();
        assert_eq!(record.display_name, "Box A");
        assert_eq!(record.absence_timeout_secs, 300);
    }

    #[tokio::test]
    async fn rename_unknown_tag_fails() {
        let mut registry = open_empty().await;
        let err = registry
            .rename(&TagId::from("NOPE"), "Ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::UnknownId(_)));
    }

    #[tokio::test]
    async fn zero_timeout_disables_alerting() {
        let mut registry = open_empty().await;
        registry
            .register(TagId::from("T1"), "Box A", 0)
            .await
            .unwrap();
        assert_eq!(registry.lookup(&TagId::from("T1")).unwrap().absence_timeout(), None);

        registry
            .set_timeout(&TagId::from("T1"), Duration::from_secs(90))
            .await
            .unwrap();
        assert_eq!(
            registry.lookup(&TagId::from("T1")).unwrap().absence_timeout(),
            Some(Duration::from_secs(90))
        );
    }

    #[tokio::test]
    async fn records_are_sorted_by_identifier() {
        let mut registry = open_empty().await;
        registry.register(TagId::from("B"), "b", 0).await.unwrap();
        registry.register(TagId::from("A"), "a", 0).await.unwrap();
        registry.register(TagId::from("C"), "c", 0).await.unwrap();

        let ids: Vec<String> = registry
            .records()
            .into_iter()
            .map(|r| r.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }
}
