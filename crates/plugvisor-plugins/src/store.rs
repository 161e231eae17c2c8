//! In-memory plugin store.
//!
//! The authoritative index of plugin records, keyed by [`PluginId`]. The
//! store hands out clones; callers publish changes back with
//! [`PluginStore::update`].

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::plugin::{PluginId, PluginRecord};

/// Internally synchronized index of plugin records.
#[derive(Debug, Default)]
pub struct PluginStore {
    plugins: RwLock<HashMap<PluginId, PluginRecord>>,
}

impl PluginStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire contents of the store.
    pub async fn set_all(&self, plugins: HashMap<PluginId, PluginRecord>) {
        let mut guard = self.plugins.write().await;
        debug!(count = plugins.len(), "Replacing plugin store contents");
        *guard = plugins;
    }

    /// Insert or replace one record.
    pub async fn update(&self, record: PluginRecord) {
        self.plugins
            .write()
            .await
            .insert(record.id().clone(), record);
    }

    /// Look up a record by full ID.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] for unknown IDs.
    pub async fn get_by_id(&self, id: &str) -> PluginResult<PluginRecord> {
        self.plugins
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    /// Resolve an operator reference: full ID, name, or unique ID prefix.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] when nothing matches and
    /// [`PluginError::AmbiguousReference`] when a prefix matches more than
    /// one plugin.
    pub async fn get(&self, reference: &str) -> PluginResult<PluginRecord> {
        let guard = self.plugins.read().await;
        if let Some(record) = guard.get(reference) {
            return Ok(record.clone());
        }
        if let Some(record) = guard.values().find(|p| p.name() == reference) {
            return Ok(record.clone());
        }
        if reference.is_empty() {
            return Err(PluginError::NotFound(reference.to_string()));
        }
        let mut matches = guard
            .values()
            .filter(|p| p.id().as_str().starts_with(reference));
        match (matches.next(), matches.next()) {
            (Some(record), None) => Ok(record.clone()),
            (Some(_), Some(_)) => Err(PluginError::AmbiguousReference(reference.to_string())),
            (None, _) => Err(PluginError::NotFound(reference.to_string())),
        }
    }

    /// Set the enabled flag of a record.
    ///
    /// Returns the updated record.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] for unknown IDs.
    pub async fn set_state(&self, id: &PluginId, enabled: bool) -> PluginResult<PluginRecord> {
        let mut guard = self.plugins.write().await;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        record.enabled = enabled;
        Ok(record.clone())
    }

    /// Remove a record, returning it if it was present.
    pub async fn remove(&self, id: &PluginId) -> Option<PluginRecord> {
        self.plugins.write().await.remove(id)
    }

    /// All records, sorted by name.
    pub async fn list(&self) -> Vec<PluginRecord> {
        let mut plugins: Vec<PluginRecord> = self.plugins.read().await.values().cloned().collect();
        plugins.sort_by(|a, b| a.name().cmp(b.name()));
        plugins
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(prefix: &str, fill: char, name: &str) -> PluginRecord {
        let mut id = prefix.to_string();
        while id.len() < crate::plugin::FULL_ID_LEN {
            id.push(fill);
        }
        PluginRecord::new(PluginId::new(id).unwrap(), name)
    }

    #[tokio::test]
    async fn test_set_all_replaces_contents() {
        let store = PluginStore::new();
        store.update(record("aa", '0', "old")).await;

        let fresh = record("bb", '0', "new");
        let mut map = HashMap::new();
        map.insert(fresh.id().clone(), fresh.clone());
        store.set_all(map).await;

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get_by_id(fresh.id().as_str()).await.unwrap().name(), "new");
    }

    #[tokio::test]
    async fn test_get_by_reference() {
        let store = PluginStore::new();
        let a = record("abc1", '0', "alpha:latest");
        let b = record("abc2", '0', "beta:latest");
        store.update(a.clone()).await;
        store.update(b.clone()).await;

        assert_eq!(store.get("alpha:latest").await.unwrap().id(), a.id());
        assert_eq!(store.get(b.id().as_str()).await.unwrap().id(), b.id());
        assert_eq!(store.get("abc2").await.unwrap().id(), b.id());
        assert!(matches!(
            store.get("abc").await,
            Err(PluginError::AmbiguousReference(_))
        ));
        assert!(matches!(store.get("ffff").await, Err(PluginError::NotFound(_))));
        assert!(matches!(store.get("").await, Err(PluginError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_set_state_and_remove() {
        let store = PluginStore::new();
        let a = record("a", '1', "alpha");
        store.update(a.clone()).await;

        let updated = store.set_state(a.id(), true).await.unwrap();
        assert!(updated.is_enabled());
        assert!(store.get_by_id(a.id().as_str()).await.unwrap().is_enabled());

        assert!(store.remove(a.id()).await.is_some());
        assert!(store.is_empty().await);
        assert!(store.set_state(a.id(), false).await.is_err());
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let store = PluginStore::new();
        store.update(record("c", '0', "zeta")).await;
        store.update(record("d", '0', "alpha")).await;
        let names: Vec<String> = store.list().await.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
