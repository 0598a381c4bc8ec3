//! Tenant storage abstraction.
//!
//! The [`TenantStore`] trait defines every storage operation the core needs:
//! point reads and writes of tenant records, the registration-time subdomain
//! scan, and the append-only conversation log. Implementations must be
//! `Send + Sync` to work with async runtimes.
//!
//! Record writes are versioned: [`TenantStore::update`] succeeds only when
//! the caller's `version` matches the stored one, then bumps it. This is what
//! makes the enrichment pipeline's "one full cache-set replace" hold under
//! concurrency — a stale writer gets [`Error::Conflict`] and must re-read.
//!
//! Two backends exist: [`MemoryTenantStore`] here (tests, single-process
//! setups) and the SQLite backend in [`crate::db`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{ConversationLogEntry, TenantRecord};

/// Abstract tenant store.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Point read by identity.
    async fn get(&self, identity: &str) -> Result<Option<TenantRecord>>;

    /// Insert a new record. Fails with [`Error::AlreadyExists`] if the
    /// identity is taken.
    async fn insert(&self, record: TenantRecord) -> Result<()>;

    /// Versioned replace. Fails with [`Error::Conflict`] unless
    /// `record.version` matches the stored version; on success the stored
    /// record carries `record.version + 1`. Returns the new version.
    async fn update(&self, record: &TenantRecord) -> Result<u64>;

    /// Linear scan for the tenant owning a subdomain.
    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<TenantRecord>>;

    /// All tenant records (administrative listing).
    async fn list(&self) -> Result<Vec<TenantRecord>>;

    /// Append one conversation log entry for a tenant.
    async fn append_log(&self, identity: &str, entry: ConversationLogEntry) -> Result<()>;

    /// All log entries for a tenant, oldest first.
    async fn logs(&self, identity: &str) -> Result<Vec<ConversationLogEntry>>;

    /// Drop a tenant's entire conversation log.
    async fn clear_logs(&self, identity: &str) -> Result<()>;
}

/// In-memory store for tests and single-process deployments.
pub struct MemoryTenantStore {
    records: RwLock<HashMap<String, TenantRecord>>,
    logs: RwLock<HashMap<String, Vec<ConversationLogEntry>>>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn get(&self, identity: &str) -> Result<Option<TenantRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.get(identity).cloned())
    }

    async fn insert(&self, record: TenantRecord) -> Result<()> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&record.identity) {
            return Err(Error::AlreadyExists(record.identity));
        }
        records.insert(record.identity.clone(), record);
        Ok(())
    }

    async fn update(&self, record: &TenantRecord) -> Result<u64> {
        let mut records = self.records.write().unwrap();
        let stored = records
            .get_mut(&record.identity)
            .ok_or_else(|| Error::NotFound(record.identity.clone()))?;
        if stored.version != record.version {
            return Err(Error::Conflict);
        }
        let mut next = record.clone();
        next.version += 1;
        let version = next.version;
        *stored = next;
        Ok(version)
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<TenantRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.values().find(|r| r.subdomain == subdomain).cloned())
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        let records = self.records.read().unwrap();
        let mut all: Vec<TenantRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(all)
    }

    async fn append_log(&self, identity: &str, entry: ConversationLogEntry) -> Result<()> {
        let mut logs = self.logs.write().unwrap();
        logs.entry(identity.to_string()).or_default().push(entry);
        Ok(())
    }

    async fn logs(&self, identity: &str) -> Result<Vec<ConversationLogEntry>> {
        let logs = self.logs.read().unwrap();
        Ok(logs.get(identity).cloned().unwrap_or_default())
    }

    async fn clear_logs(&self, identity: &str) -> Result<()> {
        let mut logs = self.logs.write().unwrap();
        logs.remove(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Lang;

    fn record(identity: &str, subdomain: &str) -> TenantRecord {
        TenantRecord::new(identity, "hash", subdomain)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_identity() {
        let store = MemoryTenantStore::new();
        store.insert(record("a@x.com", "acme")).await.unwrap();
        let err = store.insert(record("a@x.com", "other")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryTenantStore::new();
        store.insert(record("a@x.com", "acme")).await.unwrap();

        let mut rec = store.get("a@x.com").await.unwrap().unwrap();
        rec.settings.source_label = "docs".to_string();
        let v = store.update(&rec).await.unwrap();
        assert_eq!(v, 1);

        let stored = store.get("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.settings.source_label, "docs");
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = MemoryTenantStore::new();
        store.insert(record("a@x.com", "acme")).await.unwrap();

        let stale = store.get("a@x.com").await.unwrap().unwrap();
        let mut fresh = stale.clone();
        store.update(&fresh).await.unwrap();

        // The first snapshot now carries an outdated version.
        fresh = stale;
        fresh.settings.source_label = "late".to_string();
        let err = store.update(&fresh).await.unwrap_err();
        assert!(matches!(err, Error::Conflict));
    }

    #[tokio::test]
    async fn test_find_by_subdomain() {
        let store = MemoryTenantStore::new();
        store.insert(record("a@x.com", "acme")).await.unwrap();
        store.insert(record("b@x.com", "beta")).await.unwrap();

        let found = store.find_by_subdomain("beta").await.unwrap().unwrap();
        assert_eq!(found.identity, "b@x.com");
        assert!(store.find_by_subdomain("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logs_append_and_clear() {
        let store = MemoryTenantStore::new();
        store.insert(record("a@x.com", "acme")).await.unwrap();

        store
            .append_log("a@x.com", ConversationLogEntry::new(Lang::Ru, "q", "a"))
            .await
            .unwrap();
        assert_eq!(store.logs("a@x.com").await.unwrap().len(), 1);

        store.clear_logs("a@x.com").await.unwrap();
        assert!(store.logs("a@x.com").await.unwrap().is_empty());
    }
}
