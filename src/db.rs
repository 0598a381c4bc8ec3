//! SQLite-backed [`TenantStore`].
//!
//! Tenant records live in a single `tenants` table with their settings and
//! enrichment caches as JSON columns; the conversation log is a separate
//! append-only table. The `version` column carries the optimistic-concurrency
//! counter: updates are `WHERE identity = ? AND version = ?`, so a stale
//! writer affects zero rows and gets [`Error::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{ConversationLogEntry, EnrichmentCaches, Lang, TenantRecord, TenantSettings};
use crate::store::TenantStore;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.store.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(Error::Store)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            identity TEXT PRIMARY KEY,
            password_hash TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0,
            subdomain TEXT NOT NULL UNIQUE,
            settings_json TEXT NOT NULL DEFAULT '{}',
            caches_json TEXT NOT NULL DEFAULT '{}',
            version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_log (
            id TEXT PRIMARY KEY,
            tenant_identity TEXT NOT NULL,
            ts TEXT NOT NULL,
            lang TEXT NOT NULL,
            query TEXT NOT NULL,
            answer TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_log_tenant ON conversation_log (tenant_identity, ts)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Durable tenant store backed by SQLite.
pub struct SqliteTenantStore {
    pool: SqlitePool,
}

impl SqliteTenantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> TenantRecord {
    let settings_json: String = row.get("settings_json");
    let caches_json: String = row.get("caches_json");
    let settings: TenantSettings = serde_json::from_str(&settings_json).unwrap_or_default();
    let caches: EnrichmentCaches = serde_json::from_str(&caches_json).unwrap_or_default();

    TenantRecord {
        identity: row.get("identity"),
        password_hash: row.get("password_hash"),
        is_admin: row.get::<i64, _>("is_admin") != 0,
        subdomain: row.get("subdomain"),
        settings,
        caches,
        version: row.get::<i64, _>("version") as u64,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
    async fn get(&self, identity: &str) -> Result<Option<TenantRecord>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE identity = ?")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn insert(&self, record: TenantRecord) -> Result<()> {
        let settings_json =
            serde_json::to_string(&record.settings).unwrap_or_else(|_| "{}".to_string());
        let caches_json =
            serde_json::to_string(&record.caches).unwrap_or_else(|_| "{}".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO tenants (identity, password_hash, is_admin, subdomain, settings_json, caches_json, version)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.identity)
        .bind(&record.password_hash)
        .bind(record.is_admin as i64)
        .bind(&record.subdomain)
        .bind(&settings_json)
        .bind(&caches_json)
        .bind(record.version as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists(record.identity)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, record: &TenantRecord) -> Result<u64> {
        let settings_json =
            serde_json::to_string(&record.settings).unwrap_or_else(|_| "{}".to_string());
        let caches_json =
            serde_json::to_string(&record.caches).unwrap_or_else(|_| "{}".to_string());
        let next_version = record.version + 1;

        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET password_hash = ?, is_admin = ?, settings_json = ?, caches_json = ?, version = ?
            WHERE identity = ? AND version = ?
            "#,
        )
        .bind(&record.password_hash)
        .bind(record.is_admin as i64)
        .bind(&settings_json)
        .bind(&caches_json)
        .bind(next_version as i64)
        .bind(&record.identity)
        .bind(record.version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing record from a lost race.
            return match self.get(&record.identity).await? {
                Some(_) => Err(Error::Conflict),
                None => Err(Error::NotFound(record.identity.clone())),
            };
        }
        Ok(next_version)
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<TenantRecord>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE subdomain = ?")
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        let rows = sqlx::query("SELECT * FROM tenants ORDER BY identity")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn append_log(&self, identity: &str, entry: ConversationLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_log (id, tenant_identity, ts, lang, query, answer)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(identity)
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.lang.as_str())
        .bind(&entry.query)
        .bind(&entry.answer)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn logs(&self, identity: &str) -> Result<Vec<ConversationLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, ts, lang, query, answer FROM conversation_log WHERE tenant_identity = ? ORDER BY ts",
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .map(|row| {
                let ts: String = row.get("ts");
                let lang: String = row.get("lang");
                ConversationLogEntry {
                    id: row.get("id"),
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    lang: Lang::parse(&lang).unwrap_or_default(),
                    query: row.get("query"),
                    answer: row.get("answer"),
                }
            })
            .collect();
        Ok(entries)
    }

    async fn clear_logs(&self, identity: &str) -> Result<()> {
        sqlx::query("DELETE FROM conversation_log WHERE tenant_identity = ?")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, SqliteTenantStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite:{}",
            tmp.path().join("test.sqlite").display()
        ))
        .unwrap()
        .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        (tmp, SqliteTenantStore::new(pool))
    }

    #[tokio::test]
    async fn test_roundtrip_record() {
        let (_tmp, store) = test_store().await;
        let mut rec = TenantRecord::new("a@x.com", "hash", "acme");
        rec.caches
            .suggestions
            .insert(Lang::Ru, vec!["Когда отпуск?".to_string()]);
        store.insert(rec).await.unwrap();

        let stored = store.get("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.subdomain, "acme");
        assert_eq!(stored.caches.suggestions[&Lang::Ru], vec!["Когда отпуск?"]);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_duplicate_subdomain_rejected() {
        let (_tmp, store) = test_store().await;
        store
            .insert(TenantRecord::new("a@x.com", "hash", "acme"))
            .await
            .unwrap();
        let err = store
            .insert(TenantRecord::new("b@x.com", "hash", "acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let (_tmp, store) = test_store().await;
        store
            .insert(TenantRecord::new("a@x.com", "hash", "acme"))
            .await
            .unwrap();

        let stale = store.get("a@x.com").await.unwrap().unwrap();
        let mut fresh = stale.clone();
        fresh.settings.source_label = "first".to_string();
        assert_eq!(store.update(&fresh).await.unwrap(), 1);

        let mut late = stale;
        late.settings.source_label = "second".to_string();
        assert!(matches!(store.update(&late).await.unwrap_err(), Error::Conflict));

        let stored = store.get("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.settings.source_label, "first");
    }

    #[tokio::test]
    async fn test_log_order_and_clear() {
        let (_tmp, store) = test_store().await;
        store
            .insert(TenantRecord::new("a@x.com", "hash", "acme"))
            .await
            .unwrap();

        for i in 0..3 {
            store
                .append_log(
                    "a@x.com",
                    ConversationLogEntry::new(Lang::En, &format!("q{i}"), "a"),
                )
                .await
                .unwrap();
        }
        let logs = store.logs("a@x.com").await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        store.clear_logs("a@x.com").await.unwrap();
        assert!(store.logs("a@x.com").await.unwrap().is_empty());
    }
}
