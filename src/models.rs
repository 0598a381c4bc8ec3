//! Core data models used throughout ragdesk.
//!
//! These types represent tenant records, their derived enrichment caches, and
//! the per-tenant conversation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported answer/enrichment languages.
///
/// The set is closed: language detection accepts only these codes and falls
/// back to [`Lang::Ru`] for anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    Ru,
    En,
    Pt,
}

impl Lang {
    pub const ALL: [Lang; 3] = [Lang::Ru, Lang::En, Lang::Pt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Ru => "ru",
            Lang::En => "en",
            Lang::Pt => "pt",
        }
    }

    /// Parse an ISO-639-1 code, `None` for codes outside the supported set.
    pub fn parse(code: &str) -> Option<Lang> {
        match code.trim().to_lowercase().as_str() {
            "ru" => Some(Lang::Ru),
            "en" => Some(Lang::En),
            "pt" => Some(Lang::Pt),
            _ => None,
        }
    }

    /// English name, used when prompting the generation capability.
    pub fn english_name(&self) -> &'static str {
        match self {
            Lang::Ru => "Russian",
            Lang::En => "English",
            Lang::Pt => "Portuguese",
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-editable settings on a tenant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Whether the chat widget is visible to anonymous visitors by default.
    #[serde(default = "default_true")]
    pub public_by_default: bool,
    /// Free-form label shown as the answer source (e.g. "Internal docs").
    #[serde(default)]
    pub source_label: String,
}

fn default_true() -> bool {
    true
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            public_by_default: true,
            source_label: String::new(),
        }
    }
}

/// Derived, regenerable caches computed by the enrichment pipeline.
///
/// Never a source of truth: everything here can be recomputed from the
/// tenant's document. `document_hash` tags which document version the caches
/// describe, so a superseded enrichment run can discard its result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentCaches {
    #[serde(default)]
    pub suggestions: HashMap<Lang, Vec<String>>,
    #[serde(default)]
    pub business_name: HashMap<Lang, String>,
    #[serde(default)]
    pub signature: HashMap<Lang, String>,
    #[serde(default)]
    pub detected_language: Option<Lang>,
    #[serde(default)]
    pub document_hash: Option<String>,
}

/// One tenant account.
///
/// `identity` (the account email) is the store key and immutable, as is
/// `subdomain`, which is unique across all tenants and enforced at
/// registration time. `version` is the optimistic-concurrency counter: every
/// successful [`TenantStore::update`](crate::store::TenantStore::update)
/// bumps it, and writers carrying a stale version are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub identity: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub subdomain: String,
    #[serde(default)]
    pub settings: TenantSettings,
    #[serde(default)]
    pub caches: EnrichmentCaches,
    #[serde(default)]
    pub version: u64,
}

impl TenantRecord {
    pub fn new(identity: &str, password_hash: &str, subdomain: &str) -> Self {
        Self {
            identity: identity.to_string(),
            password_hash: password_hash.to_string(),
            is_admin: false,
            subdomain: subdomain.to_string(),
            settings: TenantSettings::default(),
            caches: EnrichmentCaches::default(),
            version: 0,
        }
    }
}

/// Append-only conversation log entry. No mutation after append; the only
/// other operation on a tenant's log is a full clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub lang: Lang,
    pub query: String,
    pub answer: String,
}

impl ConversationLogEntry {
    pub fn new(lang: Lang, query: &str, answer: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            lang,
            query: query.to_string(),
            answer: answer.to_string(),
        }
    }
}
