//! Background enrichment pipeline.
//!
//! Recomputes every derived cache on a tenant record — localized suggested
//! questions, business name, signature, detected document language — from a
//! freshly uploaded document. Dispatched fire-and-forget at the end of the
//! upload handler; the upload response never waits for it.
//!
//! Each run is tagged with the content hash of the document it was computed
//! from. At persist time the run re-checks the hash of the currently stored
//! document and discards its result on mismatch, so a newer upload
//! supersedes an older in-flight run instead of racing it. The persist
//! itself is one versioned record update: readers see either the previous
//! full cache set or the new one, never a per-language mix.
//!
//! Suggestion extraction has two strategies: the generation capability
//! (structured JSON reply) and a regex heuristic over the raw document
//! (`**bold**` spans). The heuristic is the fallback for any upstream or
//! parse failure, applied per language — one language's failure never aborts
//! the others.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::context::ContextAssembler;
use crate::document::{self, DocumentStore};
use crate::error::{Error, Result};
use crate::generation::{GenerationRequest, Generator, Turn};
use crate::models::{EnrichmentCaches, Lang};
use crate::store::TenantStore;

/// Suggested questions kept per language.
pub const SUGGESTION_LIMIT: usize = 3;

/// Characters of document head sent for language detection.
const DETECT_EXCERPT_CHARS: usize = 1000;

const DETECT_TIMEOUT: Duration = Duration::from_secs(10);
const ENRICH_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded retries for the versioned persist.
const PERSIST_RETRIES: usize = 3;

/// How an enrichment run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// Caches replaced on the tenant record.
    Persisted,
    /// A newer upload replaced the document while this run was in flight;
    /// the result was discarded.
    Superseded,
}

/// Structured reply expected from the generation capability per language.
#[derive(Debug, Deserialize)]
struct LangEnrichment {
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    business_name: Option<String>,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(Clone)]
pub struct Enricher {
    store: Arc<dyn TenantStore>,
    docs: Arc<DocumentStore>,
    generator: Arc<dyn Generator>,
    assembler: Arc<ContextAssembler>,
}

impl Enricher {
    pub fn new(
        store: Arc<dyn TenantStore>,
        docs: Arc<DocumentStore>,
        generator: Arc<dyn Generator>,
        assembler: Arc<ContextAssembler>,
    ) -> Self {
        Self {
            store,
            docs,
            generator,
            assembler,
        }
    }

    /// Fire-and-forget dispatch. The upload handler calls this after the
    /// document write and returns immediately.
    pub fn spawn(&self, identity: String, content: String) {
        let this = self.clone();
        tokio::spawn(async move {
            match this.run(&identity, &content).await {
                Ok(outcome) => {
                    tracing::info!(identity = %identity, ?outcome, "enrichment run finished");
                }
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "enrichment run failed");
                }
            }
        });
    }

    /// One full enrichment run over an uploaded document.
    pub async fn run(&self, identity: &str, content: &str) -> Result<EnrichmentOutcome> {
        let run_hash = document::content_hash(content);
        let detected = self.detect_language(content).await;
        let excerpt = self.assembler.enrichment_excerpt(content);

        let mut suggestions: HashMap<Lang, Vec<String>> = HashMap::new();
        let mut business_name: HashMap<Lang, String> = HashMap::new();
        let mut signature: HashMap<Lang, String> = HashMap::new();

        for lang in Lang::ALL {
            match self.enrich_language(lang, &excerpt).await {
                Ok(derived) => {
                    let mut questions: Vec<String> = derived
                        .questions
                        .into_iter()
                        .map(|q| q.trim().to_string())
                        .filter(|q| !q.is_empty())
                        .collect();
                    questions.truncate(SUGGESTION_LIMIT);
                    suggestions.insert(lang, questions);
                    if let Some(name) = non_empty(derived.business_name) {
                        business_name.insert(lang, name);
                    }
                    if let Some(sig) = non_empty(derived.signature) {
                        signature.insert(lang, sig);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        identity,
                        lang = %lang,
                        error = %e,
                        "language enrichment degraded to heuristic extraction"
                    );
                    suggestions.insert(lang, heuristic_suggestions(content));
                }
            }
        }

        let caches = EnrichmentCaches {
            suggestions,
            business_name,
            signature,
            detected_language: Some(detected),
            document_hash: Some(run_hash.clone()),
        };

        self.persist(identity, &run_hash, caches).await
    }

    /// Replace the tenant's cache set in one versioned update, discarding
    /// the result if a newer document has been uploaded meanwhile.
    async fn persist(
        &self,
        identity: &str,
        run_hash: &str,
        caches: EnrichmentCaches,
    ) -> Result<EnrichmentOutcome> {
        for _ in 0..PERSIST_RETRIES {
            let mut record = self
                .store
                .get(identity)
                .await?
                .ok_or_else(|| Error::NotFound(format!("tenant {identity}")))?;

            let current = self.docs.current_hash(&record.subdomain)?;
            if current.as_deref() != Some(run_hash) {
                return Ok(EnrichmentOutcome::Superseded);
            }

            record.caches = caches.clone();
            match self.store.update(&record).await {
                Ok(_) => return Ok(EnrichmentOutcome::Persisted),
                Err(Error::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict)
    }

    /// Step 1 — detect the document's primary language from its head.
    /// Anything outside the supported set, and any failure, is `ru`.
    async fn detect_language(&self, content: &str) -> Lang {
        let excerpt: String = content.chars().take(DETECT_EXCERPT_CHARS).collect();
        let req = GenerationRequest {
            system: None,
            turns: vec![Turn::user(format!(
                "Identify the primary language of the text below. \
                 Reply with one ISO 639-1 code and nothing else (ru, en, or pt).\n\n{excerpt}"
            ))],
            temperature: 0.0,
            max_output_tokens: 8,
            timeout: DETECT_TIMEOUT,
        };

        match self.generator.generate(req).await {
            Ok(reply) => parse_language_code(&reply).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "language detection failed, defaulting to ru");
                Lang::Ru
            }
        }
    }

    /// Step 2 — one structured generation call for one target language.
    async fn enrich_language(&self, lang: Lang, excerpt: &str) -> Result<LangEnrichment> {
        let prompt = format!(
            "Below is an excerpt of a company knowledge base. Reply with a single JSON \
             object and nothing else, with exactly these fields:\n\
             \"questions\" — three short questions in {language}, answerable strictly from \
             the excerpt;\n\
             \"business_name\" — the business name translated into {language}, or null if \
             the excerpt does not state one;\n\
             \"signature\" — the signature or contact text translated into {language}, or \
             null.\n\n\
             EXCERPT:\n---\n{excerpt}\n---",
            language = lang.english_name(),
        );
        let req = GenerationRequest {
            system: None,
            turns: vec![Turn::user(prompt)],
            temperature: 0.2,
            max_output_tokens: 500,
            timeout: ENRICH_TIMEOUT,
        };

        let reply = self.generator.generate(req).await?;
        parse_enrichment_reply(&reply)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First whitespace-separated token of the reply, punctuation-trimmed,
/// matched against the supported set.
fn parse_language_code(reply: &str) -> Option<Lang> {
    let token = reply.split_whitespace().next()?;
    Lang::parse(token.trim_matches(|c: char| !c.is_ascii_alphabetic()))
}

/// Parse the structured per-language reply, tolerating markdown code fences
/// some models wrap JSON in.
fn parse_enrichment_reply(reply: &str) -> Result<LangEnrichment> {
    let body = strip_code_fences(reply);
    serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))
}

fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

/// Regex fallback: suggestions are `**bold**` spans of the raw document,
/// question-like spans first, capped at [`SUGGESTION_LIMIT`].
pub fn heuristic_suggestions(document: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\*\*([^*\n]+?)\*\*").unwrap());

    let spans: Vec<String> = re
        .captures_iter(document)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let questions: Vec<String> = spans.iter().filter(|s| s.ends_with('?')).cloned().collect();
    let pool = if questions.is_empty() { spans } else { questions };

    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<String> = pool.into_iter().filter(|s| seen.insert(s.clone())).collect();
    out.truncate(SUGGESTION_LIMIT);
    out
}
