//! Context assembly: operator-section stripping, HTML-comment removal, and
//! token-budget truncation.
//!
//! The assembled context is only ever handed to the answer engine — it is
//! never returned to clients. Truncation keeps the head of the document and
//! is computed by decoding the first N encoded tokens back to text, so a
//! token is never split.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::ContextConfig;

/// Approximate chars-per-token ratio used when no subword tokenizer file is
/// configured.
const CHARS_PER_TOKEN: usize = 4;

/// Known heading spellings of operator-only sections (business name,
/// signature, widget settings) across the supported languages. A heading
/// whose title starts with any of these removes the whole section — from the
/// heading to the next heading or end of document.
pub const OPERATOR_HEADINGS: &[&str] = &[
    "настройки",
    "название",
    "подпись",
    "settings",
    "business name",
    "signature",
    "configurações",
    "nome da empresa",
    "assinatura",
];

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Unterminated comments swallow the rest of the document.
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").unwrap())
}

/// Remove all HTML-comment-delimited spans.
pub fn strip_html_comments(text: &str) -> String {
    comment_re().replace_all(text, "").into_owned()
}

fn heading_title(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('#') {
        return None;
    }
    Some(trimmed.trim_start_matches('#').trim())
}

fn is_operator_heading(title: &str) -> bool {
    let lower = title.to_lowercase();
    OPERATOR_HEADINGS.iter().any(|h| lower.starts_with(h))
}

/// Delete every operator-only section: from a matching heading to the next
/// heading or end of document. Matching is case-insensitive.
pub fn strip_operator_sections(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut skipping = false;

    for line in text.lines() {
        if let Some(title) = heading_title(line) {
            skipping = is_operator_heading(title);
            if skipping {
                continue;
            }
        }
        if !skipping {
            kept.push(line);
        }
    }

    kept.join("\n")
}

/// Deterministic tokenizer used for budget truncation.
///
/// With the `subword-tokenizer` feature and a configured tokenizer file this
/// is an exact subword vocabulary; otherwise a fixed chars-per-token
/// approximation keeps the budget logic deterministic and head-preserving.
pub enum BudgetTokenizer {
    #[cfg(feature = "subword-tokenizer")]
    Subword(Box<tokenizers::Tokenizer>),
    Approx,
}

impl BudgetTokenizer {
    pub fn from_config(config: &ContextConfig) -> Self {
        #[cfg(feature = "subword-tokenizer")]
        if let Some(path) = &config.tokenizer_file {
            match tokenizers::Tokenizer::from_file(path) {
                Ok(t) => return BudgetTokenizer::Subword(Box::new(t)),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load tokenizer file, using chars-per-token approximation"
                    );
                }
            }
        }
        #[cfg(not(feature = "subword-tokenizer"))]
        if config.tokenizer_file.is_some() {
            tracing::warn!(
                "context.tokenizer_file set but the subword-tokenizer feature is disabled"
            );
        }
        BudgetTokenizer::Approx
    }

    /// Number of tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        match self {
            #[cfg(feature = "subword-tokenizer")]
            BudgetTokenizer::Subword(t) => t
                .encode(text, false)
                .map(|enc| enc.get_ids().len())
                .unwrap_or_else(|_| approx_count(text)),
            BudgetTokenizer::Approx => approx_count(text),
        }
    }

    /// Keep at most `max_tokens` tokens from the head of `text`.
    ///
    /// Text already within budget is returned unchanged. Otherwise the first
    /// `max_tokens` encoded tokens are decoded back to text, so truncation
    /// never lands inside a token.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        match self {
            #[cfg(feature = "subword-tokenizer")]
            BudgetTokenizer::Subword(t) => {
                let encoding = match t.encode(text, false) {
                    Ok(enc) => enc,
                    Err(_) => return approx_truncate(text, max_tokens),
                };
                let ids = encoding.get_ids();
                if ids.len() <= max_tokens {
                    return text.to_string();
                }
                t.decode(&ids[..max_tokens], true)
                    .unwrap_or_else(|_| approx_truncate(text, max_tokens))
            }
            BudgetTokenizer::Approx => approx_truncate(text, max_tokens),
        }
    }
}

fn approx_count(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn approx_truncate(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Assembles the token-bounded prompt context from a tenant's document.
pub struct ContextAssembler {
    tokenizer: BudgetTokenizer,
    max_tokens: usize,
    enrich_max_tokens: usize,
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            tokenizer: BudgetTokenizer::from_config(config),
            max_tokens: config.max_tokens,
            enrich_max_tokens: config.enrich_max_tokens,
        }
    }

    pub fn tokenizer(&self) -> &BudgetTokenizer {
        &self.tokenizer
    }

    /// Answer-path context: operator sections and HTML comments removed,
    /// truncated to the query budget. A missing document assembles to the
    /// empty string.
    pub fn assemble(&self, document: Option<&str>) -> String {
        let Some(document) = document else {
            return String::new();
        };
        let stripped = strip_html_comments(&strip_operator_sections(document));
        self.tokenizer.truncate(&stripped, self.max_tokens)
    }

    /// Enrichment excerpt: HTML comments removed but operator sections kept
    /// (the pipeline needs to see the business name), truncated to the
    /// smaller enrichment budget.
    pub fn enrichment_excerpt(&self, document: &str) -> String {
        let stripped = strip_html_comments(document);
        self.tokenizer.truncate(&stripped, self.enrich_max_tokens)
    }
}
