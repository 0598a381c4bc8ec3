use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub documents: DocumentsConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub tenancy: TenancyConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// SQLite database file holding tenant records and conversation logs.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    /// Directory holding one knowledge-base document per tenant subdomain.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret for issued credentials.
    pub secret: String,
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: i64,
}

fn default_token_ttl_days() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct TenancyConfig {
    /// Identity served when neither credential nor host resolves a tenant.
    #[serde(default = "default_tenant_identity")]
    pub default_tenant: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant_identity(),
        }
    }
}

fn default_tenant_identity() -> String {
    "default@ragdesk.local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Token budget for the per-query answer context.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Token budget for the excerpt sent during enrichment.
    #[serde(default = "default_enrich_max_tokens")]
    pub enrich_max_tokens: usize,
    /// Optional HuggingFace tokenizer file (`tokenizer.json`). When absent,
    /// budgets are approximated at a fixed chars-per-token ratio.
    #[serde(default)]
    pub tokenizer_file: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            enrich_max_tokens: default_enrich_max_tokens(),
            tokenizer_file: None,
        }
    }
}

fn default_max_tokens() -> usize {
    10_000
}
fn default_enrich_max_tokens() -> usize {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable the API key is read from at startup.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Timeout for answer-path calls. Enrichment calls use shorter,
    /// per-call-site bounds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_generation_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_generation_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifyConfig {
    /// Telegram bot token; notifications are silently disabled when unset.
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvisionConfig {
    /// Command spawned after registration with the new subdomain as its
    /// sole argument. Failures are logged, never surfaced.
    #[serde(default)]
    pub command: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.auth.secret.trim().is_empty() {
        anyhow::bail!("auth.secret must not be empty");
    }
    if config.auth.token_ttl_days < 1 {
        anyhow::bail!("auth.token_ttl_days must be >= 1");
    }

    if config.context.max_tokens == 0 {
        anyhow::bail!("context.max_tokens must be > 0");
    }
    if config.context.enrich_max_tokens == 0 {
        anyhow::bail!("context.enrich_max_tokens must be > 0");
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if !(1..=120).contains(&config.generation.timeout_secs) {
        anyhow::bail!("generation.timeout_secs must be in [1, 120]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
[server]
bind = "127.0.0.1:8006"

[store]
path = "data/ragdesk.sqlite"

[documents]
dir = "data/docs"

[auth]
secret = "test-secret"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let f = write_config(MINIMAL);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.auth.token_ttl_days, 30);
        assert_eq!(config.context.max_tokens, 10_000);
        assert_eq!(config.context.enrich_max_tokens, 2_000);
        assert_eq!(config.generation.model, "gemini-2.0-flash");
        assert_eq!(config.generation.timeout_secs, 30);
        assert_eq!(config.tenancy.default_tenant, "default@ragdesk.local");
        assert!(config.notify.telegram_bot_token.is_none());
        assert!(config.provision.command.is_none());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let f = write_config(&MINIMAL.replace("test-secret", " "));
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_zero_token_budget_rejected() {
        let body = format!("{MINIMAL}\n[context]\nmax_tokens = 0\n");
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_out_of_range_temperature_rejected() {
        let body = format!("{MINIMAL}\n[generation]\ntemperature = 3.5\n");
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }
}
