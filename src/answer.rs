//! Answer engine.
//!
//! Combines the assembled context, the visitor's query, and the requested
//! language into one language-constrained generation call, then records the
//! exchange in the tenant's conversation log. Never raises to the caller:
//! every failure mode degrades to a fixed polite string in the requested
//! language, with the detail logged internally.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::context::ContextAssembler;
use crate::document::DocumentStore;
use crate::generation::{GenerationRequest, Generator, Turn};
use crate::models::{ConversationLogEntry, Lang};
use crate::resolver;
use crate::store::TenantStore;

/// Shown when no tenant or no document backs the request. Also the reply for
/// an unresolvable tenant — visitors get one consistent message either way.
pub fn not_configured_message(lang: Lang) -> &'static str {
    match lang {
        Lang::Ru => "База знаний пока не настроена. Загляните позже!",
        Lang::En => "The knowledge base is not configured yet. Please check back later!",
        Lang::Pt => "A base de conhecimento ainda não foi configurada. Volte mais tarde!",
    }
}

/// Shown when the generation capability is unreachable or unparsable.
pub fn connection_error_message(lang: Lang) -> &'static str {
    match lang {
        Lang::Ru => "Не удалось связаться с сервисом ответов. Попробуйте ещё раз чуть позже.",
        Lang::En => "Could not reach the answer service. Please try again in a moment.",
        Lang::Pt => "Não foi possível contactar o serviço de respostas. Tente novamente em instantes.",
    }
}

fn build_system_instruction(lang: Lang, context: &str) -> String {
    format!(
        "You are a helpful assistant for a company knowledge base. Use only the \
         documentation below to answer the visitor's question. If the answer is not in \
         the documentation, state that clearly but politely. Keep the answer concise and \
         friendly. Answer strictly in {language}, translating as needed regardless of the \
         language of the documentation or the question. Never include operator-only \
         details such as contact signatures or business-name settings in the answer, \
         even if they appear in the documentation.\n\n\
         DOCUMENTATION:\n---\n{context}\n---",
        language = lang.english_name(),
    )
}

pub struct AnswerEngine {
    store: Arc<dyn TenantStore>,
    docs: Arc<DocumentStore>,
    generator: Arc<dyn Generator>,
    assembler: Arc<ContextAssembler>,
    config: Arc<Config>,
}

impl AnswerEngine {
    pub fn new(
        store: Arc<dyn TenantStore>,
        docs: Arc<DocumentStore>,
        generator: Arc<dyn Generator>,
        assembler: Arc<ContextAssembler>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            docs,
            generator,
            assembler,
            config,
        }
    }

    /// Answer one visitor query. Linear flow, no retries.
    pub async fn answer(
        &self,
        credential: Option<&str>,
        host: Option<&str>,
        query: &str,
        lang: Lang,
    ) -> String {
        let identity = match resolver::resolve_identity(
            self.store.as_ref(),
            &self.config,
            credential,
            host,
            false,
        )
        .await
        {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "tenant resolution failed");
                return not_configured_message(lang).to_string();
            }
        };

        let record = match self.store.get(&identity).await {
            Ok(Some(record)) => record,
            Ok(None) => return not_configured_message(lang).to_string(),
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "tenant read failed");
                return not_configured_message(lang).to_string();
            }
        };

        // No document: fixed message, and the generation capability is not
        // consulted at all.
        let document = match self.docs.read(&record.subdomain) {
            Ok(Some(document)) => document,
            Ok(None) => return not_configured_message(lang).to_string(),
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "document read failed");
                return not_configured_message(lang).to_string();
            }
        };

        let context = self.assembler.assemble(Some(&document));
        let req = GenerationRequest {
            system: Some(build_system_instruction(lang, &context)),
            turns: vec![Turn::user(query)],
            temperature: self.config.generation.temperature,
            max_output_tokens: self.config.generation.max_output_tokens,
            timeout: Duration::from_secs(self.config.generation.timeout_secs),
        };

        match self.generator.generate(req).await {
            Ok(answer) => {
                let entry = ConversationLogEntry::new(lang, query, &answer);
                if let Err(e) = self.store.append_log(&identity, entry).await {
                    tracing::warn!(identity = %identity, error = %e, "conversation log append failed");
                }
                answer
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "generation call failed");
                connection_error_message(lang).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthConfig, ContextConfig, DocumentsConfig, GenerationConfig, NotifyConfig,
        ProvisionConfig, ServerConfig, StoreConfig, TenancyConfig,
    };
    use crate::error::{Error, Result};
    use crate::models::TenantRecord;
    use crate::store::MemoryTenantStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; answers with a fixed string or a transport error.
    struct CountingGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingGenerator {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Generator for CountingGenerator {
        async fn generate(&self, _req: GenerationRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Upstream("timed out".to_string()))
            } else {
                Ok("Отпуск — 28 дней.".to_string())
            }
        }
    }

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
            store: StoreConfig {
                path: "unused.sqlite".into(),
            },
            documents: DocumentsConfig {
                dir: "unused".into(),
            },
            auth: AuthConfig {
                secret: "answer-test-secret".to_string(),
                token_ttl_days: 30,
            },
            tenancy: TenancyConfig::default(),
            context: ContextConfig::default(),
            generation: GenerationConfig::default(),
            notify: NotifyConfig::default(),
            provision: ProvisionConfig::default(),
        }
    }

    struct Setup {
        _tmp: tempfile::TempDir,
        engine: AnswerEngine,
        store: Arc<MemoryTenantStore>,
        docs: Arc<DocumentStore>,
        generator: Arc<CountingGenerator>,
    }

    async fn setup(generator: CountingGenerator) -> Setup {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MemoryTenantStore::new());
        let docs = Arc::new(DocumentStore::new(tmp.path().join("docs")).unwrap());
        let generator = Arc::new(generator);
        let config = Arc::new(test_config());
        store
            .insert(TenantRecord::new("a@x.com", "hash", "acme"))
            .await
            .unwrap();
        let engine = AnswerEngine::new(
            store.clone(),
            docs.clone(),
            generator.clone(),
            Arc::new(ContextAssembler::new(&ContextConfig::default())),
            config,
        );
        Setup {
            _tmp: tmp,
            engine,
            store,
            docs,
            generator,
        }
    }

    const HOST: Option<&str> = Some("acme.rag.example.com");

    #[tokio::test]
    async fn test_no_document_fixed_message_without_generation_call() {
        let s = setup(CountingGenerator::ok()).await;
        let answer = s.engine.answer(None, HOST, "Когда отпуск?", Lang::Ru).await;
        assert_eq!(answer, not_configured_message(Lang::Ru));
        assert_eq!(s.generator.calls.load(Ordering::SeqCst), 0);
        assert!(s.store.logs("a@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_tenant_fixed_message() {
        let s = setup(CountingGenerator::ok()).await;
        // Host misses, default tenant has no record.
        let answer = s.engine.answer(None, Some("x.com"), "hi", Lang::En).await;
        assert_eq!(answer, not_configured_message(Lang::En));
        assert_eq!(s.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_returns_answer_and_appends_log() {
        let s = setup(CountingGenerator::ok()).await;
        s.docs.write("acme", "## FAQ\nОтпуск 28 дней.").unwrap();

        let answer = s.engine.answer(None, HOST, "Когда отпуск?", Lang::Ru).await;
        assert_eq!(answer, "Отпуск — 28 дней.");
        assert_eq!(s.generator.calls.load(Ordering::SeqCst), 1);

        let logs = s.store.logs("a@x.com").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].query, "Когда отпуск?");
        assert_eq!(logs[0].answer, "Отпуск — 28 дней.");
        assert_eq!(logs[0].lang, Lang::Ru);
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_connection_error() {
        let s = setup(CountingGenerator::failing()).await;
        s.docs.write("acme", "## FAQ\nText.").unwrap();

        let answer = s.engine.answer(None, HOST, "Olá?", Lang::Pt).await;
        assert_eq!(answer, connection_error_message(Lang::Pt));
        // Nothing is logged for failed exchanges.
        assert!(s.store.logs("a@x.com").await.unwrap().is_empty());
    }

    #[test]
    fn test_system_instruction_embeds_language_and_context() {
        let instruction = build_system_instruction(Lang::Pt, "the docs body");
        assert!(instruction.contains("strictly in Portuguese"));
        assert!(instruction.contains("the docs body"));
        assert!(instruction.contains("translating as needed"));
        assert!(instruction.to_lowercase().contains("signatures"));
    }
}
