//! Tenant resolution.
//!
//! Maps an inbound request to exactly one tenant identity through an ordered
//! rule list: verified credential → host-pattern match → fixed default
//! tenant. The resolver only reads from the store — it is side-effect-free
//! and idempotent, and is invoked on every request that needs tenant context
//! (settings reads, suggestions, chat).

use crate::auth::{self, Claims};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::TenantRecord;
use crate::store::TenantStore;

/// Reserved third-from-last host label marking tenant widget hosts
/// (`<subdomain>.rag.<domain>.<tld>`).
pub const RESERVED_HOST_MARKER: &str = "rag";

/// Extract the tenant subdomain from a request host, if the host matches the
/// `<subdomain>.rag.<domain>.<tld>` pattern: at least four labels, with the
/// third-from-last equal to the reserved marker.
pub fn subdomain_from_host(host: &str) -> Option<&str> {
    let host = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 4
        && labels[labels.len() - 3].eq_ignore_ascii_case(RESERVED_HOST_MARKER)
        && !labels[0].is_empty()
    {
        Some(labels[0])
    } else {
        None
    }
}

/// Resolve a request to one tenant identity.
///
/// With a valid credential the identity is its verified subject, regardless
/// of host. An invalid or expired credential fails with `Error::Auth` when
/// `required`, and silently degrades to host resolution otherwise. Host
/// resolution scans tenant records for the subdomain; a miss (or a
/// non-matching host) falls back to the configured default tenant.
pub async fn resolve_identity(
    store: &dyn TenantStore,
    config: &Config,
    credential: Option<&str>,
    host: Option<&str>,
    required: bool,
) -> Result<String> {
    match credential {
        Some(token) => match auth::verify_credential(token, &config.auth) {
            Ok(claims) => return Ok(claims.sub),
            Err(e) if required => return Err(e),
            Err(_) => {}
        },
        None if required => return Err(Error::Auth("missing credential".to_string())),
        None => {}
    }

    if let Some(host) = host {
        if let Some(subdomain) = subdomain_from_host(host) {
            if let Some(record) = store.find_by_subdomain(subdomain).await? {
                return Ok(record.identity);
            }
        }
    }

    Ok(config.tenancy.default_tenant.clone())
}

/// Authenticate a bearer credential and load the tenant record behind it.
///
/// Used by the tenant-scoped endpoints, which have no host fallback.
pub async fn authenticate(
    store: &dyn TenantStore,
    config: &Config,
    credential: Option<&str>,
) -> Result<(Claims, TenantRecord)> {
    let token = credential.ok_or_else(|| Error::Auth("missing credential".to_string()))?;
    let claims = auth::verify_credential(token, &config.auth)?;
    let record = store
        .get(&claims.sub)
        .await?
        .ok_or_else(|| Error::NotFound(format!("tenant {}", claims.sub)))?;
    Ok((claims, record))
}

/// Reject non-administrative callers of administrative operations.
pub fn require_admin(claims: &Claims) -> Result<()> {
    if claims.admin {
        Ok(())
    } else {
        Err(Error::Forbidden(
            "administrative credential required".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthConfig, Config, ContextConfig, DocumentsConfig, GenerationConfig, NotifyConfig,
        ProvisionConfig, ServerConfig, StoreConfig, TenancyConfig,
    };
    use crate::store::MemoryTenantStore;

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
                secret: "resolver-test-secret".to_string(),
                token_ttl_days: 30,
            },
            tenancy: TenancyConfig::default(),
            context: ContextConfig::default(),
            generation: GenerationConfig::default(),
            notify: NotifyConfig::default(),
            provision: ProvisionConfig::default(),
        }
    }

    async fn store_with_acme() -> MemoryTenantStore {
        let store = MemoryTenantStore::new();
        store
            .insert(TenantRecord::new("a@x.com", "hash", "acme"))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_subdomain_pattern() {
        assert_eq!(subdomain_from_host("acme.rag.example.com"), Some("acme"));
        assert_eq!(subdomain_from_host("acme.rag.example.com:8006"), Some("acme"));
        assert_eq!(subdomain_from_host("acme.RAG.example.co.uk"), Some("acme"));
        // Marker not in third-from-last position, or too few labels.
        assert_eq!(subdomain_from_host("acme.www.example.com"), None);
        assert_eq!(subdomain_from_host("rag.example.com"), None);
        assert_eq!(subdomain_from_host("example.com"), None);
        assert_eq!(subdomain_from_host("localhost"), None);
    }

    #[tokio::test]
    async fn test_credential_wins_over_host() {
        let store = store_with_acme().await;
        let config = test_config();
        store
            .insert(TenantRecord::new("b@x.com", "hash", "beta"))
            .await
            .unwrap();
        let token = auth::issue_credential("b@x.com", false, &config.auth).unwrap();

        let identity = resolve_identity(
            &store,
            &config,
            Some(&token),
            Some("acme.rag.example.com"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(identity, "b@x.com");
    }

    #[tokio::test]
    async fn test_registered_subdomain_resolves_owner() {
        let store = store_with_acme().await;
        let config = test_config();
        let identity =
            resolve_identity(&store, &config, None, Some("acme.rag.example.com"), false)
                .await
                .unwrap();
        assert_eq!(identity, "a@x.com");
    }

    #[tokio::test]
    async fn test_non_matching_host_falls_back_to_default() {
        let store = store_with_acme().await;
        let config = test_config();
        for host in ["acme.www.example.com", "unknown.rag.example.com", "x.com"] {
            let identity = resolve_identity(&store, &config, None, Some(host), false)
                .await
                .unwrap();
            assert_eq!(identity, config.tenancy.default_tenant, "{host}");
        }
    }

    #[tokio::test]
    async fn test_invalid_credential_required_fails() {
        let store = store_with_acme().await;
        let config = test_config();
        let err = resolve_identity(&store, &config, Some("garbage"), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn test_invalid_credential_optional_degrades_to_host() {
        let store = store_with_acme().await;
        let config = test_config();
        let identity = resolve_identity(
            &store,
            &config,
            Some("garbage"),
            Some("acme.rag.example.com"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(identity, "a@x.com");
    }

    #[tokio::test]
    async fn test_authenticate_loads_record_and_flags() {
        let store = store_with_acme().await;
        let config = test_config();
        let token = auth::issue_credential("a@x.com", false, &config.auth).unwrap();

        let (claims, record) = authenticate(&store, &config, Some(&token)).await.unwrap();
        assert_eq!(record.subdomain, "acme");
        assert!(require_admin(&claims).is_err());
    }
}
