//! Public HTTP surface.
//!
//! Every handler follows the same contract: extract credential/host, hand
//! them to the tenant resolver, call one core component, and map the result
//! to a status code. No domain logic lives here.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/api/register` | none | Create a tenant, issue a credential |
//! | `POST` | `/api/login` | none | Verify password, issue a credential |
//! | `GET`  | `/api/settings` | host-resolved | Public widget settings |
//! | `GET`  | `/api/tenant/settings` | bearer | Full tenant settings + caches |
//! | `POST` | `/api/tenant/settings` | bearer | Update mutable settings |
//! | `GET`  | `/api/tenant/document` | bearer | Raw knowledge-base document |
//! | `POST` | `/api/tenant/document` | bearer | Upload document, dispatch enrichment |
//! | `GET`  | `/api/suggestions` | host-resolved | Suggested questions |
//! | `POST` | `/api/chat` | host-resolved | Answer a visitor query |
//! | `GET`  | `/api/tenant/logs` | bearer | Conversation log |
//! | `DELETE` | `/api/tenant/logs` | bearer | Clear conversation log |
//! | `GET`  | `/api/admin/tenants` | bearer + admin | List all tenants |
//! | `GET`  | `/health` | none | Health check (returns version) |
//!
//! # Error Contract
//!
//! Auth and administrative endpoints answer failures with:
//!
//! ```json
//! { "error": { "code": "auth_failed", "message": "..." } }
//! ```
//!
//! Chat and suggestions never surface errors — they degrade to polite
//! strings and empty lists inside success-shaped bodies.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted: the widget is embedded
//! on arbitrary tenant sites.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::AnswerEngine;
use crate::auth;
use crate::config::Config;
use crate::document::DocumentStore;
use crate::enrich::Enricher;
use crate::error::Error;
use crate::models::{ConversationLogEntry, Lang, TenantRecord, TenantSettings};
use crate::notify::Notifier;
use crate::provision;
use crate::resolver;
use crate::store::TenantStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TenantStore>,
    pub docs: Arc<DocumentStore>,
    pub enricher: Enricher,
    pub answers: Arc<AnswerEngine>,
    pub notifier: Notifier,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/register", post(handle_register))
        .route("/api/login", post(handle_login))
        .route("/api/settings", get(handle_public_settings))
        .route(
            "/api/tenant/settings",
            get(handle_tenant_settings).post(handle_update_settings),
        )
        .route(
            "/api/tenant/document",
            get(handle_document_get).post(handle_document_upload),
        )
        .route("/api/suggestions", get(handle_suggestions))
        .route("/api/chat", post(handle_chat))
        .route(
            "/api/tenant/logs",
            get(handle_logs_get).delete(handle_logs_clear),
        )
        .route("/api/admin/tenants", get(handle_admin_tenants))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    tracing::info!(bind = %bind_addr, "ragdesk listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"auth_failed"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::Auth(_) => (StatusCode::UNAUTHORIZED, "auth_failed"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Conflict => (StatusCode::CONFLICT, "conflict"),
            Error::Upstream(_) | Error::Parse(_) => (StatusCode::BAD_GATEWAY, "upstream"),
            Error::Store(_) | Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Request helpers ============

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST)?.to_str().ok()
}

/// Subdomain labels: lowercase alphanumerics and inner dashes, max 63 chars.
fn valid_subdomain(subdomain: &str) -> bool {
    !subdomain.is_empty()
        && subdomain.len() <= 63
        && !subdomain.starts_with('-')
        && !subdomain.ends_with('-')
        && subdomain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Deserialize)]
struct LangQuery {
    #[serde(default)]
    lang: Lang,
}

// ============ POST /api/register, /api/login ============

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    subdomain: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    is_admin: bool,
}

async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::Validation("email must be a valid address".to_string()).into());
    }
    if req.password.len() < 8 {
        return Err(Error::Validation("password must be at least 8 characters".to_string()).into());
    }
    if !valid_subdomain(&req.subdomain) {
        return Err(Error::Validation(
            "subdomain must be lowercase alphanumerics and dashes".to_string(),
        )
        .into());
    }

    // Subdomain uniqueness: linear scan over tenant records.
    if state.store.get(&email).await?.is_some() {
        return Err(Error::AlreadyExists(email).into());
    }
    if state.store.find_by_subdomain(&req.subdomain).await?.is_some() {
        return Err(Error::AlreadyExists(format!("subdomain {}", req.subdomain)).into());
    }

    let password_hash = auth::hash_password(&req.password)?;
    let record = TenantRecord::new(&email, &password_hash, &req.subdomain);
    state.store.insert(record).await?;

    provision::provision_tenant(&state.config.provision, &req.subdomain);
    state
        .notifier
        .notify(format!("New tenant registered: {email} ({})", req.subdomain));

    let token = auth::issue_credential(&email, false, &state.config.auth)?;
    Ok(Json(AuthResponse {
        token,
        is_admin: false,
    }))
}

async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = req.email.trim().to_lowercase();
    let record = state
        .store
        .get(&email)
        .await?
        .ok_or_else(|| Error::Auth("invalid credentials".to_string()))?;

    if !auth::verify_password(&req.password, &record.password_hash)? {
        return Err(Error::Auth("invalid credentials".to_string()).into());
    }

    let token = auth::issue_credential(&record.identity, record.is_admin, &state.config.auth)?;
    Ok(Json(AuthResponse {
        token,
        is_admin: record.is_admin,
    }))
}

// ============ GET /api/settings ============

/// Public widget settings for the resolved tenant, in one language.
#[derive(Serialize)]
struct PublicSettingsResponse {
    business_name: Option<String>,
    suggestions: Vec<String>,
    detected_language: Option<Lang>,
    kb_exists: bool,
    public: bool,
    source_label: String,
}

async fn handle_public_settings(
    State(state): State<AppState>,
    Query(q): Query<LangQuery>,
    headers: HeaderMap,
) -> Result<Json<PublicSettingsResponse>, AppError> {
    let identity = resolver::resolve_identity(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
        request_host(&headers),
        false,
    )
    .await?;

    let response = match state.store.get(&identity).await? {
        Some(record) => PublicSettingsResponse {
            business_name: record.caches.business_name.get(&q.lang).cloned(),
            suggestions: record
                .caches
                .suggestions
                .get(&q.lang)
                .cloned()
                .unwrap_or_default(),
            detected_language: record.caches.detected_language,
            kb_exists: state.docs.exists(&record.subdomain),
            public: record.settings.public_by_default,
            source_label: record.settings.source_label.clone(),
        },
        None => PublicSettingsResponse {
            business_name: None,
            suggestions: Vec::new(),
            detected_language: None,
            kb_exists: false,
            public: false,
            source_label: String::new(),
        },
    };
    Ok(Json(response))
}

// ============ /api/tenant/settings ============

#[derive(Serialize)]
struct TenantSettingsResponse {
    identity: String,
    subdomain: String,
    is_admin: bool,
    settings: TenantSettings,
    caches: crate::models::EnrichmentCaches,
    kb_exists: bool,
}

async fn handle_tenant_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TenantSettingsResponse>, AppError> {
    let (_claims, record) = resolver::authenticate(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
    )
    .await?;

    let kb_exists = state.docs.exists(&record.subdomain);
    Ok(Json(TenantSettingsResponse {
        identity: record.identity,
        subdomain: record.subdomain,
        is_admin: record.is_admin,
        settings: record.settings,
        caches: record.caches,
        kb_exists,
    }))
}

#[derive(Deserialize)]
struct UpdateSettingsRequest {
    #[serde(default)]
    public_by_default: Option<bool>,
    #[serde(default)]
    source_label: Option<String>,
}

async fn handle_update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<TenantSettings>, AppError> {
    let (claims, _record) = resolver::authenticate(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
    )
    .await?;

    // Re-read inside the retry loop so a concurrent enrichment persist
    // cannot make us lose its caches (or it our settings).
    for _ in 0..3 {
        let mut record = state
            .store
            .get(&claims.sub)
            .await?
            .ok_or_else(|| Error::NotFound(format!("tenant {}", claims.sub)))?;

        if let Some(public) = req.public_by_default {
            record.settings.public_by_default = public;
        }
        if let Some(label) = &req.source_label {
            record.settings.source_label = label.trim().to_string();
        }

        match state.store.update(&record).await {
            Ok(_) => return Ok(Json(record.settings)),
            Err(Error::Conflict) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Conflict.into())
}

// ============ /api/tenant/document ============

#[derive(Serialize)]
struct DocumentResponse {
    content: String,
    document_hash: String,
}

async fn handle_document_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DocumentResponse>, AppError> {
    let (_claims, record) = resolver::authenticate(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
    )
    .await?;

    let content = state
        .docs
        .read(&record.subdomain)?
        .ok_or_else(|| Error::NotFound("document".to_string()))?;
    let document_hash = crate::document::content_hash(&content);
    Ok(Json(DocumentResponse {
        content,
        document_hash,
    }))
}

#[derive(Deserialize)]
struct UploadRequest {
    content: String,
}

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    document_hash: String,
}

/// Upload is acknowledged as soon as the document write lands; enrichment
/// runs in the background and the caches may lag behind.
async fn handle_document_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let (claims, record) = resolver::authenticate(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
    )
    .await?;

    let document_hash = state.docs.write(&record.subdomain, &req.content)?;
    state.enricher.spawn(claims.sub, req.content);

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            status: "accepted",
            document_hash,
        }),
    ))
}

// ============ GET /api/suggestions ============

#[derive(Serialize)]
struct SuggestionsResponse {
    suggestions: Vec<String>,
}

/// Polite endpoint: any failure degrades to an empty list, including a
/// malformed `lang` parameter.
async fn handle_suggestions(
    State(state): State<AppState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<SuggestionsResponse> {
    let lang = params
        .get("lang")
        .and_then(|v| Lang::parse(v))
        .unwrap_or_default();
    let resolved = resolver::resolve_identity(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
        request_host(&headers),
        false,
    )
    .await;

    let suggestions = match resolved {
        Ok(identity) => match state.store.get(&identity).await {
            Ok(Some(record)) => record
                .caches
                .suggestions
                .get(&lang)
                .cloned()
                .unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "suggestions lookup failed");
                Vec::new()
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "suggestions resolution failed");
            Vec::new()
        }
    };

    Json(SuggestionsResponse { suggestions })
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default)]
    lang: Lang,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
}

/// Polite endpoint: always 200 with an answer string.
async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let answer = state
        .answers
        .answer(
            bearer_token(&headers),
            request_host(&headers),
            &req.query,
            req.lang,
        )
        .await;
    Json(ChatResponse { answer })
}

// ============ /api/tenant/logs ============

#[derive(Serialize)]
struct LogsResponse {
    entries: Vec<ConversationLogEntry>,
}

async fn handle_logs_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LogsResponse>, AppError> {
    let (claims, _record) = resolver::authenticate(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
    )
    .await?;

    let entries = state.store.logs(&claims.sub).await?;
    Ok(Json(LogsResponse { entries }))
}

async fn handle_logs_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let (claims, _record) = resolver::authenticate(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
    )
    .await?;

    state.store.clear_logs(&claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ GET /api/admin/tenants ============

#[derive(Serialize)]
struct AdminTenantSummary {
    identity: String,
    subdomain: String,
    is_admin: bool,
    kb_exists: bool,
    version: u64,
}

#[derive(Serialize)]
struct AdminTenantsResponse {
    tenants: Vec<AdminTenantSummary>,
}

async fn handle_admin_tenants(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminTenantsResponse>, AppError> {
    let (claims, _record) = resolver::authenticate(
        state.store.as_ref(),
        &state.config,
        bearer_token(&headers),
    )
    .await?;
    resolver::require_admin(&claims)?;

    let tenants = state
        .store
        .list()
        .await?
        .into_iter()
        .map(|r| AdminTenantSummary {
            kb_exists: state.docs.exists(&r.subdomain),
            identity: r.identity,
            subdomain: r.subdomain,
            is_admin: r.is_admin,
            version: r.version,
        })
        .collect();

    Ok(Json(AdminTenantsResponse { tenants }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_valid_subdomain() {
        assert!(valid_subdomain("acme"));
        assert!(valid_subdomain("acme-2"));
        assert!(!valid_subdomain(""));
        assert!(!valid_subdomain("-acme"));
        assert!(!valid_subdomain("acme-"));
        assert!(!valid_subdomain("Acme"));
        assert!(!valid_subdomain("ac me"));
        assert!(!valid_subdomain("дом"));
        assert!(!valid_subdomain(&"a".repeat(64)));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases: Vec<(Error, StatusCode)> = vec![
            (Error::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (Error::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::AlreadyExists("x".into()), StatusCode::CONFLICT),
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::Conflict, StatusCode::CONFLICT),
            (Error::Upstream("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
