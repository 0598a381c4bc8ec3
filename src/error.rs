//! Error types for the ragdesk core.

use thiserror::Error;

/// Domain error taxonomy.
///
/// `Upstream` and `Parse` never reach chat or suggestions callers as raw
/// errors — those paths degrade to fixed natural-language strings and log the
/// detail internally. Auth and administrative endpoints surface these as
/// structured `{error: {code, message}}` bodies.
#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Generation capability unreachable or returned a non-success status.
    #[error("upstream generation error: {0}")]
    Upstream(String),

    /// Generation capability responded, but not in the expected shape.
    #[error("unparsable generation response: {0}")]
    Parse(String),

    /// Versioned tenant-record write lost the race to a concurrent writer.
    #[error("stale tenant record version")]
    Conflict,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
