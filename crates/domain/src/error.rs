//! Shared error type used across all muxd crates.
//!
//! Variants map directly onto the error `kind` values the Daemon Server
//! renders to clients; Store/Loop/Server all propagate this type with `?`
//! so the HTTP layer can convert it to a status code without re-deriving
//! the kind from a string.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("provider rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("canceled")]
    Canceled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The client-facing error kind string (see spec §7).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Other(_) | Error::Config(_) => "internal",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Validation(_) => "validation",
            Error::Auth(_) => "auth",
            Error::Provider { .. } => "provider_error",
            Error::RateLimited { .. } => "provider_rate_limited",
            Error::Canceled => "canceled",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
