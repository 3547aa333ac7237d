/// Shared error type used across all Baker Street crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("circuit breaker open for provider {provider}")]
    BreakerOpen { provider: String },

    #[error("invalid response shape: {0}")]
    InvalidResponseShape(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown model id: {0}")]
    UnknownModelId(String),

    #[error("tool: {0}")]
    Tool(String),

    #[error("store: {0}")]
    Store(String),

    #[error("bus: {0}")]
    Bus(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
