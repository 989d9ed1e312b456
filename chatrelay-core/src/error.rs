use thiserror::Error;

/// Core error type for chat-relay.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `RelayResult<T>` with this error.
///
/// `target` names the hop that failed: "openai" when talking to the upstream
/// model API, "relay" when a consumer talks to the relay itself.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited by {target}")]
    RateLimited {
        target: String,
        retry_after: Option<u64>,
    },

    #[error("{target} unreachable")]
    Unreachable { target: String },

    #[error("{target} rejected request: {code} {message}")]
    Rejected {
        target: String,
        code: String,
        message: String,
    },

    #[error("stream interrupted: {0}")]
    Interrupted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
