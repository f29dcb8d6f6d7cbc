use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolvaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("No handler registered for state {0}")]
    MissingHandler(String),

    #[error("Handler already registered for state {0}")]
    HandlerAlreadyRegistered(String),

    #[error("Circuit open, retry in {remaining_ms}ms")]
    CircuitOpen { remaining_ms: u64 },

    #[error("Phase {phase} failed after {attempts} attempt(s): {message}")]
    PhaseFailed {
        phase: String,
        attempts: u32,
        message: String,
    },

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Cache unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("Failed to decode cache payload: {0}")]
    Decode(String),
}
