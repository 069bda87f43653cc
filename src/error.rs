use thiserror::Error;

/// Errors produced across the service.
#[derive(Debug, Error)]
pub enum DeskError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("llm request failed: {0}")]
    Llm(#[from] reqwest::Error),

    #[error("malformed model response: {0}")]
    ModelResponse(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("vault error: {0}")]
    Vault(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
