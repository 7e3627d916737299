use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecsmithError {
    // Oracle errors
    #[error("Oracle request failed: {0}")]
    OracleRequest(String),

    #[error("Oracle response error: {0}")]
    OracleResponse(String),

    #[error("Oracle provider not supported: {0}")]
    UnsupportedProvider(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Catalog errors
    #[error("Block catalog error: {0}")]
    Catalog(String),

    #[error("Block catalog unavailable: {0}")]
    CatalogUnavailable(String),

    // Editor errors
    #[error("Preservation check failed: {0}")]
    Preservation(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpecsmithError>;
