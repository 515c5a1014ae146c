use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    InvalidDocument(String),

    #[error("{0}")]
    Extraction(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Record {0} not found")]
    NotFound(i64),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, ScannerError>;
