use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown import source: {0}")]
    UnknownSource(String),

    #[error("unknown import status: {0}")]
    UnknownStatus(String),

    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("invalid month key: {0}")]
    InvalidMonth(String),
}
