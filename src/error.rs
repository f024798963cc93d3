use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlBuddyError {
    /// LLM output could not be turned into SQL (or analysis text)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Transient provider failure: network, rate limit, server side error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider refused the request (authentication, bad request, content policy)
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("Provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    #[error("Unsafe query: {0}")]
    UnsafeQuery(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SqlBuddyError {
    /// Whether retrying the same provider call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SqlBuddyError::Provider(_) | SqlBuddyError::ProviderTimeout(_)
        )
    }
}

impl From<sqlx::Error> for SqlBuddyError {
    fn from(err: sqlx::Error) -> Self {
        SqlBuddyError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for SqlBuddyError {
    fn from(err: reqwest::Error) -> Self {
        SqlBuddyError::Provider(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SqlBuddyError>;
