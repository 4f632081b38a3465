use thiserror::Error;

pub type Result<T> = std::result::Result<T, MastodonError>;

#[derive(Debug, Error)]
pub enum MastodonError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for MastodonError {
    fn from(err: reqwest::Error) -> Self {
        MastodonError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for MastodonError {
    fn from(err: serde_json::Error) -> Self {
        MastodonError::Parse(err.to_string())
    }
}
