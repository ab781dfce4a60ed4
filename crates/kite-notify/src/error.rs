//! Error types for the outbound sinks.

use thiserror::Error;

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} answered {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("sink rejected the request: {0}")]
    Rejected(String),
}
