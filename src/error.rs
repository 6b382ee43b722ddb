use std::error::Error;

/// Failures talking to the study backend.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Non-success status, or a success without a readable body.
    #[error("Request failed ({status}). {body}")]
    Status { status: u16, body: String },
}

/// Failures surfaced while consuming an event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Stream read failed: {0}")]
    Transport(Box<dyn Error + Send + Sync>),

    #[error("Malformed result payload: {0}")]
    MalformedResult(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
