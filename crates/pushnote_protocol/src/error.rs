//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or encoding wire data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The text was not valid JSON, or could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The text was valid JSON but matched none of the known frame schemas.
    #[error("unrecognized frame: {0}")]
    UnknownFrame(String),

    /// A payload was structurally valid but semantically unusable.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl ProtocolError {
    /// Creates an unknown frame error, truncating long frame text.
    pub fn unknown_frame(text: &str) -> Self {
        const MAX: usize = 120;
        if text.len() <= MAX {
            return Self::UnknownFrame(text.to_string());
        }
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self::UnknownFrame(format!("{}...", &text[..end]))
    }
}
