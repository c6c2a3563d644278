//! # Protocol Errors

use thiserror::Error;

/// Failures while decoding or framing a change event
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid vector payload: {0:?}")]
    InvalidVector(String),

    #[error("invalid create payload, expected `pos|rot|scale`: {0:?}")]
    InvalidComposite(String),

    #[error("unknown primitive shape: {0}")]
    UnknownShape(String),

    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("frame is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("empty field: {0}")]
    EmptyField(&'static str),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
