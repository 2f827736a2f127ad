//! Error types for the projection engine

use thiserror::Error;

/// Failures reading or writing the local key-value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key {0:?}")]
    InvalidKey(String),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures turning an exported design into a source raster
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source image is empty")]
    Empty,

    #[error("malformed data URL")]
    InvalidDataUrl,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}
