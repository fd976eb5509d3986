//! Error taxonomy for the search-and-annotate pipeline.

use thiserror::Error;

/// Failures raised by the document and object stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed detection record for {image_key}: {source}")]
    InvalidRecord {
        image_key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("write failed for {path}: {message}")]
    Write { path: String, message: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failures of the annotator. Neither is retryable.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode annotated image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Request-level failures. Per-image problems never surface here; they are
/// recorded in the response instead.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to list images for user {user_id}: {source}")]
    ListImages {
        user_id: String,
        #[source]
        source: StoreError,
    },
    #[error("search did not finish within {0} seconds")]
    Timeout(u64),
    #[error("image task failed: {0}")]
    Task(String),
}
