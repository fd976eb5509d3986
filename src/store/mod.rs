//! Storage collaborators behind the search pipeline.
//!
//! [`DetectionStore`] serves stored OCR records, [`ObjectStore`] serves the
//! original images and receives annotated copies plus the archived detail.
//! Backends are picked at startup via `STORE_BACKEND`.

pub mod memory;
pub mod supabase;

use crate::annotate::EncodedImage;
use crate::detection::ImageDetectionSet;
use crate::error::StoreError;
use crate::matcher::ImageMatchResult;

/// Source of per-image OCR records.
#[async_trait::async_trait]
pub trait DetectionStore: Send + Sync {
    fn name(&self) -> &str;

    /// Image keys with a stored record for this user, in stable order.
    async fn list_images(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// Fails with [`StoreError::NotFound`] when the image has no record.
    async fn get_detections(
        &self,
        user_id: &str,
        image_key: &str,
    ) -> Result<ImageDetectionSet, StoreError>;
}

/// Blob storage for original and annotated images and archived results.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get_image(&self, user_id: &str, image_key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put_image(
        &self,
        user_id: &str,
        run_id: &str,
        image_key: &str,
        image: &EncodedImage,
    ) -> Result<(), StoreError>;

    async fn put_detail(
        &self,
        user_id: &str,
        run_id: &str,
        results: &[ImageMatchResult],
    ) -> Result<(), StoreError>;
}

/// Known backend identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreBackendKind {
    Supabase,
    Memory,
}

impl StoreBackendKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "supabase" => Some(Self::Supabase),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Original upload, relative to the uploads bucket.
pub fn upload_path(user_id: &str, image_key: &str) -> String {
    format!("{}/{}", user_id, image_key)
}

/// Annotated copy, relative to the results bucket.
pub fn annotated_path(user_id: &str, run_id: &str, image_key: &str) -> String {
    format!("{}/{}/{}.png", user_id, run_id, image_key)
}

/// Archived match detail, relative to the results bucket.
pub fn detail_path(user_id: &str, run_id: &str) -> String {
    format!("{}/{}/search_results.json", user_id, run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(upload_path("u1", "a.jpg"), "u1/a.jpg");
        assert_eq!(annotated_path("u1", "1700000000000", "a.jpg"), "u1/1700000000000/a.jpg.png");
        assert_eq!(detail_path("u1", "42"), "u1/42/search_results.json");
    }

    #[test]
    fn test_backend_kind() {
        assert_eq!(StoreBackendKind::from_str("memory"), Some(StoreBackendKind::Memory));
        assert_eq!(StoreBackendKind::from_str("supabase"), Some(StoreBackendKind::Supabase));
        assert_eq!(StoreBackendKind::from_str("dynamo"), None);
    }
}
