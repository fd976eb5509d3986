//! Supabase backend: detection records in a PostgREST table, images and
//! archived results in Storage buckets.

use anyhow::anyhow;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info};

use super::{annotated_path, detail_path, upload_path, DetectionStore, ObjectStore};
use crate::annotate::EncodedImage;
use crate::config::SupabaseSettings;
use crate::detection::{DetectionRecord, ImageDetectionSet};
use crate::error::StoreError;
use crate::matcher::ImageMatchResult;

/// Supabase client for detections and storage objects.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_role_key: String,
    table: String,
    uploads_bucket: String,
    results_bucket: String,
}

#[derive(Debug, Deserialize)]
struct ImageKeyRow {
    image_key: String,
}

#[derive(Debug, Deserialize)]
struct DetectionRow {
    detections: serde_json::Value,
}

impl SupabaseStore {
    pub fn new(client: Client, settings: &SupabaseSettings) -> Self {
        Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            service_role_key: settings.service_role_key.clone(),
            table: settings.table.clone(),
            uploads_bucket: settings.uploads_bucket.clone(),
            results_bucket: settings.results_bucket.clone(),
        }
    }

    /// Helper: GET rows from the PostgREST API.
    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let url = format!("{}/rest/v1/{}", self.base_url, self.table);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .query(query)
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Supabase GET {} failed: {} - {}", self.table, status, text).into());
        }

        Ok(resp.json().await.map_err(anyhow::Error::from)?)
    }

    /// Storage object URL with each path segment percent-encoded, so keys
    /// containing `#`, `?` or `%` address the object rather than the URL.
    fn object_url(&self, bucket: &str, path: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&format!("{}/storage/v1/object", self.base_url))
            .map_err(anyhow::Error::from)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Supabase URL cannot be a base: {}", self.base_url))?
            .push(bucket)
            .extend(path.split('/'));
        Ok(url)
    }

    /// Upload (or overwrite) an object in the results bucket.
    async fn upload(&self, path: &str, content_type: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let url = self.object_url(&self.results_bucket, path)?;
        let size = body.len();

        let resp = self
            .client
            .post(url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Write {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Write {
                path: path.to_string(),
                message: format!("{} - {}", status, text),
            });
        }

        debug!("Uploaded {}/{} ({} bytes)", self.results_bucket, path, size);
        Ok(())
    }
}

/// Storage reports missing objects either as 404 or as a 400 with a
/// `not_found` error body.
fn is_missing_object(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND || (status == StatusCode::BAD_REQUEST && body.contains("not_found"))
}

/// The record column may hold either a JSON object or the record serialized
/// as a string.
fn parse_record(image_key: &str, value: serde_json::Value) -> Result<ImageDetectionSet, StoreError> {
    let parsed = match value {
        serde_json::Value::String(s) => ImageDetectionSet::from_record_json(image_key, &s),
        other => serde_json::from_value::<DetectionRecord>(other)
            .map(|r| ImageDetectionSet::new(image_key, r.text_detections)),
    };
    parsed.map_err(|source| StoreError::InvalidRecord {
        image_key: image_key.to_string(),
        source,
    })
}

#[async_trait::async_trait]
impl DetectionStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn list_images(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<ImageKeyRow> = self
            .get_rows(&[
                ("user_id", format!("eq.{}", user_id)),
                ("select", "image_key".to_string()),
                ("order", "image_key.asc".to_string()),
            ])
            .await?;

        info!("Found {} images for user {}", rows.len(), user_id);
        Ok(rows.into_iter().map(|r| r.image_key).collect())
    }

    async fn get_detections(
        &self,
        user_id: &str,
        image_key: &str,
    ) -> Result<ImageDetectionSet, StoreError> {
        let rows: Vec<DetectionRow> = self
            .get_rows(&[
                ("user_id", format!("eq.{}", user_id)),
                ("image_key", format!("eq.{}", image_key)),
                ("select", "detections".to_string()),
                ("limit", "1".to_string()),
            ])
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("detections for {}/{}", user_id, image_key)))?;

        parse_record(image_key, row.detections)
    }
}

#[async_trait::async_trait]
impl ObjectStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn get_image(&self, user_id: &str, image_key: &str) -> Result<Vec<u8>, StoreError> {
        let path = upload_path(user_id, image_key);
        let url = self.object_url(&self.uploads_bucket, &path)?;

        let resp = self
            .client
            .get(url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if is_missing_object(status, &text) {
                return Err(StoreError::NotFound(format!("{}/{}", self.uploads_bucket, path)));
            }
            return Err(anyhow!("Storage GET {} failed: {} - {}", path, status, text).into());
        }

        let bytes = resp.bytes().await.map_err(anyhow::Error::from)?;
        debug!("Fetched {}/{} ({} bytes)", self.uploads_bucket, path, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn put_image(
        &self,
        user_id: &str,
        run_id: &str,
        image_key: &str,
        image: &EncodedImage,
    ) -> Result<(), StoreError> {
        let path = annotated_path(user_id, run_id, image_key);
        self.upload(&path, image.content_type, image.bytes.clone()).await
    }

    async fn put_detail(
        &self,
        user_id: &str,
        run_id: &str,
        results: &[ImageMatchResult],
    ) -> Result<(), StoreError> {
        let path = detail_path(user_id, run_id);
        let body = serde_json::to_vec(results).map_err(|e| StoreError::Write {
            path: path.clone(),
            message: e.to_string(),
        })?;
        self.upload(&path, "application/json", body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_from_string_column() {
        let value = serde_json::Value::String(
            r#"{"TextDetections":[{"DetectedText":"cat","Type":"WORD"}]}"#.to_string(),
        );
        let set = parse_record("a.jpg", value).unwrap();
        assert_eq!(set.detections.len(), 1);
        assert_eq!(set.detections[0].text, "cat");
    }

    #[test]
    fn test_parse_record_from_json_column() {
        let value = serde_json::json!({"TextDetections": [{"DetectedText": "dog", "Type": "LINE"}]});
        let set = parse_record("b.jpg", value).unwrap();
        assert_eq!(set.image_key, "b.jpg");
        assert_eq!(set.detections[0].text, "dog");
    }

    #[test]
    fn test_parse_record_rejects_malformed() {
        let value = serde_json::json!({"TextDetections": [{"Type": "WORD"}]});
        assert!(matches!(
            parse_record("c.jpg", value),
            Err(StoreError::InvalidRecord { .. })
        ));
    }

    fn store(url: &str) -> SupabaseStore {
        let settings = SupabaseSettings {
            url: url.to_string(),
            service_role_key: "key".to_string(),
            table: "text_detections".to_string(),
            uploads_bucket: "uploads".to_string(),
            results_bucket: "results".to_string(),
        };
        SupabaseStore::new(Client::new(), &settings)
    }

    #[test]
    fn test_object_url_encodes_segments() {
        let store = store("https://proj.supabase.co/");
        let url = store.object_url("uploads", "user-1/scan #2?.jpg").unwrap();
        assert_eq!(
            url.as_str(),
            "https://proj.supabase.co/storage/v1/object/uploads/user-1/scan%20%232%3F.jpg"
        );
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);

        let url = store.object_url("results", "user-1/17/search_results.json").unwrap();
        assert_eq!(url.path(), "/storage/v1/object/results/user-1/17/search_results.json");
    }

    #[test]
    fn test_missing_object_detection() {
        assert!(is_missing_object(StatusCode::NOT_FOUND, ""));
        assert!(is_missing_object(
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":"404","error":"not_found"}"#
        ));
        assert!(!is_missing_object(StatusCode::BAD_REQUEST, "bad"));
        assert!(!is_missing_object(StatusCode::INTERNAL_SERVER_ERROR, "not_found"));
    }
}
