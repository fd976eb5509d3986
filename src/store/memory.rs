#![allow(dead_code)]
//! In-memory backend for tests and local runs.
//!
//! Records are kept as raw JSON so malformed fixtures fail the same way a
//! malformed row would.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use tracing::{debug, info};

use super::{annotated_path, detail_path, upload_path, DetectionStore, ObjectStore};
use crate::annotate::EncodedImage;
use crate::detection::{DetectionRecord, ImageDetectionSet};
use crate::error::StoreError;
use crate::matcher::ImageMatchResult;

#[derive(Debug, Default)]
struct Inner {
    /// user_id → image_key → record JSON. Sorted keys give a stable listing.
    records: HashMap<String, BTreeMap<String, String>>,
    /// Upload path → original image bytes.
    uploads: HashMap<String, Vec<u8>>,
    /// Result path → written bytes.
    results: BTreeMap<String, Vec<u8>>,
}

/// Detection and object store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    reject_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load fixtures laid out as `{dir}/{user_id}/{image_key}.json` (detection
    /// record) and `{dir}/{user_id}/{image_key}` (original image).
    pub fn load_from_dir(dir: &Path) -> anyhow::Result<Self> {
        if !dir.exists() {
            anyhow::bail!("Fixture directory does not exist: {:?}", dir);
        }

        let store = Self::new();
        for user_entry in std::fs::read_dir(dir)? {
            let user_dir = user_entry?.path();
            if !user_dir.is_dir() {
                continue;
            }
            let user_id = file_name(&user_dir)?;

            for entry in std::fs::read_dir(&user_dir)? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                let name = file_name(&path)?;

                if let Some(image_key) = name.strip_suffix(".json") {
                    let record = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read record: {:?}", path))?;
                    store.insert_record(&user_id, image_key, record);
                } else {
                    let data = std::fs::read(&path)
                        .with_context(|| format!("Failed to read image: {:?}", path))?;
                    store.insert_image(&user_id, &name, data);
                }
            }
        }

        let inner = store.read();
        let total: usize = inner.records.values().map(BTreeMap::len).sum();
        info!(
            "Loaded {} detection records for {} users from {:?}",
            total,
            inner.records.len(),
            dir
        );
        drop(inner);

        Ok(store)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a raw detection record.
    pub fn insert_record(&self, user_id: &str, image_key: &str, record: impl Into<String>) {
        self.write()
            .records
            .entry(user_id.to_string())
            .or_default()
            .insert(image_key.to_string(), record.into());
    }

    /// Store a detection set as a record.
    pub fn insert_detections(&self, user_id: &str, set: &ImageDetectionSet) {
        let record = DetectionRecord {
            text_detections: set.detections.clone(),
        };
        // Serializing plain structs of strings and floats cannot fail.
        let json = serde_json::to_string(&record).unwrap_or_default();
        self.insert_record(user_id, &set.image_key, json);
    }

    /// Store an original image.
    pub fn insert_image(&self, user_id: &str, image_key: &str, data: Vec<u8>) {
        self.write().uploads.insert(upload_path(user_id, image_key), data);
    }

    /// Make every subsequent write fail.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Bytes written to a result path, if any.
    pub fn result(&self, path: &str) -> Option<Vec<u8>> {
        self.read().results.get(path).cloned()
    }

    /// All result paths written so far, sorted.
    pub fn result_paths(&self) -> Vec<String> {
        self.read().results.keys().cloned().collect()
    }

    fn put_result(&self, path: String, data: Vec<u8>) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                path,
                message: "store is read-only".to_string(),
            });
        }
        debug!("MemoryStore: wrote '{}' ({} bytes)", path, data.len());
        self.write().results.insert(path, data);
        Ok(())
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("Invalid fixture path: {:?}", path))
}

#[async_trait::async_trait]
impl DetectionStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_images(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()
            .records
            .get(user_id)
            .map(|images| images.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_detections(
        &self,
        user_id: &str,
        image_key: &str,
    ) -> Result<ImageDetectionSet, StoreError> {
        let record = self
            .read()
            .records
            .get(user_id)
            .and_then(|images| images.get(image_key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("detections for {}/{}", user_id, image_key)))?;

        ImageDetectionSet::from_record_json(image_key, &record).map_err(|source| {
            StoreError::InvalidRecord {
                image_key: image_key.to_string(),
                source,
            }
        })
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_image(&self, user_id: &str, image_key: &str) -> Result<Vec<u8>, StoreError> {
        let path = upload_path(user_id, image_key);
        self.read()
            .uploads
            .get(&path)
            .cloned()
            .ok_or(StoreError::NotFound(path))
    }

    async fn put_image(
        &self,
        user_id: &str,
        run_id: &str,
        image_key: &str,
        image: &EncodedImage,
    ) -> Result<(), StoreError> {
        self.put_result(annotated_path(user_id, run_id, image_key), image.bytes.clone())
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
        self.put_result(path, body)
    }
}
