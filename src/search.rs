//! Search pipeline orchestrator.
//!
//! Each image is an independent task: fetch detections, match, summarize, then
//! best-effort annotate and store. Outcomes land in index-addressed slots so
//! the response and the archive keep the store's enumeration order whatever
//! order the tasks finish in.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::annotate::{annotate_bytes, has_outlines, AnnotateOptions};
use crate::config::SearchSettings;
use crate::error::SearchError;
use crate::matcher::{find_matches, ImageMatchResult};
use crate::store::{DetectionStore, ObjectStore};
use crate::summary::{summarize, ImageSummary};
use crate::timing::Timings;

/// Request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(alias = "UUID")]
    pub user_id: String,
    pub keywords: Vec<String>,
}

impl SearchRequest {
    /// Reject requests that cannot be served before touching any store.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.user_id.trim().is_empty() {
            return Err(SearchError::InvalidInput("userId must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    /// Every image was searched, but something was skipped or not persisted.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchDetections,
    FetchImage,
    Annotate,
    WriteImage,
    WriteDetail,
}

/// A per-image (or archive) problem that did not abort the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    pub stage: Stage,
    pub message: String,
}

impl Failure {
    fn new(image_key: Option<&str>, stage: Stage, err: impl std::fmt::Display) -> Self {
        Self {
            image_key: image_key.map(str::to_string),
            stage,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub per_image_summaries: Vec<ImageSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<Failure>,
    #[serde(skip_serializing_if = "Timings::is_empty")]
    pub timings: Timings,
}

/// Run identifier: milliseconds since the Unix epoch.
pub fn new_run_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .to_string()
}

/// Search-and-annotate service shared by all requests.
#[derive(Clone)]
pub struct SearchService {
    detections: Arc<dyn DetectionStore>,
    objects: Arc<dyn ObjectStore>,
    settings: SearchSettings,
}

impl SearchService {
    pub fn new(
        detections: Arc<dyn DetectionStore>,
        objects: Arc<dyn ObjectStore>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            detections,
            objects,
            settings,
        }
    }

    /// Search every image of the user, annotate matches and archive the detail.
    pub async fn run(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        request.validate()?;
        let run_id = new_run_id();

        info!(
            "Search run {} for user {} with keywords {:?} (detections={}, objects={})",
            run_id,
            request.user_id,
            request.keywords,
            self.detections.name(),
            self.objects.name()
        );

        match self.settings.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.execute(request, run_id))
                .await
                .map_err(|_| SearchError::Timeout(secs))?,
            None => self.execute(request, run_id).await,
        }
    }

    async fn execute(
        &self,
        request: &SearchRequest,
        run_id: String,
    ) -> Result<SearchResponse, SearchError> {
        let mut timings = Timings::new();
        let started = Instant::now();

        let start = Instant::now();
        let image_keys = self
            .detections
            .list_images(&request.user_id)
            .await
            .map_err(|source| SearchError::ListImages {
                user_id: request.user_id.clone(),
                source,
            })?;
        timings.record_since("list_images", start);
        info!("Run {}: {} images to search", run_id, image_keys.len());

        let user_id: Arc<str> = Arc::from(request.user_id.as_str());
        let run: Arc<str> = Arc::from(run_id.as_str());
        let keywords: Arc<[String]> = Arc::from(request.keywords.clone());
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));

        let mut slots: Vec<Option<ImageOutcome>> = image_keys.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, image_key) in image_keys.into_iter().enumerate() {
            let job = ImageJob {
                detections: Arc::clone(&self.detections),
                objects: Arc::clone(&self.objects),
                user_id: Arc::clone(&user_id),
                run_id: Arc::clone(&run),
                keywords: Arc::clone(&keywords),
                options: self.settings.annotate,
                image_key,
            };
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // The semaphore is never closed, so acquiring cannot fail.
                let _permit = semaphore.acquire_owned().await.ok();
                (index, job.process().await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| SearchError::Task(e.to_string()))?;
            slots[index] = Some(outcome);
        }

        let mut per_image_summaries = Vec::with_capacity(slots.len());
        let mut details = Vec::with_capacity(slots.len());
        let mut failures = Vec::new();

        for outcome in slots.into_iter().flatten() {
            if let Some((result, summary)) = outcome.searched {
                details.push(result);
                per_image_summaries.push(summary);
            }
            failures.extend(outcome.failures);
            timings.merge(outcome.timings);
        }

        let start = Instant::now();
        match self
            .objects
            .put_detail(&request.user_id, &run_id, &details)
            .await
        {
            Ok(()) => timings.record_since("put_detail", start),
            Err(e) => {
                warn!("Run {}: failed to archive search detail: {}", run_id, e);
                failures.push(Failure::new(None, Stage::WriteDetail, e));
            }
        }
        timings.record_since("total", started);

        let status = if failures.is_empty() {
            RunStatus::Ok
        } else {
            RunStatus::Degraded
        };

        info!(
            "Run {} finished: {} summaries, {} failures, timings {:?}",
            run_id,
            per_image_summaries.len(),
            failures.len(),
            timings
        );

        Ok(SearchResponse {
            run_id,
            status,
            per_image_summaries,
            failures,
            timings,
        })
    }
}

/// Everything one image task needs, owned so it can run on its own.
struct ImageJob {
    detections: Arc<dyn DetectionStore>,
    objects: Arc<dyn ObjectStore>,
    user_id: Arc<str>,
    run_id: Arc<str>,
    keywords: Arc<[String]>,
    options: AnnotateOptions,
    image_key: String,
}

#[derive(Default)]
struct ImageOutcome {
    /// `None` when the detections could not be loaded.
    searched: Option<(ImageMatchResult, ImageSummary)>,
    failures: Vec<Failure>,
    timings: Timings,
}

impl ImageJob {
    async fn process(self) -> ImageOutcome {
        let mut outcome = ImageOutcome::default();
        let key = self.image_key.as_str();

        let start = Instant::now();
        let set = match self.detections.get_detections(&self.user_id, key).await {
            Ok(set) => set,
            Err(e) => {
                warn!("{}/{}: detection fetch failed: {}", self.user_id, key, e);
                outcome.failures.push(Failure::new(Some(key), Stage::FetchDetections, e));
                return outcome;
            }
        };
        outcome.timings.record_since("get_detections", start);

        let result = Arc::new(find_matches(&set, &self.keywords));
        let summary = summarize(&result);
        debug!(
            "{}/{}: {} detections, {} hits",
            self.user_id,
            key,
            set.detections.len(),
            result.hit_count()
        );

        // Nothing to fetch or write when no hit would be drawn.
        if has_outlines(&result, self.options.include_lines) {
            if let Some(failure) = self
                .annotate_and_store(Arc::clone(&result), &mut outcome.timings)
                .await
            {
                warn!(
                    "{}/{}: annotation skipped at {:?}: {}",
                    self.user_id, key, failure.stage, failure.message
                );
                outcome.failures.push(failure);
            }
        }

        let result = Arc::try_unwrap(result).unwrap_or_else(|shared| (*shared).clone());
        outcome.searched = Some((result, summary));
        outcome
    }

    /// Fetch the original, draw outlines and store the copy.
    async fn annotate_and_store(
        &self,
        result: Arc<ImageMatchResult>,
        timings: &mut Timings,
    ) -> Option<Failure> {
        let key = self.image_key.as_str();

        let start = Instant::now();
        let original = match self.objects.get_image(&self.user_id, key).await {
            Ok(data) => data,
            Err(e) => return Some(Failure::new(Some(key), Stage::FetchImage, e)),
        };
        timings.record_since("get_image", start);

        let start = Instant::now();
        let options = self.options;
        let rendered =
            tokio::task::spawn_blocking(move || annotate_bytes(&original, &result, &options)).await;
        let encoded = match rendered {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(e)) => return Some(Failure::new(Some(key), Stage::Annotate, e)),
            Err(e) => return Some(Failure::new(Some(key), Stage::Annotate, e)),
        };
        timings.record_since("annotate", start);
        debug!(
            "{}/{}: annotated {}x{} ({} bytes)",
            self.user_id,
            key,
            encoded.width,
            encoded.height,
            encoded.bytes.len()
        );

        let start = Instant::now();
        if let Err(e) = self
            .objects
            .put_image(&self.user_id, &self.run_id, key, &encoded)
            .await
        {
            return Some(Failure::new(Some(key), Stage::WriteImage, e));
        }
        timings.record_since("put_image", start);

        None
    }
}
