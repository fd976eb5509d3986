//! Keyword Annotator - searches a user's OCR results for keywords and outlines the hits.

mod annotate;
mod config;
mod detection;
mod error;
mod matcher;
mod search;
mod store;
mod summary;
mod timing;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::{BackendSettings, Settings};
use error::SearchError;
use search::{SearchRequest, SearchResponse, SearchService};
use store::memory::MemoryStore;
use store::supabase::SupabaseStore;
use store::{DetectionStore, ObjectStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    search: SearchService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "keyword_annotator=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    info!(
        "Search settings: concurrency={}, timeout={:?}, include_lines={}",
        settings.search.concurrency,
        settings.search.timeout_secs,
        settings.search.annotate.include_lines
    );

    let (detections, objects) = match &settings.backend {
        BackendSettings::Supabase(supabase) => {
            let store = Arc::new(SupabaseStore::new(reqwest::Client::new(), supabase));
            info!("Supabase store initialized ({})", supabase.url);
            let detections: Arc<dyn DetectionStore> = store.clone();
            let objects: Arc<dyn ObjectStore> = store;
            (detections, objects)
        }
        BackendSettings::Memory { fixtures_dir } => {
            let store = match fixtures_dir {
                Some(dir) => MemoryStore::load_from_dir(dir)?,
                None => {
                    warn!("Memory store without MEMORY_FIXTURES_DIR; every user has zero images");
                    MemoryStore::new()
                }
            };
            let store = Arc::new(store);
            let detections: Arc<dyn DetectionStore> = store.clone();
            let objects: Arc<dyn ObjectStore> = store;
            (detections, objects)
        }
    };

    let state = AppState {
        search: SearchService::new(detections, objects, settings.search),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/search", post(search_images))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Search a user's images for keywords.
async fn search_images(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let Json(request) = body.map_err(|e| {
        warn!("Rejected search request: {}", e);
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    })?;

    state.search.run(&request).await.map(Json).map_err(|e| {
        let status = status_for(&e);
        if status.is_server_error() {
            error!("Search failed for user {}: {}", request.user_id, e);
        } else {
            warn!("Rejected search request: {}", e);
        }
        (status, e.to_string())
    })
}

fn status_for(err: &SearchError) -> StatusCode {
    match err {
        SearchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SearchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        SearchError::ListImages { .. } | SearchError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&SearchError::InvalidInput("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&SearchError::Timeout(5)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&SearchError::Task("panicked".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_handler_rejects_blank_user() {
        let state = AppState {
            search: SearchService::new(
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryStore::new()),
                config::SearchSettings::default(),
            ),
        };
        let body = Ok(Json(SearchRequest {
            user_id: String::new(),
            keywords: vec!["invoice".to_string()],
        }));

        let (status, _) = search_images(State(state), body).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
