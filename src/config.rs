//! Service configuration.
//!
//! Everything is read from the environment (after `.env` is loaded). The
//! annotation style may be overridden with a JSON file.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::annotate::{AnnotateOptions, AnnotationStyle};
use crate::store::StoreBackendKind;

const DEFAULT_TABLE: &str = "text_detections";
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Connection settings for the Supabase backend.
#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_role_key: String,
    pub table: String,
    pub uploads_bucket: String,
    pub results_bucket: String,
}

impl SupabaseSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: required("SUPABASE_URL")?,
            service_role_key: required("SUPABASE_SERVICE_ROLE_KEY")?,
            table: std::env::var("DB_TABLE_NAME").unwrap_or_else(|_| DEFAULT_TABLE.to_string()),
            uploads_bucket: required("UPLOADS_BUCKET_NAME")?,
            results_bucket: required("RESULTS_BUCKET_NAME")?,
        })
    }
}

#[derive(Debug, Clone)]
pub enum BackendSettings {
    Supabase(SupabaseSettings),
    Memory { fixtures_dir: Option<PathBuf> },
}

/// Knobs of the search pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSettings {
    /// Maximum number of images processed at once.
    pub concurrency: usize,
    /// Deadline for a whole request; `None` means no deadline.
    pub timeout_secs: Option<u64>,
    pub annotate: AnnotateOptions,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: None,
            annotate: AnnotateOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub backend: BackendSettings,
    pub search: SearchSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let backend_name = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "supabase".to_string());
        let backend = match StoreBackendKind::from_str(&backend_name) {
            Some(StoreBackendKind::Supabase) => BackendSettings::Supabase(SupabaseSettings::from_env()?),
            Some(StoreBackendKind::Memory) => BackendSettings::Memory {
                fixtures_dir: std::env::var("MEMORY_FIXTURES_DIR").ok().map(PathBuf::from),
            },
            None => anyhow::bail!("Unknown STORE_BACKEND: {}", backend_name),
        };

        let style = match std::env::var("ANNOTATION_STYLE_PATH") {
            Ok(path) => load_style(Path::new(&path))?,
            Err(_) => AnnotationStyle::default(),
        };

        let search = SearchSettings {
            concurrency: parse_var("SEARCH_CONCURRENCY")?
                .unwrap_or(DEFAULT_CONCURRENCY)
                .max(1),
            timeout_secs: parse_var("SEARCH_TIMEOUT_SECS")?,
            annotate: AnnotateOptions {
                include_lines: parse_var("ANNOTATE_INCLUDE_LINES")?.unwrap_or(false),
                style,
            },
        };

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            backend,
            search,
        })
    }
}

/// Load an annotation style from a JSON file. Missing fields keep their defaults.
pub fn load_style(path: &Path) -> Result<AnnotationStyle> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read annotation style: {:?}", path))?;
    let style: AnnotationStyle = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse annotation style: {:?}", path))?;
    info!("Loaded annotation style from {:?}: {:?}", path, style);
    Ok(style)
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| anyhow!("{} not set", name))
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_style_partial_override() {
        let path = std::env::temp_dir().join(format!("annotation-style-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"thickness": 6}"#).unwrap();

        let style = load_style(&path).unwrap();
        assert_eq!(style.thickness, 6);
        assert_eq!(style.color, AnnotationStyle::default().color);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_style_missing_file() {
        assert!(load_style(Path::new("/nonexistent/style.json")).is_err());
    }

    #[test]
    fn test_search_defaults() {
        let search = SearchSettings::default();
        assert_eq!(search.concurrency, 4);
        assert_eq!(search.timeout_secs, None);
        assert!(!search.annotate.include_lines);
    }
}
