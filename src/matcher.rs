//! Keyword matching against an image's detections.
//!
//! Pure functions, no I/O. Matching is a case-insensitive substring test,
//! evaluated independently for every (keyword, detection) pair.

use serde::{Deserialize, Serialize};

use crate::detection::{ImageDetectionSet, TextDetection};

/// Detections hit by one keyword, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordMatch {
    pub keyword: String,
    pub matches: Vec<TextDetection>,
}

/// Every keyword's matches for one image. Archived as-is, geometry included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMatchResult {
    pub image_key: String,
    pub matches_by_keyword: Vec<KeywordMatch>,
}

impl ImageMatchResult {
    /// Total hits across all keywords (a detection hit twice counts twice).
    pub fn hit_count(&self) -> usize {
        self.matches_by_keyword.iter().map(|k| k.matches.len()).sum()
    }
}

/// Match every keyword against every detection.
///
/// Produces one [`KeywordMatch`] per keyword in caller order, even when it has
/// no hits.
pub fn find_matches(set: &ImageDetectionSet, keywords: &[String]) -> ImageMatchResult {
    // Lower-case each detection once, not once per keyword.
    let lowered: Vec<String> = set.detections.iter().map(|d| d.text.to_lowercase()).collect();

    let matches_by_keyword = keywords
        .iter()
        .map(|keyword| {
            let needle = keyword.to_lowercase();
            let matches = set
                .detections
                .iter()
                .zip(&lowered)
                .filter(|(_, text)| text.contains(&needle))
                .map(|(det, _)| det.clone())
                .collect();
            KeywordMatch {
                keyword: keyword.clone(),
                matches,
            }
        })
        .collect();

    ImageMatchResult {
        image_key: set.image_key.clone(),
        matches_by_keyword,
    }
}
