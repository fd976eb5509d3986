//! Caller-facing reduction of match results. Geometry is dropped.

use serde::{Deserialize, Serialize};

use crate::detection::DetectionType;
use crate::matcher::ImageMatchResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    #[serde(rename = "type")]
    pub detection_type: DetectionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSummary {
    pub keyword: String,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSummary {
    pub image_key: String,
    pub summary: Vec<KeywordSummary>,
}

/// Reduce an image's matches to `{keyword, hits: [{text, type}]}`.
pub fn summarize(result: &ImageMatchResult) -> ImageSummary {
    let summary = result
        .matches_by_keyword
        .iter()
        .map(|k| KeywordSummary {
            keyword: k.keyword.clone(),
            hits: k
                .matches
                .iter()
                .map(|d| SearchHit {
                    text: d.text.clone(),
                    detection_type: d.detection_type,
                })
                .collect(),
        })
        .collect();

    ImageSummary {
        image_key: result.image_key.clone(),
        summary,
    }
}
