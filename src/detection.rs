#![allow(dead_code)]
//! Text detection records produced by the upstream OCR service.
//!
//! The serde layout follows the stored `DetectText` record, so a record read
//! from the document store and a record written to the archive share one shape.

use serde::{Deserialize, Serialize};

/// Granularity of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DetectionType {
    Line,
    Word,
}

/// A point in normalized image space: both coordinates are fractions of the
/// image width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(rename = "X")]
    pub x: f32,
    #[serde(rename = "Y")]
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Scale to pixel space for an image of the given size.
    pub fn to_pixels(self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }
}

/// Axis-aligned box, normalized like [`Point`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoundingBox {
    pub width: f32,
    pub height: f32,
    pub left: f32,
    pub top: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Geometry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub polygon: Vec<Point>,
}

/// One OCR finding (a word or a line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDetection {
    #[serde(rename = "DetectedText")]
    pub text: String,
    #[serde(rename = "Type")]
    pub detection_type: DetectionType,
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(rename = "ParentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u32>,
    #[serde(rename = "Confidence", default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(rename = "Geometry", default)]
    pub geometry: Geometry,
}

impl TextDetection {
    pub fn new(text: impl Into<String>, detection_type: DetectionType, polygon: Vec<Point>) -> Self {
        Self {
            text: text.into(),
            detection_type,
            id: None,
            parent_id: None,
            confidence: None,
            geometry: Geometry {
                bounding_box: None,
                polygon,
            },
        }
    }

    /// Outline of the detection; the closing edge back to the first point is implicit.
    pub fn polygon(&self) -> &[Point] {
        &self.geometry.polygon
    }
}

/// Body of a stored OCR record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(rename = "TextDetections", default)]
    pub text_detections: Vec<TextDetection>,
}

/// All detections for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDetectionSet {
    pub image_key: String,
    pub detections: Vec<TextDetection>,
}

impl ImageDetectionSet {
    pub fn new(image_key: impl Into<String>, detections: Vec<TextDetection>) -> Self {
        Self {
            image_key: image_key.into(),
            detections,
        }
    }

    /// Parse a stored record body.
    pub fn from_record_json(image_key: &str, json: &str) -> serde_json::Result<Self> {
        let record: DetectionRecord = serde_json::from_str(json)?;
        Ok(Self::new(image_key, record.text_detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{
        "TextDetections": [
            {
                "DetectedText": "Invoice 123",
                "Type": "LINE",
                "Id": 0,
                "Confidence": 99.1,
                "Geometry": {
                    "BoundingBox": {"Width": 0.4, "Height": 0.1, "Left": 0.1, "Top": 0.2},
                    "Polygon": [{"X": 0.1, "Y": 0.2}, {"X": 0.5, "Y": 0.2}, {"X": 0.5, "Y": 0.3}, {"X": 0.1, "Y": 0.3}]
                }
            },
            {
                "DetectedText": "Invoice",
                "Type": "WORD",
                "Id": 1,
                "ParentId": 0,
                "Geometry": {"Polygon": [{"X": 0.1, "Y": 0.2}, {"X": 0.3, "Y": 0.2}, {"X": 0.3, "Y": 0.3}]}
            }
        ]
    }"#;

    #[test]
    fn test_parse_record() {
        let set = ImageDetectionSet::from_record_json("a.jpg", RECORD).unwrap();
        assert_eq!(set.image_key, "a.jpg");
        assert_eq!(set.detections.len(), 2);

        let line = &set.detections[0];
        assert_eq!(line.text, "Invoice 123");
        assert_eq!(line.detection_type, DetectionType::Line);
        assert_eq!(line.polygon().len(), 4);
        assert!(line.geometry.bounding_box.is_some());

        let word = &set.detections[1];
        assert_eq!(word.detection_type, DetectionType::Word);
        assert_eq!(word.parent_id, Some(0));
        assert_eq!(word.polygon()[1], Point::new(0.3, 0.2));
    }

    #[test]
    fn test_missing_text_is_rejected() {
        let json = r#"{"TextDetections": [{"Type": "WORD"}]}"#;
        assert!(ImageDetectionSet::from_record_json("a.jpg", json).is_err());
    }

    #[test]
    fn test_serializes_in_record_shape() {
        let det = TextDetection::new("cat", DetectionType::Word, vec![Point::new(0.5, 0.25)]);
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["DetectedText"], "cat");
        assert_eq!(json["Type"], "WORD");
        assert_eq!(json["Geometry"]["Polygon"][0]["X"], 0.5);
        assert!(json.get("Id").is_none());
    }

    #[test]
    fn test_to_pixels() {
        assert_eq!(Point::new(0.5, 0.5).to_pixels(200, 100), (100.0, 50.0));
        assert_eq!(Point::new(0.0, 1.0).to_pixels(200, 100), (0.0, 100.0));
    }
}
