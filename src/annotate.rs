//! Outline rendering for matched detections.
//!
//! Two stages: [`plan_outlines`] turns match results into pixel-space polygons,
//! [`render_outlines`] strokes them onto a canvas. Only the first stage knows
//! about normalized coordinates.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::detection::DetectionType;
use crate::error::AnnotateError;
use crate::matcher::ImageMatchResult;

/// Stroke used for every outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationStyle {
    #[serde(default = "default_color")]
    pub color: [u8; 4],
    #[serde(default = "default_thickness")]
    pub thickness: u32,
}

fn default_color() -> [u8; 4] {
    [255, 0, 0, 255]
}

fn default_thickness() -> u32 {
    4
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            color: default_color(),
            thickness: default_thickness(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotateOptions {
    /// Also outline LINE detections. Upstream line geometry is unreliable for
    /// multi-word lines, so this is off unless configured.
    pub include_lines: bool,
    pub style: AnnotationStyle,
}

/// A polygon to stroke, already in pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    pub keyword: String,
    pub text: String,
    pub points: Vec<(f32, f32)>,
}

/// Re-encoded image ready to persist.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Flatten match results into pixel-space outlines.
///
/// A detection matched by several keywords yields one outline per keyword.
pub fn plan_outlines(
    result: &ImageMatchResult,
    width: u32,
    height: u32,
    include_lines: bool,
) -> Vec<Outline> {
    result
        .matches_by_keyword
        .iter()
        .flat_map(|k| k.matches.iter().map(move |d| (k.keyword.as_str(), d)))
        .filter(|(_, d)| d.detection_type == DetectionType::Word || include_lines)
        .map(|(keyword, d)| Outline {
            keyword: keyword.to_string(),
            text: d.text.clone(),
            points: d
                .polygon()
                .iter()
                .map(|p| p.to_pixels(width, height))
                .collect(),
        })
        .collect()
}

/// Whether `plan_outlines` would yield at least one outline.
pub fn has_outlines(result: &ImageMatchResult, include_lines: bool) -> bool {
    result
        .matches_by_keyword
        .iter()
        .flat_map(|k| k.matches.iter())
        .any(|d| d.detection_type == DetectionType::Word || include_lines)
}

/// Stroke every outline as a closed polygon.
pub fn render_outlines(canvas: &mut RgbaImage, outlines: &[Outline], style: &AnnotationStyle) {
    let color = Rgba(style.color);
    let thickness = style.thickness.max(1);
    let radius = (thickness / 2) as i32;

    for outline in outlines {
        let points = &outline.points;
        if points.is_empty() {
            continue;
        }
        trace!(
            "Outlining '{}' for keyword '{}' ({} points)",
            outline.text,
            outline.keyword,
            points.len()
        );

        for (i, &start) in points.iter().enumerate() {
            let end = points[(i + 1) % points.len()];
            stroke_segment(canvas, start, end, thickness, color);
            if radius > 0 {
                draw_filled_circle_mut(
                    canvas,
                    (start.0.round() as i32, start.1.round() as i32),
                    radius,
                    color,
                );
            }
        }
    }
}

/// Draw a segment `thickness` pixels wide as parallel one-pixel lines.
fn stroke_segment(
    canvas: &mut RgbaImage,
    start: (f32, f32),
    end: (f32, f32),
    thickness: u32,
    color: Rgba<u8>,
) {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return;
    }
    let (nx, ny) = (-dy / len, dx / len);
    let center = (thickness as f32 - 1.0) / 2.0;

    for k in 0..thickness {
        let off = k as f32 - center;
        draw_line_segment_mut(
            canvas,
            (start.0 + nx * off, start.1 + ny * off),
            (end.0 + nx * off, end.1 + ny * off),
            color,
        );
    }
}

/// Draw outlines for every matched detection over a copy of `original`.
pub fn annotate(original: &RgbaImage, result: &ImageMatchResult, options: &AnnotateOptions) -> RgbaImage {
    let (width, height) = original.dimensions();
    let outlines = plan_outlines(result, width, height, options.include_lines);
    debug!(
        "Annotating {} ({}x{}) with {} outlines",
        result.image_key,
        width,
        height,
        outlines.len()
    );

    let mut canvas = original.clone();
    render_outlines(&mut canvas, &outlines, &options.style);
    canvas
}

/// Decode an image, annotate it and re-encode it as PNG.
pub fn annotate_bytes(
    data: &[u8],
    result: &ImageMatchResult,
    options: &AnnotateOptions,
) -> Result<EncodedImage, AnnotateError> {
    let original = image::load_from_memory(data)
        .map_err(AnnotateError::Decode)?
        .to_rgba8();

    let annotated = annotate(&original, result, options);
    let (width, height) = annotated.dimensions();

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(annotated)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(AnnotateError::Encode)?;

    Ok(EncodedImage {
        bytes,
        content_type: "image/png",
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{ImageDetectionSet, Point, TextDetection};
    use crate::matcher::find_matches;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.25, 0.2),
            Point::new(0.75, 0.2),
            Point::new(0.75, 0.8),
            Point::new(0.25, 0.8),
        ]
    }

    fn result_for(detections: Vec<TextDetection>, keywords: &[&str]) -> ImageMatchResult {
        let set = ImageDetectionSet::new("img.png", detections);
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        find_matches(&set, &keywords)
    }

    #[test]
    fn test_plan_denormalizes() {
        let result = result_for(
            vec![TextDetection::new("mid", DetectionType::Word, vec![Point::new(0.5, 0.5)])],
            &["mid"],
        );
        let outlines = plan_outlines(&result, 200, 100, false);
        assert_eq!(outlines.len(), 1);
        assert_eq!(outlines[0].points, vec![(100.0, 50.0)]);
        assert_eq!(outlines[0].keyword, "mid");
    }

    #[test]
    fn test_plan_skips_lines_unless_enabled() {
        let result = result_for(
            vec![
                TextDetection::new("total due", DetectionType::Line, square()),
                TextDetection::new("total", DetectionType::Word, square()),
            ],
            &["total"],
        );
        let words_only = plan_outlines(&result, 100, 100, false);
        assert_eq!(words_only.len(), 1);
        assert_eq!(words_only[0].text, "total");

        assert_eq!(plan_outlines(&result, 100, 100, true).len(), 2);
    }

    #[test]
    fn test_has_outlines_follows_line_setting() {
        let lines_only = result_for(
            vec![TextDetection::new("total due", DetectionType::Line, square())],
            &["total"],
        );
        assert!(!has_outlines(&lines_only, false));
        assert!(has_outlines(&lines_only, true));

        let no_hits = result_for(vec![], &["total"]);
        assert!(!has_outlines(&no_hits, true));
    }

    #[test]
    fn test_plan_keeps_duplicates_across_keywords() {
        let result = result_for(
            vec![TextDetection::new("subtotal", DetectionType::Word, square())],
            &["sub", "total"],
        );
        let outlines = plan_outlines(&result, 100, 100, false);
        assert_eq!(outlines.len(), 2);
        assert_eq!(outlines[0].points, outlines[1].points);
    }

    #[test]
    fn test_annotate_draws_outline_only() {
        let original = RgbaImage::from_pixel(200, 100, WHITE);
        let result = result_for(
            vec![TextDetection::new("Invoice", DetectionType::Word, square())],
            &["invoice"],
        );

        let annotated = annotate(&original, &result, &AnnotateOptions::default());
        assert_eq!(annotated.dimensions(), (200, 100));
        // Top edge runs from (50, 20) to (150, 20).
        assert_eq!(*annotated.get_pixel(100, 20), RED);
        // Closing edge from (50, 80) back to (50, 20).
        assert_eq!(*annotated.get_pixel(50, 50), RED);
        assert_eq!(*annotated.get_pixel(100, 50), WHITE);
        assert_eq!(*annotated.get_pixel(5, 5), WHITE);
    }

    #[test]
    fn test_annotate_without_matches_is_unchanged() {
        let original = RgbaImage::from_pixel(40, 30, WHITE);
        let result = result_for(
            vec![TextDetection::new("Invoice", DetectionType::Word, square())],
            &["receipt"],
        );
        let annotated = annotate(&original, &result, &AnnotateOptions::default());
        assert_eq!(annotated, original);
    }

    #[test]
    fn test_annotate_bytes_roundtrip() {
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, WHITE))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let result = result_for(
            vec![TextDetection::new("Invoice", DetectionType::Word, square())],
            &["invoice"],
        );

        let encoded = annotate_bytes(&png, &result, &AnnotateOptions::default()).unwrap();
        assert_eq!(encoded.content_type, "image/png");
        assert_eq!((encoded.width, encoded.height), (200, 100));

        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgba8();
        assert_eq!(*decoded.get_pixel(100, 20), RED);
    }

    #[test]
    fn test_annotate_bytes_rejects_garbage() {
        let result = result_for(vec![], &["x"]);
        let err = annotate_bytes(b"not an image", &result, &AnnotateOptions::default()).unwrap_err();
        assert!(matches!(err, AnnotateError::Decode(_)));
    }
}
