//! Detection-frame normalization.
//!
//! The backend stores per-frame detection output as free-shape
//! `raw_metadata_json`. Two detection shapes exist in the wild:
//!
//! 1. named fields: `{"x": 10, "y": 20, "width": 30, "height": 40,
//!    "confidence": 0.9}`
//! 2. packed array: `{"bbox": [10, 20, 30, 40], "score": 0.9}`
//!
//! Precedence: a named field wins over its `bbox`/`score` counterpart; any
//! numeric still missing defaults to zero. Frame-level confidence is the one
//! exception to zero-defaulting: when absent it stays `None` so "unknown" is
//! distinguishable from "zero confidence".

use serde_json::Value;

use crate::api::FrameStatRecord;

/// One detected person, canonical shape.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectionBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
}

/// One normalized frame of the detection sequence, ordered by timestamp.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSample {
    /// Seconds from session start.
    pub timestamp: f64,
    pub count: u32,
    pub confidence: Option<f64>,
    pub detections: Vec<DetectionBox>,
}

pub fn normalize_frames(records: &[FrameStatRecord]) -> Vec<DetectionSample> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| normalize_frame(record, index))
        .collect()
}

/// A frame without `timestamp_relative` falls back to its list index; a frame
/// without `detected_passengers` falls back to the number of detections.
pub fn normalize_frame(record: &FrameStatRecord, index: usize) -> DetectionSample {
    let meta = record.raw_metadata_json.as_ref();
    let detections: Vec<DetectionBox> = meta
        .and_then(|meta| meta.get("detections"))
        .and_then(Value::as_array)
        .map(|list| list.iter().map(normalize_detection).collect())
        .unwrap_or_default();

    let timestamp = record.timestamp_relative.unwrap_or(index as f64);
    let count = record
        .detected_passengers
        .unwrap_or(detections.len() as u32);
    let confidence = meta.and_then(|meta| meta.get("confidence")).and_then(as_number);

    DetectionSample {
        timestamp,
        count,
        confidence,
        detections,
    }
}

fn normalize_detection(raw: &Value) -> DetectionBox {
    let bbox = raw.get("bbox").and_then(Value::as_array);
    let bbox_at = |i: usize| bbox.and_then(|b| b.get(i)).and_then(as_number);
    let named = |name: &str| raw.get(name).and_then(as_number);

    DetectionBox {
        x: named("x").or_else(|| bbox_at(0)).unwrap_or(0.0),
        y: named("y").or_else(|| bbox_at(1)).unwrap_or(0.0),
        width: named("width").or_else(|| bbox_at(2)).unwrap_or(0.0),
        height: named("height").or_else(|| bbox_at(3)).unwrap_or(0.0),
        confidence: named("confidence")
            .or_else(|| raw.get("score").and_then(as_number))
            .unwrap_or(0.0),
    }
}

/// Some backends serialize numerics as strings; accept both.
fn as_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(meta: Value) -> FrameStatRecord {
        FrameStatRecord {
            timestamp_relative: Some(1.5),
            detected_passengers: Some(3),
            raw_metadata_json: Some(meta),
            ..FrameStatRecord::default()
        }
    }

    #[test]
    fn bbox_array_maps_to_named_fields() {
        let sample = normalize_frame(
            &record(serde_json::json!({
                "detections": [{"bbox": [10, 20, 30, 40], "score": 0.75}],
            })),
            0,
        );
        assert_eq!(
            sample.detections,
            vec![DetectionBox {
                x: 10.0,
                y: 20.0,
                width: 30.0,
                height: 40.0,
                confidence: 0.75,
            }]
        );
    }

    #[test]
    fn named_fields_win_over_bbox() {
        let sample = normalize_frame(
            &record(serde_json::json!({
                "detections": [{"x": 1, "width": 5, "bbox": [10, 20, 30, 40], "confidence": 0.9, "score": 0.1}],
            })),
            0,
        );
        let det = sample.detections[0];
        assert_eq!(det.x, 1.0);
        assert_eq!(det.y, 20.0);
        assert_eq!(det.width, 5.0);
        assert_eq!(det.height, 40.0);
        assert_eq!(det.confidence, 0.9);
    }

    #[test]
    fn missing_numerics_default_to_zero() {
        let sample = normalize_frame(
            &record(serde_json::json!({"detections": [{}]})),
            0,
        );
        assert_eq!(sample.detections[0], DetectionBox::default());
    }

    #[test]
    fn frame_confidence_is_none_when_absent() {
        let sample = normalize_frame(&record(serde_json::json!({"detections": []})), 0);
        assert_eq!(sample.confidence, None);

        let sample = normalize_frame(
            &record(serde_json::json!({"confidence": 0.0, "detections": []})),
            0,
        );
        assert_eq!(sample.confidence, Some(0.0));
    }

    #[test]
    fn count_falls_back_to_detection_count() {
        let frame = FrameStatRecord {
            raw_metadata_json: Some(serde_json::json!({
                "detections": [{"bbox": [0, 0, 1, 1]}, {"bbox": [2, 2, 1, 1]}],
            })),
            ..FrameStatRecord::default()
        };
        let sample = normalize_frame(&frame, 4);
        assert_eq!(sample.count, 2);
        // no timestamp either: index stands in
        assert_eq!(sample.timestamp, 4.0);
    }

    #[test]
    fn missing_metadata_yields_empty_detections() {
        let frame = FrameStatRecord {
            timestamp_relative: Some(0.5),
            detected_passengers: Some(7),
            raw_metadata_json: None,
            ..FrameStatRecord::default()
        };
        let sample = normalize_frame(&frame, 0);
        assert_eq!(sample.count, 7);
        assert!(sample.detections.is_empty());
        assert_eq!(sample.confidence, None);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let sample = normalize_frame(
            &record(serde_json::json!({
                "detections": [{"bbox": ["10", "20", "30", "40"], "score": "0.5"}],
            })),
            0,
        );
        assert_eq!(sample.detections[0].x, 10.0);
        assert_eq!(sample.detections[0].confidence, 0.5);
    }
}
