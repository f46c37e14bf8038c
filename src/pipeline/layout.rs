//! Text-layout normalisation: recognition engine output → [`PageResult`].
//!
//! Recognition engines disagree on how they report a page. The two shapes we
//! accept are:
//!
//! * **Columnar** (batch mode): parallel arrays
//!   `{"rec_texts": [...], "rec_boxes": [...], "rec_scores": [...]}`, zipped
//!   index-wise. Boxes are usually `[x1, y1, x2, y2]`; `rec_polys` (4-point
//!   polygons) is accepted when `rec_boxes` is missing.
//! * **Line list** (legacy): `[[box, [text, confidence]], ...]`, where `box`
//!   is a list of four `[x, y]` points.
//!
//! Raw JSON is classified once by [`RecognitionResult::from_json`] and then
//! normalised by [`normalize`]. Nothing past this module sees engine-specific
//! shapes: every span comes out with a 4-corner [`BoundingBox`] and an `f64`
//! confidence in `[0, 1]`.
//!
//! Malformed detections are dropped one by one with a warning. A page never
//! fails here; the worst case is a page with zero spans.

use crate::output::{BoundingBox, PageResult, TextSpan};
use serde_json::Value;
use tracing::{debug, warn};

/// Keys tried, in order, for the box column of a columnar result.
const BOX_KEYS: [&str; 3] = ["rec_boxes", "rec_polys", "dt_polys"];

/// Envelope keys that wrap the actual result in service responses.
const ENVELOPE_KEYS: [&str; 4] = ["result", "ocrResults", "prunedResult", "res"];

/// A recognition result, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionResult {
    /// Parallel arrays of texts, boxes and scores.
    Columnar {
        texts: Vec<Value>,
        boxes: Vec<Value>,
        scores: Vec<Value>,
    },
    /// One `[box, [text, confidence]]` entry per detection.
    LineList { entries: Vec<Value> },
    /// A payload matching neither shape. Holds a short description for logs.
    Unrecognized(String),
}

impl RecognitionResult {
    /// An empty result: the engine saw no text.
    pub fn empty() -> Self {
        RecognitionResult::LineList {
            entries: Vec::new(),
        }
    }

    /// Classify a raw engine payload.
    ///
    /// Single-element wrappers (a batch of one image, service envelopes such as
    /// `{"result": {"ocrResults": [{"prunedResult": {...}}]}}`) are peeled off
    /// first. `null` means "no detections".
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::empty(),
            Value::Object(map) => {
                if let Some(texts) = map.get("rec_texts") {
                    let boxes = BOX_KEYS
                        .iter()
                        .find_map(|k| map.get(*k))
                        .map(array_or_empty)
                        .unwrap_or_default();
                    return RecognitionResult::Columnar {
                        texts: array_or_empty(texts),
                        boxes,
                        scores: map.get("rec_scores").map(array_or_empty).unwrap_or_default(),
                    };
                }
                if let Some(inner) = ENVELOPE_KEYS.iter().find_map(|k| map.get(*k)) {
                    return Self::from_json(inner);
                }
                RecognitionResult::Unrecognized(format!(
                    "object with keys {:?}",
                    map.keys().collect::<Vec<_>>()
                ))
            }
            Value::Array(items) => match items.as_slice() {
                [] => Self::empty(),
                [only] if !is_line_entry(only) => Self::from_json(only),
                _ => RecognitionResult::LineList {
                    entries: items.clone(),
                },
            },
            other => RecognitionResult::Unrecognized(format!("bare {}", json_kind(other))),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            RecognitionResult::Columnar { .. } => "columnar",
            RecognitionResult::LineList { .. } => "line-list",
            RecognitionResult::Unrecognized(_) => "unrecognized",
        }
    }
}

fn array_or_empty(v: &Value) -> Vec<Value> {
    v.as_array().cloned().unwrap_or_default()
}

/// `[box, [text, confidence]]` with a string text.
fn is_line_entry(v: &Value) -> bool {
    match v.as_array().map(Vec::as_slice) {
        Some([_, pair]) => pair
            .as_array()
            .and_then(|p| p.first())
            .is_some_and(Value::is_string),
        _ => false,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalise a classified result into the page's span list.
pub fn normalize(page: usize, result: &RecognitionResult) -> PageResult {
    let lines = match result {
        RecognitionResult::Columnar {
            texts,
            boxes,
            scores,
        } => {
            if texts.len() != boxes.len() || texts.len() != scores.len() {
                warn!(
                    "Page {}: columnar result has {} texts, {} boxes, {} scores; extra entries dropped",
                    page,
                    texts.len(),
                    boxes.len(),
                    scores.len()
                );
            }
            texts
                .iter()
                .zip(boxes)
                .zip(scores)
                .enumerate()
                .filter_map(|(i, ((text, bbox), score))| {
                    let span = build_span(text, bbox, score);
                    if span.is_none() {
                        warn!("Page {}: dropped malformed detection #{}", page, i);
                    }
                    span
                })
                .collect()
        }
        RecognitionResult::LineList { entries } => entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let span = line_entry_span(entry);
                if span.is_none() {
                    warn!("Page {}: dropped malformed line entry #{}: {}", page, i, entry);
                }
                span
            })
            .collect(),
        RecognitionResult::Unrecognized(what) => {
            warn!("Page {}: unrecognised recognition output ({}); treating as empty", page, what);
            Vec::new()
        }
    };

    let page_result = PageResult { page, lines };
    debug!(
        "Page {}: {} spans from {} result",
        page,
        page_result.lines.len(),
        result.shape()
    );
    page_result
}

fn line_entry_span(entry: &Value) -> Option<TextSpan> {
    let [bbox, pair] = entry.as_array()?.as_slice() else {
        return None;
    };
    let [text, score] = pair.as_array()?.as_slice() else {
        return None;
    };
    build_span(text, bbox, score)
}

fn build_span(text: &Value, bbox: &Value, score: &Value) -> Option<TextSpan> {
    let text = text.as_str()?.to_string();
    let bbox = BoundingBox::from_json(bbox)?;
    let confidence = score.as_f64().filter(|c| c.is_finite())?.clamp(0.0, 1.0);
    Some(TextSpan {
        text,
        bbox,
        confidence,
    })
}
