//! OCR data model and pipeline output types.
//!
//! Everything here is plain data with serde derives: the OCR artifact written
//! in batch mode is a JSON array of [`PageResult`], and the stored document
//! record embeds the same shape.

use crate::fields::ExtractedFields;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A pixel coordinate in the rendered page image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Location of a span as a quadrilateral, clockwise from the top-left corner.
///
/// Recognition engines report either a 4-point polygon or an axis-aligned
/// `[x1, y1, x2, y2]` rectangle; both normalise to four corners so
/// downstream code sees one shape. Serialised as `[[x,y],[x,y],[x,y],[x,y]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "[[f64; 2]; 4]")]
pub struct BoundingBox {
    pub corners: [Point; 4],
}

impl BoundingBox {
    /// Build a box from an axis-aligned rectangle.
    pub fn from_rect(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        Self {
            corners: [
                Point::new(left, top),
                Point::new(right, top),
                Point::new(right, bottom),
                Point::new(left, bottom),
            ],
        }
    }

    /// Parse any supported box encoding:
    ///
    /// * `[x1, y1, x2, y2]` — axis-aligned rectangle
    /// * `[x1, y1, x2, y2, x3, y3, x4, y4]` — flat polygon
    /// * `[[x, y], [x, y], [x, y], [x, y]]` — point list
    ///
    /// Returns `None` for anything else, including non-finite numbers.
    pub fn from_json(value: &Value) -> Option<Self> {
        let items = value.as_array()?;

        if items.iter().all(Value::is_number) {
            let nums = finite_numbers(items)?;
            return match nums.as_slice() {
                [x1, y1, x2, y2] => Some(Self::from_rect(*x1, *y1, *x2, *y2)),
                [a, b, c, d, e, f, g, h] => Some(Self {
                    corners: [
                        Point::new(*a, *b),
                        Point::new(*c, *d),
                        Point::new(*e, *f),
                        Point::new(*g, *h),
                    ],
                }),
                _ => None,
            };
        }

        if items.len() != 4 {
            return None;
        }
        let mut corners = [Point::new(0.0, 0.0); 4];
        for (slot, item) in corners.iter_mut().zip(items) {
            let pair = finite_numbers(item.as_array()?)?;
            match pair.as_slice() {
                [x, y] => *slot = Point::new(*x, *y),
                _ => return None,
            }
        }
        Some(Self { corners })
    }
}

fn finite_numbers(items: &[Value]) -> Option<Vec<f64>> {
    items
        .iter()
        .map(|v| v.as_f64().filter(|n| n.is_finite()))
        .collect()
}

impl From<BoundingBox> for [[f64; 2]; 4] {
    fn from(b: BoundingBox) -> Self {
        b.corners.map(<[f64; 2]>::from)
    }
}

impl<'de> Deserialize<'de> for BoundingBox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        BoundingBox::from_json(&value)
            .ok_or_else(|| D::Error::custom(format!("unsupported bounding box: {value}")))
    }
}

/// One recognised text fragment with its location and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Recognition confidence in `[0, 1]`.
    #[serde(alias = "score")]
    pub confidence: f64,
}

/// All spans recognised on one page, in recognition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page: usize,
    pub lines: Vec<TextSpan>,
}

impl PageResult {
    /// A page with zero detections. A valid outcome, not a failure.
    pub fn empty(page: usize) -> Self {
        Self {
            page,
            lines: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// The durable OCR artifact: one [`PageResult`] per source page, in page order.
pub type DocumentOcrResult = Vec<PageResult>;

/// Timing and volume statistics for a single-document run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessStats {
    pub page_count: usize,
    pub span_count: usize,
    /// Pages that produced zero spans (including degraded pages).
    pub empty_pages: usize,
    /// Pages whose recognition call failed and were degraded.
    pub failed_pages: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub render_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of single-document (interactive) mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub ocr: DocumentOcrResult,
    pub extraction: ExtractedFields,
    pub stats: ProcessStats,
}

/// What a store-backed run hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredExtraction {
    pub id: i64,
    pub filename: String,
    pub extraction: ExtractedFields,
}
