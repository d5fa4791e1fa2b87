//! Decoding results payloads into segments.
//!
//! A chip payload is a JSON array in one of two layouts:
//!
//! * located: `[{"x": .., "y": .., "result_ok": true, "result": ..}, ..]`
//!   where `result` is an object or a JSON-encoded string holding
//!   `change_models` (and usually a `processing_mask`);
//! * ordered: `[[segment, ..], [segment, ..], ..]`, one array per pixel in
//!   row-major order.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ChipmapError, Result};
use crate::grid::{Chip, GeoCoordinate, GridSpec};
use crate::segment::{sort_segments, BandFit, Segment, N_BANDS};

// ── Wire schema ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassProbs {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl ClassProbs {
    fn into_flat(self) -> Vec<f32> {
        match self {
            ClassProbs::Flat(v) => v,
            ClassProbs::Nested(v) => v.into_iter().next().unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct RawModel {
    start_day: i64,
    end_day: i64,
    #[serde(default)]
    break_day: Option<i64>,
    #[serde(default)]
    change_probability: Option<f32>,
    #[serde(default)]
    curve_qa: Option<u8>,
    #[serde(default)]
    observation_count: Option<u32>,
    #[serde(default)]
    blue: Option<BandFit>,
    #[serde(default)]
    green: Option<BandFit>,
    #[serde(default)]
    red: Option<BandFit>,
    #[serde(default)]
    nir: Option<BandFit>,
    #[serde(default)]
    swir1: Option<BandFit>,
    #[serde(default)]
    swir2: Option<BandFit>,
    #[serde(default)]
    thermal: Option<BandFit>,
    #[serde(default)]
    class_probs: Option<ClassProbs>,
    #[serde(default)]
    class_vals: Option<Vec<u8>>,
}

#[derive(Deserialize)]
struct RawResult {
    #[serde(default)]
    change_models: Vec<RawModel>,
}

#[derive(Deserialize)]
struct PixelEntry {
    x: f64,
    y: f64,
    #[serde(default)]
    result_ok: Option<bool>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChipDocument {
    Located(Vec<PixelEntry>),
    Ordered(Vec<Vec<RawModel>>),
}

impl RawModel {
    fn into_segment(self) -> Result<Segment> {
        if self.start_day > self.end_day {
            return Err(ChipmapError::payload(format!(
                "segment starts ({}) after it ends ({})",
                self.start_day, self.end_day
            )));
        }

        let fits = [self.blue, self.green, self.red, self.nir, self.swir1, self.swir2, self.thermal];
        let bands: Vec<BandFit> = if fits.iter().any(Option::is_some) {
            fits.into_iter().map(Option::unwrap_or_default).collect()
        } else {
            Vec::new()
        };
        debug_assert!(bands.is_empty() || bands.len() == N_BANDS);
        let magnitudes = bands.iter().map(|b| b.magnitude).collect();

        let mut segment = Segment::new(self.start_day, self.end_day)
            .with_break(self.break_day.unwrap_or(0), self.change_probability.unwrap_or(0.0))
            .with_quality(self.curve_qa.unwrap_or(0))
            .with_magnitudes(magnitudes);
        segment.observation_count = self.observation_count.unwrap_or(0);
        segment.bands = bands;

        if let Some(probs) = self.class_probs {
            let probs = probs.into_flat();
            let labels = self.class_vals.unwrap_or_default();
            if !labels.is_empty() && labels.len() != probs.len() {
                return Err(ChipmapError::payload(format!(
                    "{} class labels for {} class weights",
                    labels.len(),
                    probs.len()
                )));
            }
            segment = segment.with_classes(probs, labels);
        }
        Ok(segment)
    }
}

fn convert_models(models: Vec<RawModel>) -> Result<Vec<Segment>> {
    let mut segments = models
        .into_iter()
        .map(RawModel::into_segment)
        .collect::<Result<Vec<_>>>()?;
    sort_segments(&mut segments);
    Ok(segments)
}

/// `result` may arrive double-encoded as a string.
fn decode_result(result: Value) -> Result<RawResult> {
    match result {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

// ── Public types ──────────────────────────────────────────────────────────────

/// Where a pixel sits: by coordinate, or by its row-major index in the chip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelPosition {
    Located(GeoCoordinate),
    Ordered(usize),
}

/// Sorted segments of one pixel.
#[derive(Debug, Clone)]
pub struct PixelSegments {
    pub position: PixelPosition,
    pub segments: Vec<Segment>,
}

/// Decode a chip document into per-pixel segment lists. Pixels flagged
/// `result_ok: false` or lacking a result have no segments.
pub fn parse_document(bytes: &[u8]) -> Result<Vec<PixelSegments>> {
    let document: ChipDocument = serde_json::from_slice(bytes)
        .map_err(|e| ChipmapError::payload(format!("unrecognised chip document: {e}")))?;

    match document {
        ChipDocument::Located(entries) => entries
            .into_iter()
            .map(|entry| {
                let segments = match (entry.result_ok, entry.result) {
                    (Some(false), _) | (_, None) => Vec::new(),
                    (_, Some(result)) => convert_models(decode_result(result)?.change_models)?,
                };
                Ok(PixelSegments {
                    position: PixelPosition::Located(GeoCoordinate::new(entry.x, entry.y)),
                    segments,
                })
            })
            .collect(),
        ChipDocument::Ordered(pixels) => pixels
            .into_iter()
            .enumerate()
            .map(|(i, models)| {
                Ok(PixelSegments { position: PixelPosition::Ordered(i), segments: convert_models(models)? })
            })
            .collect(),
    }
}

/// Segments of every pixel of a chip, row-major, empty where no result exists.
#[derive(Debug, Clone)]
pub struct ChipPayload {
    pub pixels: Vec<Vec<Segment>>,
}

impl ChipPayload {
    /// A chip with no results at all.
    pub fn empty(chip_pixels: usize) -> Self {
        Self { pixels: vec![Vec::new(); chip_pixels * chip_pixels] }
    }

    /// Place decoded pixels into their chip cells.
    pub fn assemble(pixels: Vec<PixelSegments>, chip: &Chip, grid: &GridSpec) -> Result<Self> {
        let side = grid.chip_pixels;
        let mut payload = Self::empty(side);

        for pixel in pixels {
            let index = match pixel.position {
                PixelPosition::Located(coord) => {
                    let off = grid.chip_offset(chip, coord)?;
                    off.row * side + off.col
                }
                PixelPosition::Ordered(i) if i < side * side => i,
                PixelPosition::Ordered(i) => {
                    return Err(ChipmapError::payload(format!(
                        "pixel index {i} exceeds a {side}×{side} chip"
                    )))
                }
            };
            payload.pixels[index] = pixel.segments;
        }
        Ok(payload)
    }

    pub fn parse(bytes: &[u8], chip: &Chip, grid: &GridSpec) -> Result<Self> {
        Self::assemble(parse_document(bytes)?, chip, grid)
    }
}

// ── Compaction ────────────────────────────────────────────────────────────────

/// Re-encode a located chip document compactly, rewriting each result's
/// boolean `processing_mask` as 0/1 integers. Entries without a result pass
/// through untouched. A document without entries yields `None`.
pub fn compact_document(bytes: &[u8]) -> Result<Option<String>> {
    let mut entries: Vec<Value> = serde_json::from_slice(bytes)?;
    if entries.is_empty() {
        return Ok(None);
    }

    for entry in &mut entries {
        let Some(obj) = entry.as_object_mut() else {
            continue;
        };
        if obj.get("result_ok").and_then(Value::as_bool) != Some(true) {
            continue;
        }
        let Some(result) = obj.get_mut("result") else {
            continue;
        };

        let was_string = result.is_string();
        let mut decoded: Value = match result.take() {
            Value::String(text) => serde_json::from_str(&text)?,
            other => other,
        };
        if let Some(Value::Array(mask)) = decoded.get_mut("processing_mask") {
            for flag in mask.iter_mut() {
                if let Some(b) = flag.as_bool() {
                    *flag = Value::from(u8::from(b));
                }
            }
        }
        *result = if was_string { Value::String(serde_json::to_string(&decoded)?) } else { decoded };
    }

    Ok(Some(serde_json::to_string(&entries)?))
}
