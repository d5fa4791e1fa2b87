//! Per-segment change records for downstream analysis tools.
//!
//! Records use 1-based rows and columns and dates shifted onto the MATLAB day
//! epoch. They are grouped by tile row, one file per row:
//! `record_change{row}.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::dates::to_matlab;
use crate::error::Result;
use crate::grid::{Chip, GridSpec, PixelOffset, TileId};
use crate::logging::LogContext;
use crate::payload::ChipPayload;
use crate::segment::{Segment, N_BANDS};
use crate::source::ResultSource;

/// Intercept plus up to seven harmonic coefficients.
pub const COEF_ROWS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub t_start: i64,
    pub t_end: i64,
    pub t_break: i64,
    /// Row 0 holds intercepts, rows 1.. the model coefficients; one column
    /// per band.
    pub coefs: [[f32; N_BANDS]; COEF_ROWS],
    pub rmse: [f32; N_BANDS],
    /// `col + (row - 1) × tile_pixels`, both 1-based.
    pub pos: u64,
    pub change_prob: f32,
    pub num_obs: u32,
    /// Curve QA of the segment.
    pub category: u8,
    pub magnitude: [f32; N_BANDS],
}

pub fn segment_record(segment: &Segment, pos: u64) -> ChangeRecord {
    let mut coefs = [[0.0; N_BANDS]; COEF_ROWS];
    let mut rmse = [0.0; N_BANDS];
    let mut magnitude = [0.0; N_BANDS];

    for (b, fit) in segment.bands.iter().take(N_BANDS).enumerate() {
        rmse[b] = fit.rmse;
        magnitude[b] = fit.magnitude;
        coefs[0][b] = fit.intercept;
        for (j, &c) in fit.coefficients.iter().take(COEF_ROWS - 1).enumerate() {
            coefs[j + 1][b] = c;
        }
    }

    ChangeRecord {
        t_start: to_matlab(segment.start_day),
        t_end: to_matlab(segment.end_day),
        t_break: to_matlab(segment.break_day),
        coefs,
        rmse,
        pos,
        change_prob: segment.change_probability,
        num_obs: segment.observation_count,
        category: segment.quality,
        magnitude,
    }
}

/// 1-based flattened position of a zero-based tile offset.
pub fn tile_position(offset: PixelOffset, tile_pixels: usize) -> u64 {
    (offset.col + 1 + offset.row * tile_pixels) as u64
}

/// Records of one chip keyed by 1-based tile row.
pub fn chip_records(payload: &ChipPayload, chip: &Chip, grid: &GridSpec) -> Result<BTreeMap<usize, Vec<ChangeRecord>>> {
    let origin = grid.offset(chip.tile, chip.origin())?;
    let side = grid.chip_pixels;
    let mut out: BTreeMap<usize, Vec<ChangeRecord>> = BTreeMap::new();

    for (index, segments) in payload.pixels.iter().enumerate() {
        if segments.is_empty() {
            continue;
        }
        let offset = PixelOffset { col: origin.col + index % side, row: origin.row + index / side };
        let pos = tile_position(offset, grid.tile_pixels);
        out.entry(offset.row + 1)
            .or_default()
            .extend(segments.iter().map(|s| segment_record(s, pos)));
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub bands: usize,
    pub failed_chips: usize,
    pub rows: usize,
    pub records: usize,
}

impl ExportReport {
    fn merge(mut self, other: Self) -> Self {
        self.bands += other.bands;
        self.failed_chips += other.failed_chips;
        self.rows += other.rows;
        self.records += other.records;
        self
    }
}

pub struct RecordExporter {
    source: Box<dyn ResultSource>,
    grid: GridSpec,
    output_dir: PathBuf,
    log: LogContext,
}

impl RecordExporter {
    pub fn new(source: Box<dyn ResultSource>, grid: GridSpec, output_dir: impl Into<PathBuf>, log: LogContext) -> Result<Self> {
        grid.validate()?;
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { source, grid, output_dir, log })
    }

    pub fn row_path(&self, row: usize) -> PathBuf {
        row_path(&self.output_dir, row)
    }

    /// Export the band of tile rows covered by the chips starting at
    /// `band_row`. A chip that cannot be fetched or decoded is logged and
    /// skipped.
    pub fn export_band(&self, tile: TileId, band_row: usize) -> Result<ExportReport> {
        let log = self.log.child(format!("{tile}/row-{band_row}"));
        let mut rows: BTreeMap<usize, Vec<ChangeRecord>> = BTreeMap::new();
        let mut report = ExportReport { bands: 1, ..ExportReport::default() };

        for chip in self.grid.chip_row(tile, band_row) {
            let payload = match self.source.fetch(&chip) {
                Ok(Some(p)) => p,
                Ok(None) => {
                    log.debug(format_args!("{chip}: no results"));
                    continue;
                }
                Err(e) => {
                    report.failed_chips += 1;
                    log.error(format_args!("{chip}: {e}"));
                    continue;
                }
            };
            for (row, records) in chip_records(&payload, &chip, &self.grid)? {
                rows.entry(row).or_default().extend(records);
            }
        }

        for (row, records) in &rows {
            fs::write(self.row_path(*row), serde_json::to_vec(records)?)?;
            report.records += records.len();
        }
        report.rows = rows.len();
        log.debug(format_args!("{} records over {} rows", report.records, report.rows));
        Ok(report)
    }

    /// Export every band of `tile` in parallel on the current rayon pool.
    pub fn export_tile(&self, tile: TileId) -> ExportReport {
        let bands: Vec<usize> = (0..self.grid.tile_pixels).step_by(self.grid.chip_pixels).collect();
        let report = bands
            .par_iter()
            .map(|&band| match self.export_band(tile, band) {
                Ok(r) => r,
                Err(e) => {
                    self.log.error(format_args!("{tile} band at row {band}: {e}"));
                    ExportReport::default()
                }
            })
            .reduce(ExportReport::default, ExportReport::merge);
        self.log.info(format_args!(
            "{tile}: {} records in {} rows from {}/{} bands",
            report.records,
            report.rows,
            report.bands,
            bands.len()
        ));
        report
    }
}

pub fn row_path(dir: &Path, row: usize) -> PathBuf {
    dir.join(format!("record_change{row}.json"))
}
