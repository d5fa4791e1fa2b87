//! Annual product generator: evaluates every product at every query date for
//! every pixel of a chip.

use std::ops::RangeInclusive;

use crate::chip::ChipBlock;
use crate::dates;
use crate::error::{ChipmapError, Result};
use crate::grid::Chip;
use crate::payload::ChipPayload;
use crate::product::ProductTable;

/// Default year range of an annual run.
pub const DEFAULT_YEARS: RangeInclusive<i32> = 1984..=2015;

/// One sampling instant: the calendar year and its mid-year ordinal day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDate {
    pub year: i32,
    pub day: i64,
}

pub fn query_dates(years: RangeInclusive<i32>) -> Result<Vec<QueryDate>> {
    years
        .map(|year| Ok(QueryDate { year, day: dates::mid_year(year)? }))
        .collect()
}

pub struct AnnualGenerator {
    table: ProductTable,
    dates: Vec<QueryDate>,
    years: Vec<i32>,
    chip_pixels: usize,
}

impl AnnualGenerator {
    pub fn new(table: ProductTable, years: RangeInclusive<i32>, chip_pixels: usize) -> Result<Self> {
        if years.is_empty() {
            return Err(ChipmapError::config(format!(
                "empty year range {}..={}",
                years.start(),
                years.end()
            )));
        }
        let dates = query_dates(years)?;
        let years = dates.iter().map(|d| d.year).collect();
        Ok(Self { table, dates, years, chip_pixels })
    }

    pub fn table(&self) -> &ProductTable {
        &self.table
    }

    pub fn years(&self) -> &[i32] {
        &self.years
    }

    pub fn chip_pixels(&self) -> usize {
        self.chip_pixels
    }

    /// Build the block for one chip. `payload.pixels` is row-major and must
    /// hold exactly one entry per chip pixel.
    pub fn generate(&self, chip: Chip, payload: &ChipPayload) -> Result<ChipBlock> {
        let side = self.chip_pixels;
        if payload.pixels.len() != side * side {
            return Err(ChipmapError::payload(format!(
                "{} pixels supplied for a {side}×{side} chip",
                payload.pixels.len()
            )));
        }

        let mut block = ChipBlock::new(chip, side, &self.table, &self.years);

        for (index, segments) in payload.pixels.iter().enumerate() {
            if segments.is_empty() {
                continue;
            }
            let (row, col) = (index / side, index % side);
            block.coverage.set(row, col, 1);

            for (p, entry) in self.table.entries().iter().enumerate() {
                for (y, date) in self.dates.iter().enumerate() {
                    let value = (entry.query)(segments, date.day);
                    let layer = block.layer_index(p, y);
                    block.layers[layer].values.set(row, col, value as f32);
                }
            }
        }

        self.fill_uncovered(&mut block);
        Ok(block)
    }

    /// Pixels without segments take each product's no-match value, which is
    /// not zero for every product.
    fn fill_uncovered(&self, block: &mut ChipBlock) {
        for (p, entry) in self.table.entries().iter().enumerate() {
            if entry.no_match == 0.0 {
                continue;
            }
            for y in 0..self.years.len() {
                let layer = block.layer_index(p, y);
                let values = &mut block.layers[layer].values;
                for (v, &covered) in values.data.iter_mut().zip(&block.coverage.data) {
                    if covered == 0 {
                        *v = entry.no_match as f32;
                    }
                }
            }
        }
    }
}
