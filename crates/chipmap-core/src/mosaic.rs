//! Assembling chip blocks into per-tile, per-year mosaic grids.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::chip::ChipBlock;
use crate::error::{ChipmapError, Result};
use crate::gridfile::{GridFile, Palette};
use crate::grid::{GridSpec, PixelOffset, TileId};
use crate::logging::LogContext;
use crate::product::{land_cover_colors, DataType, Product, COVERAGE_NAME};
use crate::raster::Raster;
use crate::retry::RetryPolicy;

/// Where finished chip blocks go. Only the collector holds one.
pub trait MosaicSink {
    fn write_block(&mut self, block: &ChipBlock) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum GridLayer {
    Product(Product, i32),
    Coverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridKey {
    tile: TileId,
    layer: GridLayer,
}

impl GridKey {
    fn file_name(&self) -> String {
        match self.layer {
            GridLayer::Product(product, year) => format!("{}_{}_{}.tif", self.tile, product.name(), year),
            GridLayer::Coverage => format!("{}_{}.tif", self.tile, COVERAGE_NAME),
        }
    }

    fn data_type(&self) -> DataType {
        match self.layer {
            GridLayer::Product(product, _) => product.data_type(),
            GridLayer::Coverage => DataType::U8,
        }
    }

    fn colored(&self) -> bool {
        matches!(self.layer, GridLayer::Product(p, _) if p.has_color_table())
    }
}

/// Owns every open mosaic grid of a run.
///
/// Grids are created on first touch and kept open until [`finish`]. Every
/// write is flushed before it returns.
///
/// [`finish`]: MosaicWriter::finish
pub struct MosaicWriter {
    output_dir: PathBuf,
    grid: GridSpec,
    grids: HashMap<GridKey, GridFile>,
    palette: Palette,
    retry: RetryPolicy,
    log: LogContext,
}

impl MosaicWriter {
    pub fn new(output_dir: impl Into<PathBuf>, grid: GridSpec, retry: RetryPolicy, log: LogContext) -> Result<Self> {
        grid.validate()?;
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            grid,
            grids: HashMap::new(),
            palette: Palette::from_colors(&land_cover_colors()),
            retry,
            log,
        })
    }

    /// Path of the grid for `product` in `year` over `tile`.
    pub fn grid_path(&self, tile: TileId, product: Product, year: i32) -> PathBuf {
        self.path_of(&GridKey { tile, layer: GridLayer::Product(product, year) })
    }

    pub fn coverage_path(&self, tile: TileId) -> PathBuf {
        self.path_of(&GridKey { tile, layer: GridLayer::Coverage })
    }

    fn path_of(&self, key: &GridKey) -> PathBuf {
        self.output_dir.join(key.file_name())
    }

    /// Number of grids opened so far.
    pub fn open_grids(&self) -> usize {
        self.grids.len()
    }

    fn grid_for(&mut self, key: GridKey) -> Result<&mut GridFile> {
        if !self.grids.contains_key(&key) {
            let path = self.path_of(&key);
            let n = self.grid.tile_pixels;
            let transform = self.grid.transform(key.tile);
            let palette = key.colored().then_some(&self.palette);
            let file =
                GridFile::open_or_create(&path, n, n, key.data_type(), &transform, &self.grid.projection, palette)?;
            if palette.is_some() && !file.is_paletted() {
                self.log.warn(format_args!("{} predates color tables; values are written uncolored", path.display()));
            }
            self.log.debug(format_args!("opened {}", path.display()));
            self.grids.insert(key, file);
        }
        self.grids
            .get_mut(&key)
            .ok_or_else(|| ChipmapError::grid(format!("grid {} vanished", key.file_name())))
    }

    fn write_key(&mut self, key: GridKey, col: usize, row: usize, values: &Raster<f32>) -> Result<()> {
        let retry = self.retry;
        let log = self.log.clone();
        let grid = self.grid_for(key)?;
        retry.run(&log, key.file_name(), || {
            grid.write_window(col, row, values)?;
            grid.flush()
        })
    }

    /// Write `values` with its upper-left pixel at (`col`, `row`) of the
    /// tile's grid for (`product`, `year`).
    pub fn write(
        &mut self,
        product: Product,
        year: i32,
        tile: TileId,
        col: usize,
        row: usize,
        values: &Raster<f32>,
    ) -> Result<()> {
        self.write_key(GridKey { tile, layer: GridLayer::Product(product, year) }, col, row, values)
    }

    pub fn write_coverage(&mut self, tile: TileId, col: usize, row: usize, coverage: &Raster<u8>) -> Result<()> {
        let values = Raster {
            data: coverage.data.iter().map(|&v| f32::from(v)).collect(),
            width: coverage.width,
            height: coverage.height,
        };
        self.write_key(GridKey { tile, layer: GridLayer::Coverage }, col, row, &values)
    }

    /// Sync every grid to disk and close it. Returns the number of grids.
    pub fn finish(mut self) -> Result<usize> {
        let count = self.open_grids();
        for (_, mut grid) in self.grids.drain() {
            grid.sync()?;
        }
        self.log.info(format_args!("{count} grids written to {}", self.output_dir.display()));
        Ok(count)
    }
}

impl MosaicSink for MosaicWriter {
    fn write_block(&mut self, block: &ChipBlock) -> Result<()> {
        let tile = block.chip.tile;
        let PixelOffset { col, row } = self.grid.offset(tile, block.chip.origin())?;

        // Coverage goes first so no grid ever holds values for a pixel that
        // reads as uncovered. A failing grid does not stop the others.
        let mut failed = Vec::new();
        if let Err(e) = self.write_coverage(tile, col, row, &block.coverage) {
            failed.push(format!("{COVERAGE_NAME}: {e}"));
        }
        for layer in &block.layers {
            if let Err(e) = self.write(layer.product, layer.year, tile, col, row, &layer.values) {
                failed.push(format!("{} {}: {e}", layer.product, layer.year));
            }
        }
        if failed.is_empty() {
            return Ok(());
        }
        Err(ChipmapError::grid(format!(
            "{} of {} grids not written: {}",
            failed.len(),
            block.layers.len() + 1,
            failed.join("; ")
        )))
    }
}
