//! Tile, chip and pixel addressing on the ARD grid.
//! All coordinate math uses f64 projected metres.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChipmapError, Result};

/// Upper-left corner of tile h00v00 in CONUS Albers metres.
pub const CONUS_ORIGIN: (f64, f64) = (-2_565_585.0, 3_314_805.0);

pub const PIXEL_SIZE: f64 = 30.0;
pub const TILE_PIXELS: usize = 5000;
pub const CHIP_PIXELS: usize = 100;

pub const CONUS_WKT: &str = concat!(
    r#"PROJCS["Albers",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378140,298.2569999999957,"#,
    r#"AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0],"#,
    r#"UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]],PROJECTION["Albers_Conic_Equal_Area"],"#,
    r#"PARAMETER["standard_parallel_1",29.5],PARAMETER["standard_parallel_2",45.5],"#,
    r#"PARAMETER["latitude_of_center",23],PARAMETER["longitude_of_center",-96],"#,
    r#"PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1,AUTHORITY["EPSG","9001"]]]"#,
);

/// Projected coordinate in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoordinate {
    pub x: f64,
    pub y: f64,
}

impl GeoCoordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An ARD tile, addressed by horizontal and vertical index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub h: u32,
    pub v: u32,
}

impl TileId {
    pub fn new(h: u32, v: u32) -> Self {
        Self { h, v }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{:02}v{:02}", self.h, self.v)
    }
}

/// North-up affine transform: origin at the upper-left corner, square pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: f64,
}

impl GeoTransform {
    /// Fractional pixels are floored; a tiny bias absorbs float noise on
    /// exact pixel corners.
    pub fn pixel_of(&self, coord: GeoCoordinate) -> (i64, i64) {
        const BIAS: f64 = 1e-9;
        let col = ((coord.x - self.origin_x) / self.pixel_size + BIAS).floor() as i64;
        let row = ((self.origin_y - coord.y) / self.pixel_size + BIAS).floor() as i64;
        (col, row)
    }

    /// Upper-left corner of pixel (`col`, `row`).
    pub fn coordinate_of(&self, col: usize, row: usize) -> GeoCoordinate {
        GeoCoordinate::new(
            self.origin_x + col as f64 * self.pixel_size,
            self.origin_y - row as f64 * self.pixel_size,
        )
    }
}

/// Zero-based pixel position inside a tile or chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelOffset {
    pub col: usize,
    pub row: usize,
}

/// A chip, identified by the coordinate of its upper-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chip {
    pub tile: TileId,
    pub ulx: f64,
    pub uly: f64,
}

impl Chip {
    pub fn origin(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.ulx, self.uly)
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} chip x: {} y: {}", self.tile, self.ulx, self.uly)
    }
}

/// Geometry of the tiling grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: f64,
    /// Tile edge in pixels.
    pub tile_pixels: usize,
    /// Chip edge in pixels; must divide `tile_pixels`.
    pub chip_pixels: usize,
    /// WKT written into every mosaic grid.
    pub projection: String,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            origin_x: CONUS_ORIGIN.0,
            origin_y: CONUS_ORIGIN.1,
            pixel_size: PIXEL_SIZE,
            tile_pixels: TILE_PIXELS,
            chip_pixels: CHIP_PIXELS,
            projection: CONUS_WKT.to_string(),
        }
    }
}

impl GridSpec {
    pub fn validate(&self) -> Result<()> {
        if self.pixel_size <= 0.0 {
            return Err(ChipmapError::config("pixel_size must be positive"));
        }
        if self.chip_pixels == 0 || self.tile_pixels == 0 || self.tile_pixels % self.chip_pixels != 0 {
            return Err(ChipmapError::config(format!(
                "chip_pixels ({}) must be non-zero and divide tile_pixels ({})",
                self.chip_pixels, self.tile_pixels
            )));
        }
        Ok(())
    }

    pub fn tile_span(&self) -> f64 {
        self.tile_pixels as f64 * self.pixel_size
    }

    pub fn chip_span(&self) -> f64 {
        self.chip_pixels as f64 * self.pixel_size
    }

    pub fn transform(&self, tile: TileId) -> GeoTransform {
        GeoTransform {
            origin_x: self.origin_x + f64::from(tile.h) * self.tile_span(),
            origin_y: self.origin_y - f64::from(tile.v) * self.tile_span(),
            pixel_size: self.pixel_size,
        }
    }

    /// Offset of `coord` inside `tile`. Coordinates outside the tile are an
    /// error for the caller to handle.
    pub fn offset(&self, tile: TileId, coord: GeoCoordinate) -> Result<PixelOffset> {
        let (col, row) = self.transform(tile).pixel_of(coord);
        let n = self.tile_pixels as i64;
        if !(0..n).contains(&col) || !(0..n).contains(&row) {
            return Err(ChipmapError::grid(format!(
                "coordinate ({}, {}) lies outside tile {tile}",
                coord.x, coord.y
            )));
        }
        Ok(PixelOffset { col: col as usize, row: row as usize })
    }

    /// Offset of a pixel coordinate inside `chip`.
    pub fn chip_offset(&self, chip: &Chip, coord: GeoCoordinate) -> Result<PixelOffset> {
        let transform = GeoTransform { origin_x: chip.ulx, origin_y: chip.uly, pixel_size: self.pixel_size };
        let (col, row) = transform.pixel_of(coord);
        let n = self.chip_pixels as i64;
        if !(0..n).contains(&col) || !(0..n).contains(&row) {
            return Err(ChipmapError::grid(format!(
                "pixel ({}, {}) lies outside {chip}",
                coord.x, coord.y
            )));
        }
        Ok(PixelOffset { col: col as usize, row: row as usize })
    }

    /// Every chip of `tile`, row by row from the upper-left corner.
    pub fn chips(&self, tile: TileId) -> Vec<Chip> {
        let per_side = self.tile_pixels / self.chip_pixels;
        let mut out = Vec::with_capacity(per_side * per_side);
        for r in 0..per_side {
            out.extend(self.chip_row(tile, r * self.chip_pixels));
        }
        out
    }

    /// The chips whose top edge is tile row `row`.
    pub fn chip_row(&self, tile: TileId, row: usize) -> Vec<Chip> {
        let transform = self.transform(tile);
        (0..self.tile_pixels / self.chip_pixels)
            .map(|c| {
                let ul = transform.coordinate_of(c * self.chip_pixels, row);
                Chip { tile, ulx: ul.x, uly: ul.y }
            })
            .collect()
    }
}
