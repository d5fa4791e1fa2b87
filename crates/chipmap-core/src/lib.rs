//! Annual land-change and land-cover maps from per-pixel temporal segments.
//!
//! Results arrive per chip (a 100×100 pixel unit of an ARD tile). For each
//! chip the [`generator`] evaluates every product of the run at mid-year of
//! every covered year, the [`pipeline`] fans chips out to worker threads, and
//! the [`mosaic`] writer places the resulting blocks into one grid per
//! product and year.

pub mod chip;
pub mod config;
pub mod dates;
pub mod error;
pub mod generator;
pub mod grid;
pub mod gridfile;
pub mod logging;
pub mod mosaic;
pub mod payload;
pub mod pipeline;
pub mod product;
pub mod query;
pub mod raster;
pub mod records;
pub mod retry;
pub mod segment;
pub mod source;

pub use error::{ChipmapError, Result};
