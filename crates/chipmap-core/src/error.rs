//! Error type shared by every chipmap component.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChipmapError {
    /// File and socket failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Encoding or decoding a mosaic grid failed.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A results payload was present but could not be turned into segments.
    #[error("Payload error: {0}")]
    Payload(String),

    /// Grid geometry or window bounds violation.
    #[error("Grid error: {0}")]
    Grid(String),

    #[error("Config error: {0}")]
    Config(String),

    /// An ordinal day or calendar date outside the representable range.
    #[error("Date error: {0}")]
    Date(String),
}

pub type Result<T> = std::result::Result<T, ChipmapError>;

impl ChipmapError {
    pub fn payload<S: Into<String>>(msg: S) -> Self {
        ChipmapError::Payload(msg.into())
    }

    pub fn grid<S: Into<String>>(msg: S) -> Self {
        ChipmapError::Grid(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        ChipmapError::Config(msg.into())
    }

    pub fn date<S: Into<String>>(msg: S) -> Self {
        ChipmapError::Date(msg.into())
    }
}
