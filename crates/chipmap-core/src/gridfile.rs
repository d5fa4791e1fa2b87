//! Persistent single-band rasters on disk.
//!
//! A grid is an uncompressed, strip-organised GeoTIFF. It is created once,
//! zero-filled, with the tile's georeferencing; afterwards windows are read
//! and written in place by seeking to the strip bytes, so a grid never has to
//! be held in memory.
//!
//! Categorical grids carry their color table as a TIFF palette, so GIS tools
//! render them without any side files.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use tiff::decoder::Decoder;
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind, TiffValue};
use tiff::tags::Tag;

use crate::error::{ChipmapError, Result};
use crate::grid::GeoTransform;
use crate::product::{DataType, Rgba};
use crate::raster::Raster;

const ROWS_PER_STRIP: u32 = 16;

// GeoTIFF tags and keys.
const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_ASCII_PARAMS: u16 = 34737;
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GT_CITATION: u16 = 1026;
const MODEL_TYPE_PROJECTED: u16 = 1;
const RASTER_PIXEL_IS_AREA: u16 = 1;

const PHOTOMETRIC_PALETTE: u16 = 3;
const PALETTE_ENTRIES: usize = 256;

/// A 256-entry TIFF `ColorMap`: every red, then every green, then every blue,
/// each scaled to 16 bits. Alpha has no place in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette(Vec<u16>);

impl Palette {
    /// Entries missing from `colors` are black; keys past 255 are ignored.
    pub fn from_colors(colors: &BTreeMap<u16, Rgba>) -> Self {
        let mut map = vec![0u16; 3 * PALETTE_ENTRIES];
        for (&value, rgba) in colors.range(..PALETTE_ENTRIES as u16) {
            for (channel, &c) in rgba[..3].iter().enumerate() {
                map[channel * PALETTE_ENTRIES + value as usize] = u16::from(c) * 257;
            }
        }
        Self(map)
    }

    fn as_tag(&self) -> &[u16] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

/// Where each row's bytes live.
#[derive(Debug, Clone)]
struct StripLayout {
    offsets: Vec<u64>,
    rows_per_strip: usize,
    endian: Endian,
}

#[derive(Debug)]
pub struct GridFile {
    path: PathBuf,
    file: File,
    width: usize,
    height: usize,
    data_type: DataType,
    paletted: bool,
    layout: StripLayout,
}

impl GridFile {
    /// Open the grid at `path`, creating it zero-filled when absent. An
    /// existing grid must have the requested size and data type; its palette,
    /// if any, is left as found.
    pub fn open_or_create(
        path: &Path,
        width: usize,
        height: usize,
        data_type: DataType,
        transform: &GeoTransform,
        projection: &str,
        palette: Option<&Palette>,
    ) -> Result<Self> {
        if path.exists() {
            let grid = Self::open(path)?;
            if (grid.width, grid.height, grid.data_type) != (width, height, data_type) {
                return Err(ChipmapError::grid(format!(
                    "{} is {}×{} {:?}, expected {width}×{height} {data_type:?}",
                    path.display(),
                    grid.width,
                    grid.height,
                    grid.data_type
                )));
            }
            return Ok(grid);
        }
        Self::create(path, width, height, data_type, transform, projection, palette)
    }

    /// Create a zero-filled grid. A palette is only valid on 8-bit grids.
    pub fn create(
        path: &Path,
        width: usize,
        height: usize,
        data_type: DataType,
        transform: &GeoTransform,
        projection: &str,
        palette: Option<&Palette>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ChipmapError::grid(format!("cannot create an empty {width}×{height} grid")));
        }
        if palette.is_some() && data_type != DataType::U8 {
            return Err(ChipmapError::grid(format!("a {data_type:?} grid cannot carry a palette")));
        }
        let geo = GeoTags { transform, projection, palette };
        let (w, h) = (dimension(width)?, dimension(height)?);
        {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            match data_type {
                DataType::U8 => encode_zeroed::<colortype::Gray8, _>(&mut file, w, h, &geo)?,
                DataType::U16 => encode_zeroed::<colortype::Gray16, _>(&mut file, w, h, &geo)?,
                DataType::F32 => encode_zeroed::<colortype::Gray32Float, _>(&mut file, w, h, &geo)?,
            }
            file.flush()?;
        }
        Self::open(path)
    }

    /// Open an existing grid for windowed reads and writes.
    pub fn open(path: &Path) -> Result<Self> {
        let mut header = [0u8; 2];
        File::open(path)?.read_exact(&mut header)?;
        let endian = match &header {
            b"II" => Endian::Little,
            b"MM" => Endian::Big,
            _ => return Err(ChipmapError::grid(format!("{} is not a TIFF file", path.display()))),
        };

        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
        let (width, height) = decoder.dimensions()?;
        let (data_type, paletted) = match decoder.colortype()? {
            tiff::ColorType::Gray(bits) => (DataType::from_bits(bits), false),
            tiff::ColorType::Palette(8) => (Some(DataType::U8), true),
            _ => (None, false),
        };
        let data_type = data_type.ok_or_else(|| ChipmapError::grid(format!("{} is not a single-band grid", path.display())))?;

        if decoder.get_tag_u32(Tag::Compression)? != 1 {
            return Err(ChipmapError::grid(format!("{} is compressed", path.display())));
        }
        let offsets = decoder.get_tag_u64_vec(Tag::StripOffsets)?;
        let rows_per_strip = match decoder.find_tag(Tag::RowsPerStrip)? {
            Some(v) => v.into_u32()?,
            None => height,
        };

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            width: width as usize,
            height: height as usize,
            data_type,
            paletted,
            layout: StripLayout {
                offsets,
                rows_per_strip: (rows_per_strip as usize).clamp(1, height as usize),
                endian,
            },
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Whether values are palette indices rather than plain gray levels.
    pub fn is_paletted(&self) -> bool {
        self.paletted
    }

    fn check_window(&self, x_off: usize, y_off: usize, w: usize, h: usize) -> Result<()> {
        if x_off + w > self.width || y_off + h > self.height {
            return Err(ChipmapError::grid(format!(
                "window {w}×{h} at ({x_off}, {y_off}) exceeds {}×{} grid {}",
                self.width,
                self.height,
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Byte position of pixel (`col`, `row`).
    fn position(&self, col: usize, row: usize) -> Result<u64> {
        let strip = row / self.layout.rows_per_strip;
        let base = *self.layout.offsets.get(strip).ok_or_else(|| {
            ChipmapError::grid(format!("row {row} has no strip in {}", self.path.display()))
        })?;
        let within = (row % self.layout.rows_per_strip) * self.width + col;
        Ok(base + (within * self.data_type.bytes_per_sample()) as u64)
    }

    /// Overwrite the window whose upper-left pixel is (`x_off`, `y_off`).
    /// Values are cast to the grid's data type.
    pub fn write_window(&mut self, x_off: usize, y_off: usize, values: &Raster<f32>) -> Result<()> {
        self.check_window(x_off, y_off, values.width, values.height)?;
        let mut buf = Vec::with_capacity(values.width * self.data_type.bytes_per_sample());
        for r in 0..values.height {
            buf.clear();
            match self.layout.endian {
                Endian::Little => encode_row::<LittleEndian>(self.data_type, values.row(r), &mut buf)?,
                Endian::Big => encode_row::<BigEndian>(self.data_type, values.row(r), &mut buf)?,
            }
            let pos = self.position(x_off, y_off + r)?;
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.write_all(&buf)?;
        }
        Ok(())
    }

    pub fn read_window(&mut self, x_off: usize, y_off: usize, w: usize, h: usize) -> Result<Raster<f64>> {
        self.check_window(x_off, y_off, w, h)?;
        let mut out = Raster::new(w, h, 0.0);
        let mut buf = vec![0u8; w * self.data_type.bytes_per_sample()];
        for r in 0..h {
            let pos = self.position(x_off, y_off + r)?;
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.read_exact(&mut buf)?;
            let row = &mut out.data[r * w..(r + 1) * w];
            match self.layout.endian {
                Endian::Little => decode_row::<LittleEndian>(self.data_type, &buf, row)?,
                Endian::Big => decode_row::<BigEndian>(self.data_type, &buf, row)?,
            }
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Flush and wait for the data to reach the disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn dimension(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| ChipmapError::grid(format!("grid dimension {n} too large")))
}

fn encode_row<B: ByteOrder>(data_type: DataType, values: &[f32], out: &mut Vec<u8>) -> Result<()> {
    for &v in values {
        match data_type {
            DataType::U8 => out.push(v as u8),
            DataType::U16 => out.write_u16::<B>(v as u16)?,
            DataType::F32 => out.write_f32::<B>(v)?,
        }
    }
    Ok(())
}

fn decode_row<B: ByteOrder>(data_type: DataType, mut bytes: &[u8], out: &mut [f64]) -> Result<()> {
    for v in out.iter_mut() {
        *v = match data_type {
            DataType::U8 => f64::from(bytes.read_u8()?),
            DataType::U16 => f64::from(bytes.read_u16::<B>()?),
            DataType::F32 => f64::from(bytes.read_f32::<B>()?),
        };
    }
    Ok(())
}

// ── Creation ──────────────────────────────────────────────────────────────────

struct GeoTags<'a> {
    transform: &'a GeoTransform,
    projection: &'a str,
    palette: Option<&'a Palette>,
}

fn encode_zeroed<C, W>(out: &mut W, width: u32, height: u32, geo: &GeoTags<'_>) -> Result<()>
where
    C: ColorType,
    C::Inner: Default + Copy,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let mut tiff = TiffEncoder::new(out)?;
    let mut image = tiff.new_image::<C>(width, height)?;
    write_geo_tags(image.encoder(), geo)?;
    image.rows_per_strip(ROWS_PER_STRIP)?;

    let zeros = vec![C::Inner::default(); (ROWS_PER_STRIP * width) as usize];
    let mut row = 0;
    while row < height {
        let rows = ROWS_PER_STRIP.min(height - row);
        image.write_strip(&zeros[..(rows * width) as usize])?;
        row += rows;
    }
    image.finish()?;
    Ok(())
}

fn write_geo_tags<W, K>(dir: &mut DirectoryEncoder<'_, W, K>, geo: &GeoTags<'_>) -> Result<()>
where
    W: Write + Seek,
    K: TiffKind,
{
    let GeoTags { transform, projection, palette } = *geo;
    let scale = [transform.pixel_size, transform.pixel_size, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    let citation = format!("{projection}|");
    let citation_len = u16::try_from(citation.len())
        .map_err(|_| ChipmapError::grid("projection WKT too long for a GeoTIFF citation"))?;
    #[rustfmt::skip]
    let keys: [u16; 16] = [
        1, 1, 0, 3,
        GT_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        GT_CITATION, GEO_ASCII_PARAMS, citation_len, 0,
    ];

    dir.write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &scale[..])?;
    dir.write_tag(Tag::Unknown(MODEL_TIEPOINT), &tiepoint[..])?;
    dir.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), &keys[..])?;
    dir.write_tag(Tag::Unknown(GEO_ASCII_PARAMS), citation.as_str())?;

    // Replaces the BlackIsZero interpretation the image encoder wrote.
    if let Some(palette) = palette {
        dir.write_tag(Tag::PhotometricInterpretation, PHOTOMETRIC_PALETTE)?;
        dir.write_tag(Tag::ColorMap, palette.as_tag())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb(map: &[u16], value: usize) -> [u8; 3] {
        [0, 1, 2].map(|channel| (map[channel * PALETTE_ENTRIES + value] / 257) as u8)
    }

    fn transform() -> GeoTransform {
        GeoTransform { origin_x: 100.0, origin_y: 200.0, pixel_size: 30.0 }
    }

    #[test]
    fn new_grid_is_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.tif");
        let mut g = GridFile::create(&path, 40, 37, DataType::U16, &transform(), "WKT", None).unwrap();
        assert_eq!((g.width(), g.height(), g.data_type()), (40, 37, DataType::U16));
        let all = g.read_window(0, 0, 40, 37).unwrap();
        assert_eq!(all.count_ne(0.0), 0);
    }

    #[test]
    fn window_write_lands_in_place_across_strips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.tif");
        let mut g = GridFile::create(&path, 50, 50, DataType::U8, &transform(), "WKT", None).unwrap();

        let mut block = Raster::new(5, 4, 0.0f32);
        block.set(0, 0, 7.0);
        block.set(3, 4, 9.0);
        // Rows 14..18 straddle the first strip boundary.
        g.write_window(20, 14, &block).unwrap();
        g.flush().unwrap();

        let all = g.read_window(0, 0, 50, 50).unwrap();
        assert_eq!(all.get(14, 20), 7.0);
        assert_eq!(all.get(17, 24), 9.0);
        assert_eq!(all.count_ne(0.0), 2);
    }

    #[test]
    fn reopened_grid_keeps_values_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.tif");
        {
            let mut g = GridFile::create(&path, 20, 20, DataType::F32, &transform(), "WKT", None).unwrap();
            g.write_window(3, 2, &Raster::new(2, 2, 1.5f32)).unwrap();
            g.sync().unwrap();
        }
        let mut g = GridFile::open_or_create(&path, 20, 20, DataType::F32, &transform(), "WKT", None).unwrap();
        let w = g.read_window(3, 2, 2, 2).unwrap();
        assert!(w.data.iter().all(|&v| v == 1.5));

        assert!(GridFile::open_or_create(&path, 20, 20, DataType::U8, &transform(), "WKT", None).is_err());
    }

    #[test]
    fn out_of_bounds_window_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.tif");
        let mut g = GridFile::create(&path, 10, 10, DataType::U8, &transform(), "WKT", None).unwrap();
        assert!(g.write_window(8, 0, &Raster::new(3, 1, 1.0)).is_err());
        assert!(g.read_window(0, 9, 1, 2).is_err());
    }

    #[test]
    fn palette_is_embedded_and_reopened_as_u8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.tif");
        let colors = BTreeMap::from([(1u16, [238, 0, 0, 0]), (42, [162, 1, 255, 0])]);
        let palette = Palette::from_colors(&colors);
        {
            let mut g = GridFile::create(&path, 20, 20, DataType::U8, &transform(), "WKT", Some(&palette)).unwrap();
            g.write_window(0, 0, &Raster::new(1, 1, 42.0f32)).unwrap();
            g.sync().unwrap();
        }

        let mut g = GridFile::open(&path).unwrap();
        assert_eq!(g.data_type(), DataType::U8);
        assert!(g.is_paletted());
        assert_eq!(g.read_window(0, 0, 1, 1).unwrap().get(0, 0), 42.0);

        let mut decoder = Decoder::new(File::open(&path).unwrap()).unwrap();
        let map = decoder.get_tag_u16_vec(Tag::ColorMap).unwrap();
        assert_eq!(map.len(), 3 * PALETTE_ENTRIES);
        assert_eq!(rgb(&map, 42), [162, 1, 255]);
        assert_eq!(rgb(&map, 1), [238, 0, 0]);
        assert_eq!(rgb(&map, 7), [0, 0, 0]);
    }

    #[test]
    fn palette_on_a_wide_grid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let palette = Palette::from_colors(&BTreeMap::new());
        let path = dir.path().join("g.tif");
        assert!(GridFile::create(&path, 4, 4, DataType::U16, &transform(), "WKT", Some(&palette)).is_err());
    }
}
