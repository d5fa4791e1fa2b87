//! Annual products: the closed set of kinds, their storage types, and the
//! table binding each kind to its query function.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChipmapError, Result};
use crate::query;
use crate::segment::Segment;

/// Grid name used for the per-tile coverage mask.
pub const COVERAGE_NAME: &str = "Coverage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Product {
    ChangeDate,
    ChangeMagnitude,
    Quality,
    SegmentLength,
    LastChange,
    ClassPrimary,
    ClassSecondary,
    ConfidencePrimary,
    ConfidenceSecondary,
    FromTo,
}

/// The two product families a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductFamily {
    Change,
    Class,
}

impl ProductFamily {
    pub fn products(self) -> &'static [Product] {
        match self {
            ProductFamily::Change => &Product::CHANGE,
            ProductFamily::Class => &Product::CLASS,
        }
    }
}

/// Sample type of a mosaic grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    U8,
    U16,
    F32,
}

impl DataType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::F32 => 4,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(DataType::U8),
            16 => Some(DataType::U16),
            32 => Some(DataType::F32),
            _ => None,
        }
    }
}

impl Product {
    pub const CHANGE: [Product; 5] = [
        Product::ChangeDate,
        Product::ChangeMagnitude,
        Product::Quality,
        Product::SegmentLength,
        Product::LastChange,
    ];

    pub const CLASS: [Product; 5] = [
        Product::ClassPrimary,
        Product::ClassSecondary,
        Product::ConfidencePrimary,
        Product::ConfidenceSecondary,
        Product::FromTo,
    ];

    /// Name used in grid file names.
    pub fn name(self) -> &'static str {
        match self {
            Product::ChangeDate => "ChangeMap",
            Product::ChangeMagnitude => "ChangeMagMap",
            Product::Quality => "QAMap",
            Product::SegmentLength => "SegLength",
            Product::LastChange => "LastChange",
            Product::ClassPrimary => "CoverPrim",
            Product::ClassSecondary => "CoverSec",
            Product::ConfidencePrimary => "CoverConfPrim",
            Product::ConfidenceSecondary => "CoverConfSec",
            Product::FromTo => "SegChange",
        }
    }

    pub fn from_name(name: &str) -> Option<Product> {
        Product::CHANGE
            .iter()
            .chain(Product::CLASS.iter())
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    pub fn data_type(self) -> DataType {
        match self {
            Product::ChangeDate | Product::SegmentLength | Product::LastChange => DataType::U16,
            Product::ChangeMagnitude => DataType::F32,
            Product::Quality
            | Product::ClassPrimary
            | Product::ClassSecondary
            | Product::ConfidencePrimary
            | Product::ConfidenceSecondary
            | Product::FromTo => DataType::U8,
        }
    }

    /// Value of a pixel that no segment answers for.
    pub fn no_match_value(self) -> f64 {
        match self {
            Product::ConfidenceSecondary => 1.0,
            _ => 0.0,
        }
    }

    /// Categorical products get the land-cover color table.
    pub fn has_color_table(self) -> bool {
        matches!(self, Product::ClassPrimary | Product::ClassSecondary | Product::FromTo)
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Lookup table ──────────────────────────────────────────────────────────────

pub type QueryFn = fn(&[Segment], i64) -> f64;

fn query_fn(product: Product) -> QueryFn {
    match product {
        Product::ChangeDate => |s: &[Segment], d: i64| f64::from(query::change_date(s, d)),
        Product::ChangeMagnitude => |s: &[Segment], d: i64| f64::from(query::change_magnitude(s, d)),
        Product::Quality => |s: &[Segment], d: i64| f64::from(query::quality(s, d)),
        Product::SegmentLength => |s: &[Segment], d: i64| f64::from(query::segment_length(s, d)),
        Product::LastChange => |s: &[Segment], d: i64| f64::from(query::last_change(s, d)),
        Product::ClassPrimary => |s: &[Segment], d: i64| f64::from(query::class_primary(s, d)),
        Product::ClassSecondary => |s: &[Segment], d: i64| f64::from(query::class_secondary(s, d)),
        Product::ConfidencePrimary => |s: &[Segment], d: i64| f64::from(query::confidence_primary(s, d)),
        Product::ConfidenceSecondary => |s: &[Segment], d: i64| f64::from(query::confidence_secondary(s, d)),
        Product::FromTo => |s: &[Segment], d: i64| f64::from(query::from_to(s, d)),
    }
}

#[derive(Clone, Copy)]
pub struct ProductEntry {
    pub product: Product,
    pub data_type: DataType,
    pub colored: bool,
    pub no_match: f64,
    pub query: QueryFn,
}

impl fmt::Debug for ProductEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductEntry")
            .field("product", &self.product)
            .field("data_type", &self.data_type)
            .field("colored", &self.colored)
            .field("no_match", &self.no_match)
            .finish_non_exhaustive()
    }
}

/// Products of one run, resolved once up front.
#[derive(Debug, Clone)]
pub struct ProductTable {
    entries: Vec<ProductEntry>,
}

impl ProductTable {
    pub fn new(products: &[Product]) -> Result<Self> {
        if products.is_empty() {
            return Err(ChipmapError::config("at least one product is required"));
        }
        let mut entries: Vec<ProductEntry> = Vec::with_capacity(products.len());
        for &product in products {
            if entries.iter().any(|e| e.product == product) {
                return Err(ChipmapError::config(format!("product {product} listed twice")));
            }
            entries.push(ProductEntry {
                product,
                data_type: product.data_type(),
                colored: product.has_color_table(),
                no_match: product.no_match_value(),
                query: query_fn(product),
            });
        }
        Ok(Self { entries })
    }

    pub fn for_family(family: ProductFamily) -> Result<Self> {
        Self::new(family.products())
    }

    pub fn entries(&self) -> &[ProductEntry] {
        &self.entries
    }

    pub fn index_of(&self, product: Product) -> Option<usize> {
        self.entries.iter().position(|e| e.product == product)
    }
}

// ── Color table ───────────────────────────────────────────────────────────────

pub type Rgba = [u8; 4];

const END_OF_SERIES: Rgba = [145, 145, 145, 0];
const DIFFERENT_CLASS: Rgba = [162, 1, 255, 0];

/// Land-cover classes 0 (no data) through 9 (transition).
const CLASS_COLORS: [Rgba; 10] = [
    [0, 0, 0, 0],       // no data
    [238, 0, 0, 0],     // developed
    [171, 112, 40, 0],  // agriculture
    [227, 227, 194, 0], // grass
    [28, 99, 48, 0],    // tree
    [71, 107, 161, 0],  // water
    [186, 217, 235, 0], // wetland
    [255, 255, 255, 0], // snow
    [179, 174, 163, 0], // barren
    [251, 154, 153, 0], // change
];

/// Palette shared by class and from-to grids.
///
/// 0–9 are the classes, `ii` repeats class i (stable), `i0` marks the end of
/// the series, and `ij` for distinct i, j in 1..=8 marks a class change.
pub fn land_cover_colors() -> BTreeMap<u16, Rgba> {
    let mut table: BTreeMap<u16, Rgba> = CLASS_COLORS
        .iter()
        .enumerate()
        .map(|(i, &c)| (i as u16, c))
        .collect();

    for i in 1..=8u16 {
        table.insert(i * 10, END_OF_SERIES);
        for j in 1..=8u16 {
            let color = if i == j { CLASS_COLORS[i as usize] } else { DIFFERENT_CLASS };
            table.insert(i * 10 + j, color);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_lookup() {
        for p in Product::CHANGE.iter().chain(Product::CLASS.iter()) {
            assert_eq!(Product::from_name(p.name()), Some(*p));
        }
        assert_eq!(Product::from_name("nope"), None);
    }

    #[test]
    fn storage_types_match_product_kind() {
        assert_eq!(Product::ChangeDate.data_type(), DataType::U16);
        assert_eq!(Product::ChangeMagnitude.data_type(), DataType::F32);
        assert_eq!(Product::ConfidencePrimary.data_type(), DataType::U8);
        assert_eq!(Product::FromTo.data_type(), DataType::U8);
    }

    #[test]
    fn table_rejects_duplicates_and_empty_lists() {
        assert!(ProductTable::new(&[]).is_err());
        assert!(ProductTable::new(&[Product::Quality, Product::Quality]).is_err());
        let t = ProductTable::new(&[Product::Quality, Product::FromTo]).unwrap();
        assert_eq!(t.index_of(Product::FromTo), Some(1));
        assert!(t.entries()[1].colored);
    }

    #[test]
    fn table_query_dispatches_to_product_function() {
        let t = ProductTable::for_family(ProductFamily::Class).unwrap();
        let entry = t.entries()[t.index_of(Product::ConfidenceSecondary).unwrap()];
        // No segments: the secondary confidence sentinel.
        assert_eq!((entry.query)(&[], 700_000), 1.0);
    }

    #[test]
    fn empty_pixels_evaluate_to_no_match_value() {
        let t = ProductTable::new(&[Product::CHANGE, Product::CLASS].concat()).unwrap();
        for entry in t.entries() {
            for day in [1, 700_000, 735_000] {
                assert_eq!((entry.query)(&[], day), entry.no_match, "{}", entry.product);
            }
        }
    }

    #[test]
    fn color_table_covers_transition_codes() {
        let ct = land_cover_colors();
        assert_eq!(ct[&4], [28, 99, 48, 0]);
        assert_eq!(ct[&44], ct[&4]);
        assert_eq!(ct[&30], END_OF_SERIES);
        assert_eq!(ct[&42], DIFFERENT_CLASS);
        assert_eq!(ct[&9], [251, 154, 153, 0]);
        assert!(!ct.contains_key(&90));
    }
}
