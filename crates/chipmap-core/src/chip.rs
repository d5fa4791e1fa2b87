use crate::grid::Chip;
use crate::product::{Product, ProductTable};
use crate::raster::Raster;

/// Values of one product for one year across a chip.
#[derive(Debug, Clone)]
pub struct Layer {
    pub product: Product,
    pub year: i32,
    pub values: Raster<f32>,
}

/// Every (product, year) layer of a chip plus its coverage mask.
///
/// Layers are stored product-major: all years of the first product, then all
/// years of the next.
#[derive(Debug, Clone)]
pub struct ChipBlock {
    pub chip: Chip,
    pub years: Vec<i32>,
    pub layers: Vec<Layer>,
    /// 1 where the pixel had at least one segment.
    pub coverage: Raster<u8>,
}

impl ChipBlock {
    /// A zero-filled block for `table` × `years`.
    pub fn new(chip: Chip, side: usize, table: &ProductTable, years: &[i32]) -> Self {
        let layers = table
            .entries()
            .iter()
            .flat_map(|entry| {
                years.iter().map(move |&year| Layer {
                    product: entry.product,
                    year,
                    values: Raster::new(side, side, 0.0),
                })
            })
            .collect();
        Self {
            chip,
            years: years.to_vec(),
            layers,
            coverage: Raster::new(side, side, 0),
        }
    }

    pub fn side(&self) -> usize {
        self.coverage.width
    }

    #[inline]
    pub fn layer_index(&self, product_index: usize, year_index: usize) -> usize {
        product_index * self.years.len() + year_index
    }

    pub fn layer(&self, product: Product, year: i32) -> Option<&Layer> {
        self.layers.iter().find(|l| l.product == product && l.year == year)
    }

    pub fn covered_pixels(&self) -> usize {
        self.coverage.count_ne(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridSpec, TileId};

    #[test]
    fn layers_are_product_major() {
        let chip = GridSpec::default().chips(TileId::new(0, 0))[0];
        let table = ProductTable::new(&[Product::Quality, Product::ChangeDate]).unwrap();
        let block = ChipBlock::new(chip, 10, &table, &[2000, 2001, 2002]);

        assert_eq!(block.layers.len(), 6);
        let idx = block.layer_index(1, 2);
        assert_eq!(block.layers[idx].product, Product::ChangeDate);
        assert_eq!(block.layers[idx].year, 2002);
        assert_eq!(block.layer(Product::Quality, 2001).unwrap().values.len(), 100);
        assert_eq!(block.side(), 10);
        assert_eq!(block.covered_pixels(), 0);
    }
}
