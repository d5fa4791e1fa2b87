/// A dense 2D grid of values, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
}

impl<T: Copy> Raster<T> {
    /// Create a new Raster filled with the given value.
    pub fn new(width: usize, height: usize, fill: T) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        self.data[row * self.width + col] = val;
    }

    /// One row as a slice.
    #[inline]
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.width;
        &self.data[start..start + self.width]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<T: Copy + PartialEq> Raster<T> {
    /// Number of cells not equal to `value`.
    pub fn count_ne(&self, value: T) -> usize {
        self.data.iter().filter(|&&v| v != value).count()
    }
}
