//! The cell grid: the logical arrangement of cells tiling an array.

use itertools::izip;
use thiserror::Error;

use super::{ArrayIndices, ArrayShape};

/// A regular cell grid.
///
/// Maps between a flattened cell index, a grid position, and the cell's
/// bounding box, parameterized by the full array shape and the nominal cell
/// shape. Cells in the last grid slot of a dimension are clipped to the
/// remaining array size.
///
/// Flattened indices enumerate grid positions with the *first* dimension
/// varying fastest. This matches the convention of the datasets this crate
/// persists and must not change for the lifetime of a dataset.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CellGrid {
    array_shape: ArrayShape,
    cell_shape: ArrayShape,
    grid_shape: ArrayShape,
}

/// A cell grid creation error.
#[derive(Debug, Error)]
pub enum CellGridCreateError {
    /// The cell shape dimensionality does not match the array shape.
    #[error("cell shape dimensionality {0} does not match array dimensionality {1}")]
    IncompatibleDimensionality(usize, usize),
    /// A cell shape dimension is zero.
    #[error("cell shape {0:?} has a zero dimension")]
    ZeroCellShapeDimension(ArrayShape),
}

impl CellGrid {
    /// Create a new cell grid from the full array shape and the nominal cell shape.
    ///
    /// # Errors
    /// Returns a [`CellGridCreateError`] if the shapes differ in dimensionality
    /// or any cell dimension is zero.
    pub fn new(array_shape: ArrayShape, cell_shape: ArrayShape) -> Result<Self, CellGridCreateError> {
        if array_shape.len() != cell_shape.len() {
            return Err(CellGridCreateError::IncompatibleDimensionality(
                cell_shape.len(),
                array_shape.len(),
            ));
        }
        if cell_shape.contains(&0) {
            return Err(CellGridCreateError::ZeroCellShapeDimension(cell_shape));
        }
        let grid_shape = std::iter::zip(&array_shape, &cell_shape)
            .map(|(a, c)| a.div_ceil(*c))
            .collect();
        Ok(Self {
            array_shape,
            cell_shape,
            grid_shape,
        })
    }

    /// The dimensionality of the grid.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.array_shape.len()
    }

    /// The full array shape.
    #[must_use]
    pub fn array_shape(&self) -> &[u64] {
        &self.array_shape
    }

    /// The nominal cell shape.
    #[must_use]
    pub fn cell_shape(&self) -> &[u64] {
        &self.cell_shape
    }

    /// The grid shape: the number of cells along each dimension.
    #[must_use]
    pub fn grid_shape(&self) -> &[u64] {
        &self.grid_shape
    }

    /// The total number of cells in the grid.
    #[must_use]
    pub fn num_cells(&self) -> u64 {
        self.grid_shape.iter().product()
    }

    /// Convert a flattened cell index to a grid position.
    ///
    /// Returns [`None`] if `index` is outside the grid.
    #[must_use]
    pub fn grid_position(&self, index: u64) -> Option<ArrayIndices> {
        if index >= self.num_cells() {
            return None;
        }
        let mut remainder = index;
        let position = self
            .grid_shape
            .iter()
            .map(|&g| {
                let p = remainder % g;
                remainder /= g;
                p
            })
            .collect();
        Some(position)
    }

    /// Convert a grid position to a flattened cell index.
    ///
    /// Returns [`None`] if `grid_position` is outside the grid.
    #[must_use]
    pub fn index(&self, grid_position: &[u64]) -> Option<u64> {
        if grid_position.len() != self.dimensionality()
            || std::iter::zip(grid_position, &self.grid_shape).any(|(p, g)| p >= g)
        {
            return None;
        }
        let mut index = 0;
        for (&p, &g) in std::iter::zip(grid_position, &self.grid_shape).rev() {
            index = index * g + p;
        }
        Some(index)
    }

    /// The minimum corner of the cell at `grid_position`.
    ///
    /// Returns [`None`] if `grid_position` is outside the grid.
    #[must_use]
    pub fn cell_min(&self, grid_position: &[u64]) -> Option<ArrayIndices> {
        self.in_bounds(grid_position).then(|| {
            std::iter::zip(grid_position, &self.cell_shape)
                .map(|(p, c)| p * c)
                .collect()
        })
    }

    /// The actual extent of the cell at `grid_position`, clipped to the array
    /// boundary.
    ///
    /// Returns [`None`] if `grid_position` is outside the grid.
    #[must_use]
    pub fn cell_shape_at(&self, grid_position: &[u64]) -> Option<ArrayShape> {
        self.in_bounds(grid_position).then(|| {
            izip!(grid_position, &self.cell_shape, &self.array_shape)
                .map(|(p, c, a)| std::cmp::min(*c, a - p * c))
                .collect()
        })
    }

    /// The bounding box (minimum corner and actual extent) of the cell at the
    /// flattened index `index`.
    ///
    /// Returns [`None`] if `index` is outside the grid.
    #[must_use]
    pub fn cell_bounding_box(&self, index: u64) -> Option<(ArrayIndices, ArrayShape)> {
        let grid_position = self.grid_position(index)?;
        let min = self.cell_min(&grid_position)?;
        let shape = self.cell_shape_at(&grid_position)?;
        Some((min, shape))
    }

    fn in_bounds(&self, grid_position: &[u64]) -> bool {
        grid_position.len() == self.dimensionality()
            && std::iter::zip(grid_position, &self.grid_shape).all(|(p, g)| p < g)
    }
}
