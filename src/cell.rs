//! Cells: the in-memory unit of caching.
//!
//! A [`Cell`] is a rectangular sub-region of a large array holding a contiguous
//! buffer of raw element bytes. Cells at the far boundary of the array can be
//! smaller than the nominal cell shape of the [`CellGrid`].

mod grid;

pub use grid::{CellGrid, CellGridCreateError};

use num::rational::Ratio;

/// The shape of an array or cell.
pub type ArrayShape = Vec<u64>;

/// Array element indices, e.g. the minimum corner of a cell or a grid position.
pub type ArrayIndices = Vec<u64>;

/// A rational multiplier converting a count of array elements into a count of
/// underlying storage entities.
///
/// Most element types map one-to-one onto storage entities, but packed
/// encodings can map an element onto a fraction of an entity (e.g. one bit of
/// a `u64`) or onto several entities (e.g. a complex value as two floats).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EntitiesPerElement(Ratio<u64>);

impl EntitiesPerElement {
    /// Create a new entities-per-element multiplier `numerator / denominator`.
    ///
    /// # Panics
    /// Panics if `denominator` is zero.
    #[must_use]
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self(Ratio::new(numerator, denominator))
    }

    /// The identity multiplier: one entity per element.
    #[must_use]
    pub fn one() -> Self {
        Self(Ratio::from_integer(1))
    }

    /// Multiply `elements` by this ratio, rounding up to a whole entity count.
    #[must_use]
    pub fn mul_ceil(&self, elements: u64) -> u64 {
        (self.0 * Ratio::from_integer(elements)).ceil().to_integer()
    }
}

impl Default for EntitiesPerElement {
    fn default() -> Self {
        Self::one()
    }
}

/// The in-memory unit of caching: a rectangular sub-region of a large array.
///
/// A cell records its flattened grid index, its minimum corner, its actual
/// extent (clipped at array boundaries, so possibly smaller than the nominal
/// cell shape), a contiguous buffer of raw element bytes in native byte order,
/// and a `dirty` flag.
///
/// Cells are clean at construction. Whichever component mutates a cell's data
/// is responsible for calling [`Cell::set_dirty`]; freshly loaded cells are by
/// definition in sync with disk and stay clean.
#[derive(Clone, Debug)]
pub struct Cell {
    index: u64,
    min: ArrayIndices,
    shape: ArrayShape,
    data: Vec<u8>,
    dirty: bool,
}

impl Cell {
    /// Create a new clean cell from its raw byte buffer.
    #[must_use]
    pub fn new(index: u64, min: ArrayIndices, shape: ArrayShape, data: Vec<u8>) -> Self {
        Self {
            index,
            min,
            shape,
            data,
            dirty: false,
        }
    }

    /// Create a new clean cell from a slice of typed elements.
    #[must_use]
    pub fn from_elements<T: bytemuck::NoUninit>(
        index: u64,
        min: ArrayIndices,
        shape: ArrayShape,
        elements: &[T],
    ) -> Self {
        Self::new(index, min, shape, bytemuck::cast_slice(elements).to_vec())
    }

    /// The flattened grid index of the cell.
    #[must_use]
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// The minimum corner of the cell.
    #[must_use]
    pub fn min(&self) -> &[u64] {
        &self.min
    }

    /// The actual extent of the cell, one element count per dimension.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The number of elements in the cell, the product of its extent.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// The raw element bytes of the cell, in native byte order.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the raw element bytes of the cell.
    ///
    /// Mutating the buffer does not implicitly flag the cell as dirty; call
    /// [`Cell::set_dirty`] after modifying elements that must be written back.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the cell and return its raw byte buffer.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Copy the cell buffer into a vector of typed elements.
    ///
    /// # Panics
    /// Panics if the buffer length is not a multiple of `size_of::<T>()`.
    #[must_use]
    pub fn to_elements<T: bytemuck::AnyBitPattern + bytemuck::NoUninit>(&self) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.data)
    }

    /// Whether the cell has been modified since it was produced.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flag the cell as modified (or explicitly clean again).
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_per_element_mul_ceil() {
        assert_eq!(EntitiesPerElement::one().mul_ceil(27), 27);
        assert_eq!(EntitiesPerElement::new(1, 64).mul_ceil(64), 1);
        assert_eq!(EntitiesPerElement::new(1, 64).mul_ceil(65), 2);
        assert_eq!(EntitiesPerElement::new(2, 1).mul_ceil(3), 6);
        assert_eq!(EntitiesPerElement::new(3, 2).mul_ceil(3), 5);
    }

    #[test]
    fn cell_clean_at_construction() {
        let mut cell = Cell::new(0, vec![0, 0], vec![2, 2], vec![0; 4]);
        assert!(!cell.is_dirty());
        cell.data_mut()[0] = 1;
        assert!(!cell.is_dirty());
        cell.set_dirty(true);
        assert!(cell.is_dirty());
    }

    #[test]
    fn cell_typed_elements() {
        let elements: Vec<u16> = vec![1, 2, 3, 4, 5, 6];
        let cell = Cell::from_elements(3, vec![2, 0], vec![2, 3], &elements);
        assert_eq!(cell.num_elements(), 6);
        assert_eq!(cell.data().len(), 12);
        assert_eq!(cell.to_elements::<u16>(), elements);
    }
}
