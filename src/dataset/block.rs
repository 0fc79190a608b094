//! Serialized cell blocks: the on-disk unit of a dataset.
//!
//! A block is a fixed-size big-endian header followed by a compressed payload:
//!
//! ```text
//! mode: u16 (0 = default), ndim: u16, size[d]: u32 for each dimension, payload
//! ```
//!
//! The declared size is the cell's *actual* extent, which is smaller than the
//! nominal cell shape for boundary cells. Payload bytes are stored big-endian
//! and converted to native byte order on decode.

use thiserror::Error;

use crate::{
    cell::{ArrayIndices, ArrayShape, Cell, EntitiesPerElement},
    codec::{CodecError, CompressionTraits},
    data_type::DataType,
};

/// The block mode for fixed-length blocks.
const BLOCK_MODE_DEFAULT: u16 = 0;

/// A serialized cell block: declared extent, grid position, and compressed
/// payload.
///
/// Blocks are produced by [`encode_cell`] on the write path and parsed by
/// [`SerializedBlock::from_bytes`] on the read path. The payload is write-only
/// in its serialized form; it can only be interpreted by decoding it into a
/// cell buffer with [`SerializedBlock::decode_into`].
#[derive(Debug, Clone)]
pub struct SerializedBlock {
    size: Vec<u32>,
    grid_position: ArrayIndices,
    payload: Vec<u8>,
}

/// A block encode/decode error.
#[derive(Debug, Error)]
pub enum BlockError {
    /// The block header is truncated or malformed.
    #[error("block header is truncated or malformed")]
    InvalidHeader,
    /// An unsupported block mode.
    #[error("unsupported block mode {0}")]
    UnsupportedBlockMode(u16),
    /// The block dimensionality does not match the grid.
    #[error("block dimensionality {0} does not match expected dimensionality {1}")]
    UnexpectedDimensionality(usize, usize),
    /// The declared block size does not match the expected cell extent.
    #[error("got block size {0:?}, expected {1:?}")]
    UnexpectedBlockSize(Vec<u32>, ArrayShape),
    /// The decompressed payload size does not match the expected buffer size.
    #[error("got payload with {0} bytes, expected {1}")]
    UnexpectedPayloadSize(u64, u64),
    /// The cell buffer size does not match its extent and data type.
    #[error("got cell buffer with {0} bytes, expected {1}")]
    UnexpectedCellDataSize(u64, u64),
    /// A cell extent dimension exceeds the `u32` block size limit.
    #[error("cell extent {0:?} exceeds the block size limit")]
    OversizedExtent(ArrayShape),
    /// A compression codec error.
    #[error(transparent)]
    CodecError(#[from] CodecError),
    /// Raw typed data cannot be read directly out of a serialized block.
    #[error("block data cannot be accessed directly, decode it into a cell buffer instead")]
    UnsupportedRawDataAccess,
}

impl SerializedBlock {
    /// The declared extent of the block, one element count per dimension.
    #[must_use]
    pub fn size(&self) -> &[u32] {
        &self.size
    }

    /// The grid position of the block.
    #[must_use]
    pub fn grid_position(&self) -> &[u64] {
        &self.grid_position
    }

    /// The number of elements declared by the block extent.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.size.iter().map(|&d| u64::from(d)).product()
    }

    /// Attempt to read raw typed data directly out of the block.
    ///
    /// This operation is unsupported: the payload is compressed and in
    /// big-endian element order, so handing it out as-is would silently yield
    /// wrong data. Use [`SerializedBlock::decode_into`].
    ///
    /// # Errors
    /// Always returns [`BlockError::UnsupportedRawDataAccess`].
    pub fn raw_data(&self) -> Result<&[u8], BlockError> {
        Err(BlockError::UnsupportedRawDataAccess)
    }

    /// Serialize the block into its wire representation.
    ///
    /// # Panics
    /// Panics if the block dimensionality exceeds [`u16::MAX`].
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 * self.size.len() + self.payload.len());
        out.extend_from_slice(&BLOCK_MODE_DEFAULT.to_be_bytes());
        out.extend_from_slice(&u16::try_from(self.size.len()).unwrap().to_be_bytes());
        for dim in &self.size {
            out.extend_from_slice(&dim.to_be_bytes());
        }
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a block read from the store at `grid_position`.
    ///
    /// # Errors
    /// Returns a [`BlockError`] if the header is truncated, the block mode is
    /// unsupported, or the dimensionality does not match `grid_position`.
    pub fn from_bytes(grid_position: ArrayIndices, bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() < 4 {
            return Err(BlockError::InvalidHeader);
        }
        let mode = u16::from_be_bytes([bytes[0], bytes[1]]);
        if mode != BLOCK_MODE_DEFAULT {
            return Err(BlockError::UnsupportedBlockMode(mode));
        }
        let ndim = usize::from(u16::from_be_bytes([bytes[2], bytes[3]]));
        if ndim != grid_position.len() {
            return Err(BlockError::UnexpectedDimensionality(
                ndim,
                grid_position.len(),
            ));
        }
        let header_len = 4 + 4 * ndim;
        if bytes.len() < header_len {
            return Err(BlockError::InvalidHeader);
        }
        let size = bytes[4..header_len]
            .chunks_exact(4)
            .map(|dim| u32::from_be_bytes([dim[0], dim[1], dim[2], dim[3]]))
            .collect();
        Ok(Self {
            size,
            grid_position,
            payload: bytes[header_len..].to_vec(),
        })
    }

    /// Decode the block payload into `buffer`, converting elements to native
    /// byte order.
    ///
    /// `buffer` must be sized for the expected cell extent, i.e.
    /// `mul_ceil(entities_per_element × product(expected_shape)) × data_type.size()`
    /// bytes.
    ///
    /// # Errors
    /// Returns a [`BlockError`] if the declared block size does not match
    /// `expected_shape`, the codec fails, or the decompressed payload does not
    /// fill `buffer` exactly.
    pub fn decode_into(
        &self,
        buffer: &mut [u8],
        expected_shape: &[u64],
        data_type: DataType,
        compression: &dyn CompressionTraits,
    ) -> Result<(), BlockError> {
        if self
            .size
            .iter()
            .map(|&d| u64::from(d))
            .ne(expected_shape.iter().copied())
        {
            return Err(BlockError::UnexpectedBlockSize(
                self.size.clone(),
                expected_shape.to_vec(),
            ));
        }
        let decoded = compression.decode(self.payload.clone())?;
        if decoded.len() != buffer.len() {
            return Err(BlockError::UnexpectedPayloadSize(
                decoded.len() as u64,
                buffer.len() as u64,
            ));
        }
        buffer.copy_from_slice(&decoded);
        reverse_endianness(buffer, data_type.size());
        Ok(())
    }
}

/// Encode an evicted cell into a [`SerializedBlock`] at `grid_position`.
///
/// The block declares the cell's actual extent, not the nominal cell shape.
///
/// # Errors
/// Returns a [`BlockError`] if the cell buffer size disagrees with its extent
/// and `data_type`, an extent dimension overflows the block size limit, or the
/// codec fails.
pub fn encode_cell(
    cell: &Cell,
    grid_position: ArrayIndices,
    data_type: DataType,
    entities_per_element: EntitiesPerElement,
    compression: &dyn CompressionTraits,
) -> Result<SerializedBlock, BlockError> {
    let num_entities = entities_per_element.mul_ceil(cell.num_elements());
    let expected_len = num_entities * data_type.size() as u64;
    if cell.data().len() as u64 != expected_len {
        return Err(BlockError::UnexpectedCellDataSize(
            cell.data().len() as u64,
            expected_len,
        ));
    }

    let size = cell
        .shape()
        .iter()
        .map(|&d| u32::try_from(d))
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| BlockError::OversizedExtent(cell.shape().to_vec()))?;

    let mut bytes = cell.data().to_vec();
    reverse_endianness(&mut bytes, data_type.size());
    let payload = compression.encode(bytes)?;

    Ok(SerializedBlock {
        size,
        grid_position,
        payload,
    })
}

/// Reverse the byte order of each `element_size` sized element of `bytes`.
///
/// A no-op on big-endian targets and for single-byte elements.
fn reverse_endianness(bytes: &mut [u8], element_size: usize) {
    if element_size > 1 && cfg!(target_endian = "little") {
        for element in bytes.chunks_exact_mut(element_size) {
            element.reverse();
        }
    }
}
