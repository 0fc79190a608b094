//! Persistent datasets: attribute validation and per-cell block storage.
//!
//! A dataset is rooted at a name within a store. It holds a single
//! `attributes.json` metadata entry recording the array dimensions, block
//! size, data type, and compression codec, plus one block entry per persisted
//! cell at `<name>/<p0>/<p1>/…` (one decimal path segment per dimension,
//! dimension 0 first).

pub mod block;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cell::{ArrayIndices, ArrayShape},
    codec::{CompressionMetadata, CompressionTraits},
    data_type::DataType,
    storage::{
        ReadableWritableListableStorage, StorageError, StoreKey, StorePrefix,
    },
};

use block::{BlockError, SerializedBlock};

/// The name of the per-dataset metadata entry.
pub const ATTRIBUTES_FILE: &str = "attributes.json";

/// The attributes of a dataset, recorded in its `attributes.json` entry.
///
/// Immutable once a dataset is created. Reattaching to an existing dataset
/// compares the stored data type, dimensionality, dimensions, and block size
/// against the requested values and fails on any mismatch.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatasetAttributes {
    dimensions: ArrayShape,
    block_size: Vec<u32>,
    data_type: DataType,
    compression: CompressionMetadata,
}

impl DatasetAttributes {
    /// Create new dataset attributes.
    #[must_use]
    pub fn new(
        dimensions: ArrayShape,
        block_size: Vec<u32>,
        data_type: DataType,
        compression: CompressionMetadata,
    ) -> Self {
        Self {
            dimensions,
            block_size,
            data_type,
            compression,
        }
    }

    /// The dimensions of the full array.
    #[must_use]
    pub fn dimensions(&self) -> &[u64] {
        &self.dimensions
    }

    /// The nominal block (cell) size.
    #[must_use]
    pub fn block_size(&self) -> &[u32] {
        &self.block_size
    }

    /// The element data type.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The compression codec metadata.
    #[must_use]
    pub const fn compression(&self) -> &CompressionMetadata {
        &self.compression
    }

    /// The dimensionality of the dataset.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.dimensions.len()
    }
}

/// A dataset creation/open error.
#[derive(Debug, Error)]
pub enum DatasetCreateError {
    /// The dataset exists with a different data type.
    #[error("dataset exists with data type {stored}, but {requested} was requested")]
    MismatchedDataType {
        /// The stored data type.
        stored: DataType,
        /// The requested data type.
        requested: DataType,
    },
    /// The dataset exists with a different dimensionality.
    #[error("dataset exists with dimensionality {stored}, but {requested} was requested")]
    MismatchedDimensionality {
        /// The stored dimensionality.
        stored: usize,
        /// The requested dimensionality.
        requested: usize,
    },
    /// The dataset exists with different array dimensions.
    #[error("dataset exists with dimensions {stored:?}, but {requested:?} were requested")]
    MismatchedDimensions {
        /// The stored dimensions.
        stored: ArrayShape,
        /// The requested dimensions.
        requested: ArrayShape,
    },
    /// The dataset exists with a different block size.
    #[error("dataset exists with block size {stored:?}, but {requested:?} was requested")]
    MismatchedBlockSize {
        /// The stored block size.
        stored: Vec<u32>,
        /// The requested block size.
        requested: Vec<u32>,
    },
    /// A store entry below the dataset root does not decode to a block position.
    #[error("store entry {0} does not map to a valid block position")]
    InvalidBlockKey(StoreKey),
    /// An error (de)serializing the dataset attributes.
    #[error(transparent)]
    MetadataError(#[from] serde_json::Error),
    /// A storage error.
    #[error(transparent)]
    StorageError(#[from] StorageError),
}

/// A per-operation dataset error.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// A storage error.
    #[error(transparent)]
    StorageError(#[from] StorageError),
    /// A block encode/decode error.
    #[error(transparent)]
    BlockError(#[from] BlockError),
}

/// A named dataset within a store.
///
/// Holds the store handle for its lifetime and mediates all block and
/// metadata access.
#[derive(Debug)]
pub struct Dataset {
    storage: ReadableWritableListableStorage,
    name: String,
    attributes: DatasetAttributes,
    compression: Box<dyn CompressionTraits>,
}

impl Dataset {
    /// Open the dataset `name` in `storage`, creating it with `attributes` if
    /// it does not exist.
    ///
    /// If the dataset exists, the stored attributes are validated against the
    /// requested ones field by field and become authoritative (in particular,
    /// the stored compression codec is adopted). Returns the dataset and
    /// whether it already existed.
    ///
    /// # Errors
    /// Returns a [`DatasetCreateError`] if the stored attributes mismatch the
    /// requested ones, the metadata cannot be (de)serialized, or the store
    /// fails.
    pub fn open_or_create(
        storage: ReadableWritableListableStorage,
        name: &str,
        attributes: DatasetAttributes,
    ) -> Result<(Self, bool), DatasetCreateError> {
        let attributes_key = attributes_key(name)?;
        let (attributes, existed) = match storage.get(&attributes_key)? {
            Some(bytes) => {
                let stored: DatasetAttributes = serde_json::from_slice(&bytes)?;
                validate_attributes(&stored, &attributes)?;
                (stored, true)
            }
            None => {
                storage.set(&attributes_key, &serde_json::to_vec(&attributes)?)?;
                (attributes, false)
            }
        };
        let compression = attributes.compression().create_compression();
        Ok((
            Self {
                storage,
                name: name.to_string(),
                attributes,
                compression,
            },
            existed,
        ))
    }

    /// The name of the dataset.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attributes of the dataset.
    #[must_use]
    pub const fn attributes(&self) -> &DatasetAttributes {
        &self.attributes
    }

    /// The compression codec of the dataset.
    #[must_use]
    pub fn compression(&self) -> &dyn CompressionTraits {
        self.compression.as_ref()
    }

    /// The store key of the block at `grid_position`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the resulting key is invalid.
    pub fn block_key(&self, grid_position: &[u64]) -> Result<StoreKey, StorageError> {
        let mut key = self.name.clone();
        for p in grid_position {
            key.push('/');
            key.push_str(&p.to_string());
        }
        Ok(StoreKey::new(key)?)
    }

    /// Read and parse the block at `grid_position`.
    ///
    /// Returns [`None`] if no block is stored at that position.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if the store fails or the block is malformed.
    pub fn read_block(
        &self,
        grid_position: &[u64],
    ) -> Result<Option<SerializedBlock>, DatasetError> {
        let key = self.block_key(grid_position)?;
        match self.storage.get(&key)? {
            Some(bytes) => Ok(Some(SerializedBlock::from_bytes(
                grid_position.to_vec(),
                &bytes,
            )?)),
            None => Ok(None),
        }
    }

    /// Write `block` at its grid position, replacing any existing block.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if the store fails.
    pub fn write_block(&self, block: &SerializedBlock) -> Result<(), DatasetError> {
        let key = self.block_key(block.grid_position())?;
        self.storage.set(&key, &block.to_bytes())?;
        Ok(())
    }

    /// Enumerate the grid positions of every block persisted in the dataset.
    ///
    /// Walks every entry below the dataset root, skipping the attributes
    /// entry, and decodes each remaining path into a grid position.
    ///
    /// # Errors
    /// Returns [`DatasetCreateError::InvalidBlockKey`] if an entry does not
    /// decode to a grid position of the dataset's dimensionality, or a
    /// storage error if the walk fails.
    pub fn present_block_positions(&self) -> Result<Vec<ArrayIndices>, DatasetCreateError> {
        let prefix = StorePrefix::new(format!("{}/", self.name)).map_err(StorageError::from)?;
        let ndim = self.attributes.dimensionality();
        let mut positions = Vec::new();
        for key in self.storage.list_prefix(&prefix)? {
            if key.final_component() == ATTRIBUTES_FILE {
                continue;
            }
            let Some(relative) = key.as_str().strip_prefix(prefix.as_str()) else {
                return Err(DatasetCreateError::InvalidBlockKey(key));
            };
            let segments: Vec<&str> = relative.split('/').collect();
            if segments.len() != ndim {
                return Err(DatasetCreateError::InvalidBlockKey(key));
            }
            let Ok(position) = segments
                .iter()
                .map(|s| s.parse::<u64>())
                .collect::<Result<ArrayIndices, _>>()
            else {
                return Err(DatasetCreateError::InvalidBlockKey(key));
            };
            positions.push(position);
        }
        Ok(positions)
    }
}

/// The store key of the attributes entry of the dataset `name`.
fn attributes_key(name: &str) -> Result<StoreKey, StorageError> {
    Ok(StoreKey::new(format!("{name}/{ATTRIBUTES_FILE}"))?)
}

fn validate_attributes(
    stored: &DatasetAttributes,
    requested: &DatasetAttributes,
) -> Result<(), DatasetCreateError> {
    if stored.data_type() != requested.data_type() {
        return Err(DatasetCreateError::MismatchedDataType {
            stored: stored.data_type(),
            requested: requested.data_type(),
        });
    }
    if stored.dimensionality() != requested.dimensionality() {
        return Err(DatasetCreateError::MismatchedDimensionality {
            stored: stored.dimensionality(),
            requested: requested.dimensionality(),
        });
    }
    if stored.dimensions() != requested.dimensions() {
        return Err(DatasetCreateError::MismatchedDimensions {
            stored: stored.dimensions().to_vec(),
            requested: requested.dimensions().to_vec(),
        });
    }
    if stored.block_size() != requested.block_size() {
        return Err(DatasetCreateError::MismatchedBlockSize {
            stored: stored.block_size().to_vec(),
            requested: requested.block_size().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cell::{Cell, EntitiesPerElement},
        codec::RawCompression,
        storage::{MemoryStore, WritableStorageTraits},
    };

    fn test_attributes() -> DatasetAttributes {
        DatasetAttributes::new(
            vec![10, 10],
            vec![4, 3],
            DataType::UInt8,
            CompressionMetadata::Raw,
        )
    }

    #[test]
    fn dataset_create_and_reopen() {
        let storage: ReadableWritableListableStorage = Arc::new(MemoryStore::new());
        let (dataset, existed) =
            Dataset::open_or_create(storage.clone(), "cache", test_attributes()).unwrap();
        assert!(!existed);
        assert_eq!(dataset.name(), "cache");
        assert_eq!(dataset.compression().identifier(), "raw");

        let (dataset, existed) =
            Dataset::open_or_create(storage, "cache", test_attributes()).unwrap();
        assert!(existed);
        assert_eq!(dataset.attributes(), &test_attributes());
    }

    #[test]
    fn dataset_mismatched_attributes() {
        let storage: ReadableWritableListableStorage = Arc::new(MemoryStore::new());
        Dataset::open_or_create(storage.clone(), "cache", test_attributes()).unwrap();

        let mismatched_type = DatasetAttributes::new(
            vec![10, 10],
            vec![4, 3],
            DataType::UInt16,
            CompressionMetadata::Raw,
        );
        assert!(matches!(
            Dataset::open_or_create(storage.clone(), "cache", mismatched_type),
            Err(DatasetCreateError::MismatchedDataType { .. })
        ));

        let mismatched_dimensionality = DatasetAttributes::new(
            vec![10, 10, 10],
            vec![4, 3, 2],
            DataType::UInt8,
            CompressionMetadata::Raw,
        );
        assert!(matches!(
            Dataset::open_or_create(storage.clone(), "cache", mismatched_dimensionality),
            Err(DatasetCreateError::MismatchedDimensionality {
                stored: 2,
                requested: 3
            })
        ));

        let mismatched_dimensions = DatasetAttributes::new(
            vec![10, 12],
            vec![4, 3],
            DataType::UInt8,
            CompressionMetadata::Raw,
        );
        assert!(matches!(
            Dataset::open_or_create(storage.clone(), "cache", mismatched_dimensions),
            Err(DatasetCreateError::MismatchedDimensions { .. })
        ));

        let mismatched_block_size = DatasetAttributes::new(
            vec![10, 10],
            vec![5, 5],
            DataType::UInt8,
            CompressionMetadata::Raw,
        );
        assert!(matches!(
            Dataset::open_or_create(storage, "cache", mismatched_block_size),
            Err(DatasetCreateError::MismatchedBlockSize { .. })
        ));
    }

    #[test]
    fn dataset_block_round_trip() {
        let storage: ReadableWritableListableStorage = Arc::new(MemoryStore::new());
        let (dataset, _) =
            Dataset::open_or_create(storage, "cache", test_attributes()).unwrap();

        assert!(dataset.read_block(&[1, 2]).unwrap().is_none());

        let cell = Cell::new(0, vec![4, 6], vec![4, 3], vec![7; 12]);
        let encoded = block::encode_cell(
            &cell,
            vec![1, 2],
            DataType::UInt8,
            EntitiesPerElement::one(),
            &RawCompression,
        )
        .unwrap();
        dataset.write_block(&encoded).unwrap();

        let decoded = dataset.read_block(&[1, 2]).unwrap().unwrap();
        assert_eq!(decoded.size(), &[4, 3]);
        let mut buffer = DataType::UInt8.create_buffer(12);
        decoded
            .decode_into(&mut buffer, &[4, 3], DataType::UInt8, &RawCompression)
            .unwrap();
        assert_eq!(buffer, vec![7; 12]);
    }

    #[test]
    fn dataset_present_block_positions() {
        let storage: ReadableWritableListableStorage = Arc::new(MemoryStore::new());
        let (dataset, _) =
            Dataset::open_or_create(storage, "cache", test_attributes()).unwrap();

        assert!(dataset.present_block_positions().unwrap().is_empty());

        let cell = Cell::new(0, vec![0, 0], vec![4, 3], vec![0; 12]);
        for position in [vec![0, 0], vec![2, 1]] {
            let encoded = block::encode_cell(
                &cell,
                position,
                DataType::UInt8,
                EntitiesPerElement::one(),
                &RawCompression,
            )
            .unwrap();
            dataset.write_block(&encoded).unwrap();
        }

        // the attributes entry is skipped
        let positions = dataset.present_block_positions().unwrap();
        assert_eq!(positions, vec![vec![0, 0], vec![2, 1]]);
    }

    #[test]
    fn dataset_malformed_block_path() {
        let store = Arc::new(MemoryStore::new());
        let storage: ReadableWritableListableStorage = store.clone();
        let (dataset, _) =
            Dataset::open_or_create(storage, "cache", test_attributes()).unwrap();

        store.set(&"cache/0/not-a-number".try_into().unwrap(), &[]).unwrap();
        assert!(matches!(
            dataset.present_block_positions(),
            Err(DatasetCreateError::InvalidBlockKey(_))
        ));
    }
}
