//! The disk-backed cell cache.
//!
//! [`DiskCellCache`] answers the two calls of an external bounded eviction
//! cache: [`load`](DiskCellCache::load) on a miss and
//! [`on_eviction`](DiskCellCache::on_eviction) when a cell is dropped from
//! memory. Cells that were persisted before (tracked by a presence index
//! rebuilt from the dataset on every open) are read back from the dataset;
//! cells never persisted are produced by an external fallback generator.
//!
//! [`DirtyDiskCellCache`] decorates a [`DiskCellCache`] and skips the write
//! for cells that were never flagged dirty, eliding needless disk writes when
//! an array is only read.
//!
//! Both caches are purely reactive and safe to call concurrently for distinct
//! cell indices. The calling eviction layer must guarantee at most one
//! in-flight `load` or `on_eviction` per individual index; this is not
//! enforced here.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::Arc,
};

use parking_lot::RwLock;
use thiserror::Error;

use crate::{
    cell::{ArrayIndices, ArrayShape, Cell, CellGrid, EntitiesPerElement},
    codec::CompressionMetadata,
    data_type::DataType,
    dataset::{
        block::{self, BlockError},
        Dataset, DatasetAttributes, DatasetCreateError, DatasetError,
    },
    storage::{FilesystemStore, FilesystemStoreCreateError, ReadableWritableListableStorage},
};

/// The default dataset name of a cache.
pub const DEFAULT_DATASET_NAME: &str = "cache";

/// An error produced by a fallback cell generator, propagated unchanged.
pub type FallbackError = Box<dyn std::error::Error + Send + Sync>;

/// The external generator producing cells that have never been persisted.
pub trait CellFallback: Send + Sync {
    /// Produce the cell at the flattened grid index `index`.
    ///
    /// # Errors
    /// Returns a [`FallbackError`] on failure, which the cache propagates to
    /// its caller unchanged.
    fn generate(&self, index: u64) -> Result<Cell, FallbackError>;
}

impl<F> CellFallback for F
where
    F: Fn(u64) -> Result<Cell, FallbackError> + Send + Sync,
{
    fn generate(&self, index: u64) -> Result<Cell, FallbackError> {
        self(index)
    }
}

/// A cache creation error.
#[derive(Debug, Error)]
pub enum CacheCreateError {
    /// A dataset creation/open error.
    #[error(transparent)]
    DatasetCreateError(#[from] DatasetCreateError),
    /// A filesystem store creation error.
    #[error(transparent)]
    FilesystemStoreCreateError(#[from] FilesystemStoreCreateError),
    /// A cell shape dimension exceeds the block size limit of the dataset format.
    #[error("cell shape {0:?} exceeds the block size limit")]
    OversizedCellShape(ArrayShape),
    /// A persisted block lies outside the cell grid.
    #[error("persisted block at grid position {0:?} is outside the cell grid")]
    BlockOutsideGrid(ArrayIndices),
}

/// A cell load error.
#[derive(Debug, Error)]
pub enum CellLoadError {
    /// The cell index is outside the cell grid.
    #[error("cell index {0} is outside the cell grid")]
    InvalidCellIndex(u64),
    /// A cell is recorded as present but its block is missing from the store.
    #[error("cell {0} is recorded as present but its block is missing")]
    MissingBlock(u64),
    /// A dataset error.
    #[error(transparent)]
    DatasetError(#[from] DatasetError),
    /// A block decode error.
    #[error(transparent)]
    BlockError(#[from] BlockError),
    /// The fallback generator failed.
    #[error("fallback generator failed: {0}")]
    FallbackError(#[source] FallbackError),
}

/// A cell store error.
#[derive(Debug, Error)]
pub enum CellStoreError {
    /// The cell index is outside the cell grid.
    #[error("cell index {0} is outside the cell grid")]
    InvalidCellIndex(u64),
    /// The evicted cell's extent disagrees with the grid.
    #[error("cell {index} has extent {got:?}, expected {expected:?}")]
    UnexpectedCellShape {
        /// The cell index.
        index: u64,
        /// The extent recorded by the cell.
        got: ArrayShape,
        /// The extent implied by the grid.
        expected: ArrayShape,
    },
    /// A dataset error.
    #[error(transparent)]
    DatasetError(#[from] DatasetError),
    /// A block encode error.
    #[error(transparent)]
    BlockError(#[from] BlockError),
}

/// A disk-backed cell cache.
///
/// Loads cells from a persistent dataset when they were stored before and
/// from a fallback generator otherwise; persists cells on eviction. The base
/// cache always re-encodes and overwrites on eviction, trusting the latest
/// in-memory copy; wrap it in a [`DirtyDiskCellCache`] to elide writes of
/// unmodified cells.
#[derive(Debug)]
pub struct DiskCellCache {
    dataset: Dataset,
    grid: CellGrid,
    data_type: DataType,
    entities_per_element: EntitiesPerElement,
    fallback: Arc<dyn CellFallback>,
    present: RwLock<HashSet<u64>>,
}

impl core::fmt::Debug for dyn CellFallback {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("CellFallback")
    }
}

impl DiskCellCache {
    /// Create a cache persisting to the dataset `dataset_name` in `storage`.
    ///
    /// If the dataset already exists, its attributes are validated against
    /// `grid`, `data_type`, and `compression`, and the presence index is
    /// rebuilt by scanning the persisted blocks. Otherwise the dataset is
    /// created and the presence index starts empty.
    ///
    /// # Errors
    /// Returns a [`CacheCreateError`] if the existing dataset attributes
    /// mismatch the requested configuration, a persisted block does not map
    /// into `grid`, or the store fails. No cache is returned on error.
    pub fn new(
        storage: ReadableWritableListableStorage,
        dataset_name: &str,
        grid: CellGrid,
        data_type: DataType,
        entities_per_element: EntitiesPerElement,
        compression: CompressionMetadata,
        fallback: Arc<dyn CellFallback>,
    ) -> Result<Self, CacheCreateError> {
        let block_size = grid
            .cell_shape()
            .iter()
            .map(|&d| u32::try_from(d))
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| CacheCreateError::OversizedCellShape(grid.cell_shape().to_vec()))?;
        let attributes = DatasetAttributes::new(
            grid.array_shape().to_vec(),
            block_size,
            data_type,
            compression,
        );
        let (dataset, existed) = Dataset::open_or_create(storage, dataset_name, attributes)?;

        let mut present = HashSet::new();
        if existed {
            for position in dataset.present_block_positions()? {
                let index = grid
                    .index(&position)
                    .ok_or(CacheCreateError::BlockOutsideGrid(position))?;
                present.insert(index);
            }
        }

        Ok(Self {
            dataset,
            grid,
            data_type,
            entities_per_element,
            fallback,
            present: RwLock::new(present),
        })
    }

    /// Create a cache persisting to a [`FilesystemStore`] configured by
    /// `options`.
    ///
    /// # Errors
    /// Returns a [`CacheCreateError`] as for [`DiskCellCache::new`], or if the
    /// cache directory cannot be created.
    pub fn with_options(
        grid: CellGrid,
        data_type: DataType,
        entities_per_element: EntitiesPerElement,
        fallback: Arc<dyn CellFallback>,
        options: &CacheOptions,
    ) -> Result<Self, CacheCreateError> {
        let store = FilesystemStore::new(options.cache_directory_or_default())?;
        Self::new(
            Arc::new(store),
            &options.dataset_name_or_default(),
            grid,
            data_type,
            entities_per_element,
            options.compression_or_default(),
            fallback,
        )
    }

    /// The cell grid of the cache.
    #[must_use]
    pub const fn grid(&self) -> &CellGrid {
        &self.grid
    }

    /// The dataset backing the cache.
    #[must_use]
    pub const fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Whether the cell at `index` is recorded as persisted.
    #[must_use]
    pub fn is_present(&self, index: u64) -> bool {
        self.present.read().contains(&index)
    }

    /// The number of cells recorded as persisted.
    #[must_use]
    pub fn num_present(&self) -> usize {
        self.present.read().len()
    }

    /// Load the cell at the flattened grid index `index`.
    ///
    /// If the cell was persisted before, a buffer sized for its actual
    /// (possibly clipped) extent is allocated and filled from its block; the
    /// returned cell is clean. Otherwise the fallback generator's result is
    /// returned unchanged.
    ///
    /// # Errors
    /// Returns a [`CellLoadError`] if the block cannot be read or decoded, or
    /// if the fallback generator fails.
    pub fn load(&self, index: u64) -> Result<Cell, CellLoadError> {
        if !self.is_present(index) {
            return self
                .fallback
                .generate(index)
                .map_err(CellLoadError::FallbackError);
        }

        let grid_position = self
            .grid
            .grid_position(index)
            .ok_or(CellLoadError::InvalidCellIndex(index))?;
        let min = self
            .grid
            .cell_min(&grid_position)
            .ok_or(CellLoadError::InvalidCellIndex(index))?;
        let shape = self
            .grid
            .cell_shape_at(&grid_position)
            .ok_or(CellLoadError::InvalidCellIndex(index))?;

        let num_entities = self
            .entities_per_element
            .mul_ceil(shape.iter().product::<u64>());
        let mut data = self.data_type.create_buffer(num_entities);

        let serialized = self
            .dataset
            .read_block(&grid_position)?
            .ok_or(CellLoadError::MissingBlock(index))?;
        serialized.decode_into(&mut data, &shape, self.data_type, self.dataset.compression())?;

        Ok(Cell::new(index, min, shape, data))
    }

    /// Persist the evicted cell at the flattened grid index `index`.
    ///
    /// The cell's actual extent is computed from the grid, not taken from the
    /// cell, and cross-checked. An existing block at the same position is
    /// overwritten; presence membership alone never blocks a write. After a
    /// successful write, `index` is recorded in the presence index.
    ///
    /// # Errors
    /// Returns a [`CellStoreError`] if the cell disagrees with the grid or
    /// the encode/write fails.
    pub fn on_eviction(&self, index: u64, cell: &Cell) -> Result<(), CellStoreError> {
        let grid_position = self
            .grid
            .grid_position(index)
            .ok_or(CellStoreError::InvalidCellIndex(index))?;
        let shape = self
            .grid
            .cell_shape_at(&grid_position)
            .ok_or(CellStoreError::InvalidCellIndex(index))?;
        if cell.shape() != shape {
            return Err(CellStoreError::UnexpectedCellShape {
                index,
                got: cell.shape().to_vec(),
                expected: shape,
            });
        }

        let serialized = block::encode_cell(
            cell,
            grid_position,
            self.data_type,
            self.entities_per_element,
            self.dataset.compression(),
        )?;
        self.dataset.write_block(&serialized)?;
        self.present.write().insert(index);
        Ok(())
    }
}

/// A [`DiskCellCache`] decorator that only persists dirty cells.
///
/// Cells produced by the fallback generator and never modified need not be
/// written back: regenerating them later is no more expensive than re-reading
/// them. Eliding their writes keeps read-only traversals of an array from
/// touching the disk at all.
#[derive(Debug)]
pub struct DirtyDiskCellCache {
    inner: DiskCellCache,
}

impl DirtyDiskCellCache {
    /// Wrap `inner` in a dirty gate.
    #[must_use]
    pub const fn new(inner: DiskCellCache) -> Self {
        Self { inner }
    }

    /// The wrapped cache.
    #[must_use]
    pub const fn inner(&self) -> &DiskCellCache {
        &self.inner
    }

    /// Load the cell at `index`. Equivalent to [`DiskCellCache::load`].
    ///
    /// # Errors
    /// Returns a [`CellLoadError`] as for [`DiskCellCache::load`].
    pub fn load(&self, index: u64) -> Result<Cell, CellLoadError> {
        self.inner.load(index)
    }

    /// Persist the evicted cell at `index` only if it is flagged dirty;
    /// otherwise the call is a no-op.
    ///
    /// # Errors
    /// Returns a [`CellStoreError`] as for [`DiskCellCache::on_eviction`].
    pub fn on_eviction(&self, index: u64, cell: &Cell) -> Result<(), CellStoreError> {
        if cell.is_dirty() {
            self.inner.on_eviction(index, cell)
        } else {
            Ok(())
        }
    }
}

/// Cache configuration with explicit per-field overrides.
///
/// A field set to [`None`] is unset and falls back to its default (or, in
/// [`CacheOptions::merge`], to the base configuration's field).
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// The directory the cache persists to. Defaults to a per-process
    /// directory under the system temporary directory.
    pub cache_directory: Option<PathBuf>,
    /// The dataset name. Defaults to [`DEFAULT_DATASET_NAME`].
    pub dataset_name: Option<String>,
    /// The compression codec for newly created datasets. Defaults to
    /// [`CompressionMetadata::default_compression`].
    pub compression: Option<CompressionMetadata>,
}

impl CacheOptions {
    /// Merge two configurations, preferring fields set in `overrides`.
    #[must_use]
    pub fn merge(base: &Self, overrides: &Self) -> Self {
        Self {
            cache_directory: overrides
                .cache_directory
                .clone()
                .or_else(|| base.cache_directory.clone()),
            dataset_name: overrides
                .dataset_name
                .clone()
                .or_else(|| base.dataset_name.clone()),
            compression: overrides
                .compression
                .clone()
                .or_else(|| base.compression.clone()),
        }
    }

    /// The configured cache directory, or the default.
    #[must_use]
    pub fn cache_directory_or_default(&self) -> PathBuf {
        self.cache_directory.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("cell-cache-{}", std::process::id()))
        })
    }

    /// The configured dataset name, or [`DEFAULT_DATASET_NAME`].
    #[must_use]
    pub fn dataset_name_or_default(&self) -> String {
        self.dataset_name
            .clone()
            .unwrap_or_else(|| DEFAULT_DATASET_NAME.to_string())
    }

    /// The configured compression, or the default.
    #[must_use]
    pub fn compression_or_default(&self) -> CompressionMetadata {
        self.compression.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::storage::MemoryStore;

    /// A fallback filling each cell with its flattened index, counting calls.
    struct IndexFillFallback {
        grid: CellGrid,
        calls: AtomicUsize,
    }

    impl IndexFillFallback {
        fn new(grid: CellGrid) -> Arc<Self> {
            Arc::new(Self {
                grid,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl CellFallback for IndexFillFallback {
        fn generate(&self, index: u64) -> Result<Cell, FallbackError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (min, shape) = self
                .grid
                .cell_bounding_box(index)
                .ok_or_else(|| format!("index {index} outside grid"))?;
            let num_elements = usize::try_from(shape.iter().product::<u64>()).unwrap();
            #[allow(clippy::cast_possible_truncation)]
            let data = vec![index as u8; num_elements];
            Ok(Cell::new(index, min, shape, data))
        }
    }

    fn test_cache(
        storage: ReadableWritableListableStorage,
        fallback: Arc<dyn CellFallback>,
    ) -> DiskCellCache {
        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();
        DiskCellCache::new(
            storage,
            DEFAULT_DATASET_NAME,
            grid,
            DataType::UInt8,
            EntitiesPerElement::one(),
            CompressionMetadata::Raw,
            fallback,
        )
        .unwrap()
    }

    #[test]
    fn cache_load_falls_back_when_absent() {
        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();
        let fallback = IndexFillFallback::new(grid);
        let cache = test_cache(Arc::new(MemoryStore::new()), fallback.clone());

        let cell = cache.load(5).unwrap();
        assert_eq!(cell.index(), 5);
        assert_eq!(cell.data(), vec![5; 12]);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_present(5));
    }

    #[test]
    fn cache_store_then_load_round_trip() {
        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();
        let fallback = IndexFillFallback::new(grid);
        let cache = test_cache(Arc::new(MemoryStore::new()), fallback.clone());

        let mut cell = cache.load(5).unwrap();
        cell.data_mut()[0] = 111;
        cache.on_eviction(5, &cell).unwrap();
        assert!(cache.is_present(5));

        let reloaded = cache.load(5).unwrap();
        assert_eq!(reloaded.data(), cell.data());
        assert_eq!(reloaded.min(), cell.min());
        assert_eq!(reloaded.shape(), cell.shape());
        // freshly loaded cells are clean
        assert!(!reloaded.is_dirty());
        // the fallback was only used for the initial load
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_store_overwrites_present_cells() {
        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();
        let fallback = IndexFillFallback::new(grid);
        let cache = test_cache(Arc::new(MemoryStore::new()), fallback);

        let mut cell = cache.load(0).unwrap();
        cache.on_eviction(0, &cell).unwrap();
        cell.data_mut().fill(42);
        // presence membership does not block the second write
        cache.on_eviction(0, &cell).unwrap();
        assert_eq!(cache.load(0).unwrap().data(), vec![42; 12]);
    }

    #[test]
    fn cache_boundary_cell_round_trip() {
        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();
        let fallback = IndexFillFallback::new(grid.clone());
        let cache = test_cache(Arc::new(MemoryStore::new()), fallback);

        // the far corner cell is clipped to 2x1
        let index = grid.index(&[2, 3]).unwrap();
        let cell = cache.load(index).unwrap();
        assert_eq!(cell.shape(), &[2, 1]);
        assert_eq!(cell.data().len(), 2);

        cache.on_eviction(index, &cell).unwrap();
        let reloaded = cache.load(index).unwrap();
        assert_eq!(reloaded.shape(), &[2, 1]);
        assert_eq!(reloaded.data(), cell.data());
    }

    #[test]
    fn cache_rejects_mismatched_cell_shape() {
        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();
        let fallback = IndexFillFallback::new(grid);
        let cache = test_cache(Arc::new(MemoryStore::new()), fallback);

        let cell = Cell::new(0, vec![0, 0], vec![2, 2], vec![0; 4]);
        assert!(matches!(
            cache.on_eviction(0, &cell),
            Err(CellStoreError::UnexpectedCellShape { index: 0, .. })
        ));

        let out_of_grid = Cell::new(999, vec![0, 0], vec![4, 3], vec![0; 12]);
        assert!(matches!(
            cache.on_eviction(999, &out_of_grid),
            Err(CellStoreError::InvalidCellIndex(999))
        ));
    }

    #[test]
    fn cache_presence_survives_reopen() {
        let storage: ReadableWritableListableStorage = Arc::new(MemoryStore::new());
        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();

        {
            let fallback = IndexFillFallback::new(grid.clone());
            let cache = test_cache(storage.clone(), fallback);
            for index in [0, 3, 7] {
                let cell = cache.load(index).unwrap();
                cache.on_eviction(index, &cell).unwrap();
            }
        }

        let failing: Arc<dyn CellFallback> =
            Arc::new(|index: u64| -> Result<Cell, FallbackError> {
                Err(format!("cell {index} should be loaded from disk").into())
            });
        let reopened = test_cache(storage, failing);
        assert_eq!(reopened.num_present(), 3);
        for index in [0, 3, 7] {
            assert!(reopened.is_present(index));
            #[allow(clippy::cast_possible_truncation)]
            let expected = index as u8;
            let cell = reopened.load(index).unwrap();
            assert!(cell.data().iter().all(|&b| b == expected));
        }
        assert!(!reopened.is_present(1));
        assert!(matches!(
            reopened.load(1),
            Err(CellLoadError::FallbackError(_))
        ));
    }

    #[test]
    fn dirty_gate_elides_clean_cells() {
        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();
        let fallback = IndexFillFallback::new(grid);
        let cache =
            DirtyDiskCellCache::new(test_cache(Arc::new(MemoryStore::new()), fallback));

        let mut cell = cache.load(2).unwrap();
        cache.on_eviction(2, &cell).unwrap();
        // never flagged dirty, so nothing was persisted
        assert!(!cache.inner().is_present(2));

        cell.data_mut().fill(9);
        cell.set_dirty(true);
        cache.on_eviction(2, &cell).unwrap();
        assert!(cache.inner().is_present(2));
        assert_eq!(cache.load(2).unwrap().data(), vec![9; 12]);
    }

    #[test]
    fn cache_concurrent_store_load() {
        use rayon::prelude::*;

        let grid = CellGrid::new(vec![10, 10], vec![4, 3]).unwrap();
        let fallback = IndexFillFallback::new(grid.clone());
        let cache = test_cache(Arc::new(MemoryStore::new()), fallback);

        (0..grid.num_cells()).into_par_iter().for_each(|index| {
            let cell = cache.load(index).unwrap();
            cache.on_eviction(index, &cell).unwrap();
        });
        assert_eq!(cache.num_present(), usize::try_from(grid.num_cells()).unwrap());

        (0..grid.num_cells()).into_par_iter().for_each(|index| {
            let cell = cache.load(index).unwrap();
            #[allow(clippy::cast_possible_truncation)]
            let expected = index as u8;
            assert!(cell.data().iter().all(|&b| b == expected));
        });
    }

    #[test]
    fn cache_options_merge() {
        let base = CacheOptions {
            cache_directory: Some(PathBuf::from("/base")),
            dataset_name: Some("base".to_string()),
            compression: None,
        };
        let overrides = CacheOptions {
            cache_directory: None,
            dataset_name: Some("override".to_string()),
            compression: Some(CompressionMetadata::Raw),
        };

        let merged = CacheOptions::merge(&base, &overrides);
        assert_eq!(merged.cache_directory, Some(PathBuf::from("/base")));
        assert_eq!(merged.dataset_name, Some("override".to_string()));
        assert_eq!(merged.compression, Some(CompressionMetadata::Raw));

        let defaults = CacheOptions::default();
        assert_eq!(defaults.dataset_name_or_default(), DEFAULT_DATASET_NAME);
        assert_eq!(
            defaults.compression_or_default(),
            CompressionMetadata::default_compression()
        );
    }
}
