//! A disk-backed cell store for out-of-core chunked array caches.
//!
//! Large multidimensional arrays ("images") are split into fixed-size rectangular
//! cells tiling a [`CellGrid`](cell::CellGrid). An external bounded in-memory cache
//! holds a working set of cells and calls into this crate on a miss
//! ([`DiskCellCache::load`](cache::DiskCellCache::load)) or on eviction
//! ([`DiskCellCache::on_eviction`](cache::DiskCellCache::on_eviction)).
//! Evicted cells are persisted to an [N5](https://github.com/saalfeldlab/n5)
//! dataset so that they can be reloaded later without recomputation, including
//! across process restarts.
//!
//! ## Example
//! ```rust,ignore
//! # use std::sync::Arc;
//! use cellcache::{
//!     cache::{CacheOptions, DiskCellCache},
//!     cell::{Cell, CellGrid, EntitiesPerElement},
//!     codec::CompressionMetadata,
//!     data_type::DataType,
//! };
//!
//! let grid = CellGrid::new(vec![640, 640, 128], vec![64, 64, 64])?;
//! let options = CacheOptions {
//!     cache_directory: Some("/path/to/cache".into()),
//!     ..CacheOptions::default()
//! };
//! let cache = DiskCellCache::with_options(
//!     grid.clone(),
//!     DataType::UInt8,
//!     EntitiesPerElement::one(),
//!     Arc::new(move |index: u64| {
//!         let (min, shape) = grid.cell_bounding_box(index).unwrap();
//!         Ok(Cell::new(index, min, shape, vec![0; 64 * 64 * 64]))
//!     }),
//!     &options,
//! )?;
//!
//! let cell = cache.load(0)?; // from disk if present, otherwise from the fallback
//! cache.on_eviction(0, &cell)?; // persist
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Crate Features
//!  - `gzip` (default): the gzip compression codec, backed by [`flate2`].
//!
//! ## Licence
//! `cellcache` is licensed under either of
//!  - the Apache License, Version 2.0 or <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license or <http://opensource.org/licenses/MIT>, at your option.

#![warn(unused_variables)]
#![warn(dead_code)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]

pub mod cache;
pub mod cell;
pub mod codec;
pub mod data_type;
pub mod dataset;
pub mod storage;
