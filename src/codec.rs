//! Compression codecs for serialized cell block payloads.
//!
//! Codecs operate on whole byte payloads; the block framing itself is never
//! compressed. The codec used by a dataset is recorded in its attributes as
//! [`CompressionMetadata`] and must be available when the dataset is reopened.

#[cfg(feature = "gzip")]
mod gzip;
mod raw;

#[cfg(feature = "gzip")]
pub use gzip::{GzipCompression, GzipCompressionLevel, GzipCompressionLevelError};
pub use raw::RawCompression;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Traits for a compression codec applied to serialized cell payloads.
pub trait CompressionTraits: Send + Sync + core::fmt::Debug {
    /// The identifier of the codec, as recorded in dataset attributes.
    fn identifier(&self) -> &'static str;

    /// Compress `decoded`.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if the compressor fails.
    fn encode(&self, decoded: Vec<u8>) -> Result<Vec<u8>, CodecError>;

    /// Decompress `encoded`.
    ///
    /// # Errors
    /// Returns a [`CodecError`] if `encoded` is not a valid stream for this codec.
    fn decode(&self, encoded: Vec<u8>) -> Result<Vec<u8>, CodecError>;
}

/// A compression codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

/// Compression codec metadata, recorded in the `compression` field of dataset
/// attributes.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CompressionMetadata {
    /// No compression.
    Raw,
    /// Gzip compression.
    #[cfg(feature = "gzip")]
    Gzip {
        /// The gzip compression level.
        #[serde(default)]
        level: GzipCompressionLevel,
    },
}

impl CompressionMetadata {
    /// Gzip compression with the default level (with the `gzip` feature),
    /// otherwise no compression.
    #[must_use]
    pub fn default_compression() -> Self {
        #[cfg(feature = "gzip")]
        {
            Self::Gzip {
                level: GzipCompressionLevel::default(),
            }
        }
        #[cfg(not(feature = "gzip"))]
        {
            Self::Raw
        }
    }

    /// Instantiate the codec described by this metadata.
    #[must_use]
    pub fn create_compression(&self) -> Box<dyn CompressionTraits> {
        match self {
            Self::Raw => Box::new(RawCompression),
            #[cfg(feature = "gzip")]
            Self::Gzip { level } => Box::new(GzipCompression::new(*level)),
        }
    }
}

impl Default for CompressionMetadata {
    fn default() -> Self {
        Self::default_compression()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_metadata_raw() {
        let json = r#"{"type":"raw"}"#;
        let metadata: CompressionMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata, CompressionMetadata::Raw);
        assert_eq!(serde_json::to_string(&metadata).unwrap(), json);
        assert_eq!(metadata.create_compression().identifier(), "raw");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn compression_metadata_gzip() {
        let metadata: CompressionMetadata =
            serde_json::from_str(r#"{"type":"gzip","level":-1}"#).unwrap();
        assert_eq!(metadata.create_compression().identifier(), "gzip");

        // the level may be omitted
        let metadata: CompressionMetadata = serde_json::from_str(r#"{"type":"gzip"}"#).unwrap();
        assert_eq!(
            metadata,
            CompressionMetadata::Gzip {
                level: GzipCompressionLevel::default()
            }
        );
    }

    #[test]
    fn compression_metadata_unknown() {
        assert!(serde_json::from_str::<CompressionMetadata>(r#"{"type":"lz77"}"#).is_err());
    }
}
