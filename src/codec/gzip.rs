//! The `gzip` compression codec.
//!
//! Applies gzip compression with [`flate2`].

use std::io::{Cursor, Read};

use flate2::bufread::{GzDecoder, GzEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CodecError, CompressionTraits};

/// A gzip compression level.
///
/// An integer from `-1` to `9`, where `-1` selects the zlib default level and
/// `0` to `9` trade compression speed against ratio.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[serde(try_from = "i32", into = "i32")]
pub struct GzipCompressionLevel(i32);

/// An invalid gzip compression level.
#[derive(Debug, Error)]
#[error("invalid gzip compression level {0}, must be -1 to 9")]
pub struct GzipCompressionLevelError(i32);

impl TryFrom<i32> for GzipCompressionLevel {
    type Error = GzipCompressionLevelError;
    fn try_from(level: i32) -> Result<Self, Self::Error> {
        if (-1..=9).contains(&level) {
            Ok(Self(level))
        } else {
            Err(GzipCompressionLevelError(level))
        }
    }
}

impl From<GzipCompressionLevel> for i32 {
    fn from(level: GzipCompressionLevel) -> Self {
        level.0
    }
}

impl Default for GzipCompressionLevel {
    /// The default level, `-1`.
    fn default() -> Self {
        Self(-1)
    }
}

impl GzipCompressionLevel {
    fn as_flate2(self) -> flate2::Compression {
        if self.0 < 0 {
            flate2::Compression::default()
        } else {
            flate2::Compression::new(u32::try_from(self.0).unwrap_or_default())
        }
    }
}

/// A `gzip` codec implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct GzipCompression {
    compression_level: GzipCompressionLevel,
}

impl GzipCompression {
    /// Create a new `gzip` codec with compression level `compression_level`.
    #[must_use]
    pub const fn new(compression_level: GzipCompressionLevel) -> Self {
        Self { compression_level }
    }
}

impl CompressionTraits for GzipCompression {
    fn identifier(&self) -> &'static str {
        "gzip"
    }

    fn encode(&self, decoded: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Cursor::new(decoded), self.compression_level.as_flate2());
        let mut out: Vec<u8> = Vec::new();
        encoder.read_to_end(&mut out)?;
        Ok(out)
    }

    fn decode(&self, encoded: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let mut decoder = GzDecoder::new(Cursor::new(encoded));
        let mut out: Vec<u8> = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}
