//! The `raw` (identity) compression codec.

use super::{CodecError, CompressionTraits};

/// The `raw` codec: payloads pass through unmodified.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCompression;

impl CompressionTraits for RawCompression {
    fn identifier(&self) -> &'static str {
        "raw"
    }

    fn encode(&self, decoded: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(decoded)
    }

    fn decode(&self, encoded: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(encoded)
    }
}
