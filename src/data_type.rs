//! N5 element data types.
//!
//! See <https://github.com/saalfeldlab/n5#file-system-specification-version-203-snapshot>.

use serde::{Deserialize, Serialize};

/// An element data type.
///
/// The serialized names match the `dataType` attribute of an N5 dataset.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
#[rustfmt::skip]
pub enum DataType {
    /// `uint8` Integer in `[0, 2^8-1]`.
    UInt8,
    /// `uint16` Integer in `[0, 2^16-1]`.
    UInt16,
    /// `uint32` Integer in `[0, 2^32-1]`.
    UInt32,
    /// `uint64` Integer in `[0, 2^64-1]`.
    UInt64,
    /// `int8` Integer in `[-2^7, 2^7-1]`.
    Int8,
    /// `int16` Integer in `[-2^15, 2^15-1]`.
    Int16,
    /// `int32` Integer in `[-2^31, 2^31-1]`.
    Int32,
    /// `int64` Integer in `[-2^63, 2^63-1]`.
    Int64,
    /// `float32` IEEE 754 single-precision floating point.
    Float32,
    /// `float64` IEEE 754 double-precision floating point.
    Float64,
}

impl DataType {
    /// The identifier of the data type, as recorded in dataset attributes.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// The size in bytes of an element of this data type.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Allocate a zeroed buffer holding `num_entities` storage entities of this
    /// data type.
    ///
    /// # Panics
    /// Panics if the buffer size exceeds [`usize::MAX`].
    #[must_use]
    pub fn create_buffer(&self, num_entities: u64) -> Vec<u8> {
        vec![0; usize::try_from(num_entities).unwrap() * self.size()]
    }
}

impl core::fmt::Display for DataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_identifiers() {
        assert_eq!(
            serde_json::to_string(&DataType::UInt8).unwrap(),
            r#""uint8""#
        );
        assert_eq!(
            serde_json::from_str::<DataType>(r#""float64""#).unwrap(),
            DataType::Float64
        );
        assert!(serde_json::from_str::<DataType>(r#""object""#).is_err());
        for data_type in [DataType::Int16, DataType::Float32] {
            assert_eq!(
                serde_json::to_string(&data_type).unwrap(),
                format!("\"{data_type}\"")
            );
        }
    }

    #[test]
    fn data_type_sizes() {
        assert_eq!(DataType::UInt8.size(), 1);
        assert_eq!(DataType::Int16.size(), 2);
        assert_eq!(DataType::Float32.size(), 4);
        assert_eq!(DataType::UInt64.size(), 8);
    }

    #[test]
    fn data_type_create_buffer() {
        let buffer = DataType::UInt16.create_buffer(6);
        assert_eq!(buffer.len(), 12);
        assert!(buffer.iter().all(|&b| b == 0));
    }
}
