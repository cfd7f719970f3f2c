//! Item serializers
//!
//! A serializer turns items into the bytes stored in a stream. Constant-size serializers
//! (every item encodes to the same length) are required wherever items are addressed by
//! position inside one stream.

use crate::error::{PlexusError, Result};
use crate::merkle::{Digest, DIGEST_SIZE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

pub trait ItemSerializer<T> {
    /// `Some(n)` when every item encodes to exactly `n` bytes
    fn constant_size(&self) -> Option<usize>;

    fn serialize(&self, item: &T) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<T>;

    fn is_constant_size(&self) -> bool {
        self.constant_size().is_some()
    }
}

fn check_size(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(PlexusError::SerializerSizeMismatch { expected, actual });
    }
    Ok(())
}

/// UTF-8 strings of any length
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl ItemSerializer<String> for StringSerializer {
    fn constant_size(&self) -> Option<usize> {
        None
    }

    fn serialize(&self, item: &String) -> Result<Vec<u8>> {
        Ok(item.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| PlexusError::InvalidData(e.to_string()))
    }
}

/// Strings stored in a fixed number of bytes: a u16 length prefix, the UTF-8 bytes,
/// then zero padding
#[derive(Debug, Clone, Copy)]
pub struct PaddedStringSerializer {
    size: usize,
}

impl PaddedStringSerializer {
    pub fn new(size: usize) -> Result<Self> {
        if size < 2 || size > u16::MAX as usize + 2 {
            return Err(PlexusError::InvalidConfig(format!(
                "padded string size {} out of range",
                size
            )));
        }
        Ok(PaddedStringSerializer { size })
    }

    /// Longest string (in bytes) that fits
    pub fn capacity(&self) -> usize {
        self.size - 2
    }
}

impl ItemSerializer<String> for PaddedStringSerializer {
    fn constant_size(&self) -> Option<usize> {
        Some(self.size)
    }

    fn serialize(&self, item: &String) -> Result<Vec<u8>> {
        let text = item.as_bytes();
        if text.len() > self.capacity() {
            return Err(PlexusError::SerializerSizeMismatch {
                expected: self.capacity(),
                actual: text.len(),
            });
        }
        let mut bytes = Vec::with_capacity(self.size);
        bytes.extend_from_slice(&(text.len() as u16).to_le_bytes());
        bytes.extend_from_slice(text);
        bytes.resize(self.size, 0);
        Ok(bytes)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        check_size(self.size, bytes.len())?;
        let len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if len > self.capacity() {
            return Err(PlexusError::InvalidData(format!(
                "padded string length {} exceeds capacity {}",
                len,
                self.capacity()
            )));
        }
        String::from_utf8(bytes[2..2 + len].to_vec())
            .map_err(|e| PlexusError::InvalidData(e.to_string()))
    }
}

macro_rules! integer_serializer {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Little-endian `", stringify!($ty), "`")]
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl ItemSerializer<$ty> for $name {
            fn constant_size(&self) -> Option<usize> {
                Some(std::mem::size_of::<$ty>())
            }

            fn serialize(&self, item: &$ty) -> Result<Vec<u8>> {
                Ok(item.to_le_bytes().to_vec())
            }

            fn deserialize(&self, bytes: &[u8]) -> Result<$ty> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                check_size(buf.len(), bytes.len())?;
                buf.copy_from_slice(bytes);
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    };
}

integer_serializer!(U32Serializer, u32);
integer_serializer!(U64Serializer, u64);
integer_serializer!(I64Serializer, i64);

/// Raw 32-byte digests
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSerializer;

impl ItemSerializer<Digest> for DigestSerializer {
    fn constant_size(&self) -> Option<usize> {
        Some(DIGEST_SIZE)
    }

    fn serialize(&self, item: &Digest) -> Result<Vec<u8>> {
        Ok(item.to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Digest> {
        check_size(DIGEST_SIZE, bytes.len())?;
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(bytes);
        Ok(digest)
    }
}

/// Any serde type, encoded with bincode
///
/// Created with [`BincodeSerializer::fixed`], every encoding must be exactly `size` bytes.
#[derive(Debug, Clone, Copy)]
pub struct BincodeSerializer<T> {
    size: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeSerializer<T> {
    pub fn new() -> Self {
        BincodeSerializer {
            size: None,
            _marker: PhantomData,
        }
    }

    pub fn fixed(size: usize) -> Self {
        BincodeSerializer {
            size: Some(size),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> ItemSerializer<T> for BincodeSerializer<T> {
    fn constant_size(&self) -> Option<usize> {
        self.size
    }

    fn serialize(&self, item: &T) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(item)?;
        if let Some(size) = self.size {
            check_size(size, bytes.len())?;
        }
        Ok(bytes)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        if let Some(size) = self.size {
            check_size(size, bytes.len())?;
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_padded_string() {
        let serializer = PaddedStringSerializer::new(8).unwrap();
        let bytes = serializer.serialize(&"héllo".to_string()).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(serializer.deserialize(&bytes).unwrap(), "héllo");

        assert!(matches!(
            serializer.serialize(&"too long!".to_string()),
            Err(PlexusError::SerializerSizeMismatch { expected: 6, actual: 9 })
        ));
        assert!(serializer.deserialize(&bytes[..7]).is_err());
    }

    #[test]
    fn test_integer_serializers() {
        assert_eq!(U64Serializer.constant_size(), Some(8));
        let bytes = I64Serializer.serialize(&-2).unwrap();
        assert_eq!(I64Serializer.deserialize(&bytes).unwrap(), -2);
        assert!(U32Serializer.deserialize(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_string_serializer_rejects_invalid_utf8() {
        assert!(!StringSerializer.is_constant_size());
        assert!(matches!(
            StringSerializer.deserialize(&[0xFF, 0xFE]),
            Err(PlexusError::InvalidData(_))
        ));
    }

    #[test]
    fn test_bincode_fixed_size() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Point {
            x: u32,
            y: u32,
        }

        let serializer = BincodeSerializer::<Point>::fixed(8);
        let bytes = serializer.serialize(&Point { x: 1, y: 2 }).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), Point { x: 1, y: 2 });

        let loose = BincodeSerializer::<String>::new();
        assert!(loose.constant_size().is_none());
        let bytes = loose.serialize(&"any length".to_string()).unwrap();
        assert_eq!(loose.deserialize(&bytes).unwrap(), "any length");
    }
}
