//! Stored value format.

use crate::error::CacheError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// A cached value as stored in either tier.
///
/// The remote tier stores the bincode encoding of this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub compressed: bool,
    pub original_len: u64,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap `value`, compressing it when longer than `threshold` bytes and
    /// compression actually saves space.
    pub fn encode(value: &str, threshold: usize) -> Result<Self, CacheError> {
        let raw = value.as_bytes();
        if raw.len() > threshold {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(raw)?;
            let packed = encoder.finish()?;
            if packed.len() < raw.len() {
                return Ok(Self {
                    compressed: true,
                    original_len: raw.len() as u64,
                    payload: packed,
                });
            }
        }
        Ok(Self {
            compressed: false,
            original_len: raw.len() as u64,
            payload: raw.to_vec(),
        })
    }

    pub fn decode(&self) -> Result<String, CacheError> {
        if !self.compressed {
            return Ok(String::from_utf8(self.payload.clone())?);
        }
        let mut out = Vec::with_capacity(self.original_len as usize);
        ZlibDecoder::new(self.payload.as_slice()).read_to_end(&mut out)?;
        Ok(String::from_utf8(out)?)
    }

    /// Bytes this envelope occupies in the local tier
    pub fn stored_len(&self) -> usize {
        self.payload.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_stay_raw() {
        let env = Envelope::encode("short", 1024).unwrap();
        assert!(!env.compressed);
        assert_eq!(env.decode().unwrap(), "short");
    }

    #[test]
    fn test_large_values_are_compressed() {
        let text = "{\"title\": \"Ownership\", \"bullets\": []} ".repeat(200);
        let env = Envelope::encode(&text, 1024).unwrap();
        assert!(env.compressed);
        assert!(env.stored_len() < text.len());
        assert_eq!(env.original_len as usize, text.len());

        let restored = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.decode().unwrap(), text);
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let env = Envelope {
            compressed: true,
            original_len: 10,
            payload: vec![1, 2, 3],
        };
        assert!(env.decode().is_err());
        assert!(Envelope::from_bytes(&[0xff]).is_err());
    }
}
