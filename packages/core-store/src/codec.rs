//! Encodings of the records a quota store keeps in its backend.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Epoch, HeadEdge};

/// Backend path prefixes.
pub(crate) const META: &[u8] = b"meta";
pub(crate) const BLOCKS: &[u8] = b"blocks";
pub(crate) const RECENCY: &[u8] = b"recency";
pub(crate) const HEADS: &[u8] = b"heads";

pub(crate) const META_SIZE: &[u8] = b"size";
pub(crate) const META_MARK: &[u8] = b"mark";
pub(crate) const META_SESSION: &[u8] = b"session";

/// Serde adapter writing `Bytes` as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Position of a block in recency order plus its charged size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecencyRecord {
    pub seq: u64,
    pub size: u64,
}

impl RecencyRecord {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u64(self.seq);
        buf.put_u64(self.size);
        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Self> {
        if data.len() != 16 {
            return Err(Error::Corrupt(format!(
                "recency record has {} bytes, expected 16",
                data.len()
            )));
        }
        Ok(Self {
            seq: data.get_u64(),
            size: data.get_u64(),
        })
    }
}

/// The refresh session persisted while it is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionRecord {
    pub epoch: Epoch,
    pub seq: u64,
}

/// A head edge together with its insertion position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EdgeRecord {
    pub seq: u64,
    pub edge: HeadEdge,
}

pub(crate) fn encode_u64(value: u64) -> Bytes {
    Bytes::from(value.to_string())
}

pub(crate) fn decode_u64(what: &str, data: &[u8]) -> Result<u64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| Error::Corrupt(format!("{} is not a number", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_record_rejects_short_input() {
        let err = RecencyRecord::decode(Bytes::from_static(b"short")).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn recency_record_layout() {
        let record = RecencyRecord { seq: 1, size: 258 };
        let encoded = record.encode();
        assert_eq!(&encoded[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&encoded[14..], &[1, 2]);
        assert_eq!(RecencyRecord::decode(encoded).unwrap(), record);
    }

    #[test]
    fn decimal_meta_values() {
        assert_eq!(decode_u64("size", &encode_u64(105)).unwrap(), 105);
        assert_eq!(decode_u64("size", b" 7\n").unwrap(), 7);
        assert!(decode_u64("size", b"-1").is_err());
    }
}
