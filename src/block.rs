//! Content-addressed blocks.
//!
//! A block's CID is never trusted on its own: [`verify_block`] recomputes the
//! digest of the bytes and compares it before anything downstream uses them.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cid::{Cid, Codec, HashAlgorithm};
use crate::types::{ExchangeError, Result};

/// Encoded bytes plus the identifier claimed for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Claimed content identifier.
    pub cid: Cid,
    /// Codec the bytes are encoded with.
    pub codec: Codec,
    /// Hash function the CID was computed with.
    pub hash: HashAlgorithm,
    /// Encoded bytes.
    pub bytes: Vec<u8>,
}

impl Block {
    /// Wrap opaque bytes as a raw-codec block.
    pub fn raw(bytes: impl Into<Vec<u8>>, hash: HashAlgorithm) -> Self {
        let bytes = bytes.into();
        Self {
            cid: Cid::compute(Codec::Raw, hash, &bytes),
            codec: Codec::Raw,
            hash,
            bytes,
        }
    }

    /// Rebuild a block from a CID and bytes received from elsewhere.
    ///
    /// Codec and hash are taken from the CID. Nothing is verified.
    pub fn from_parts(cid: Cid, bytes: Vec<u8>) -> Self {
        Self {
            codec: cid.codec(),
            hash: cid.hash_algorithm(),
            cid,
            bytes,
        }
    }

    /// Decode the bytes back into a value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self.codec {
            Codec::Json | Codec::DagJson => Ok(serde_json::from_slice(&self.bytes)?),
            Codec::Raw => Err(ExchangeError::UnsupportedCodec(
                "raw blocks carry no structured value".to_string(),
            )),
        }
    }
}

/// Encode a value into a block.
///
/// Deterministic: the same value, codec and hash always give the same CID.
/// Raw blocks are built from bytes with [`Block::raw`].
pub fn encode_block<T: Serialize + ?Sized>(
    value: &T,
    codec: Codec,
    hash: HashAlgorithm,
) -> Result<Block> {
    let bytes = match codec {
        Codec::DagJson => {
            // serde_json::Value keeps object keys in a BTreeMap, so maps come out sorted.
            let canonical = serde_json::to_value(value)?;
            serde_json::to_vec(&canonical)?
        }
        Codec::Json => serde_json::to_vec(value)?,
        Codec::Raw => {
            return Err(ExchangeError::UnsupportedCodec(
                "raw blocks are built from bytes".to_string(),
            ))
        }
    };

    Ok(Block {
        cid: Cid::compute(codec, hash, &bytes),
        codec,
        hash,
        bytes,
    })
}

/// Recompute the block's CID from its bytes and compare with the claimed one.
pub fn verify_block(block: &Block) -> bool {
    check_block(block).is_ok()
}

/// Like [`verify_block`], reporting what did not match.
pub fn check_block(block: &Block) -> Result<()> {
    if block.cid.codec() != block.codec || block.cid.hash_algorithm() != block.hash {
        return Err(ExchangeError::BlockIntegrityMismatch {
            expected: block.cid.to_string(),
            actual: format!("{:?}/{:?}", block.codec, block.hash),
        });
    }

    let recomputed = Cid::compute(block.codec, block.hash, &block.bytes);
    if recomputed != block.cid {
        return Err(ExchangeError::BlockIntegrityMismatch {
            expected: block.cid.to_string(),
            actual: recomputed.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Agreement {
        order: String,
        reservation: String,
    }

    fn agreement() -> Agreement {
        Agreement {
            order: "ipfs://order".to_string(),
            reservation: "ipfs://reservation".to_string(),
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = encode_block(&agreement(), Codec::DagJson, HashAlgorithm::Sha2_256).unwrap();
        let b = encode_block(&agreement(), Codec::DagJson, HashAlgorithm::Sha2_256).unwrap();
        assert_eq!(a.cid, b.cid);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_dag_json_sorts_map_keys() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("zeta", 1), ("alpha", 2), ("mid", 3)] {
            first.insert(k, v);
        }
        for (k, v) in [("mid", 3), ("zeta", 1), ("alpha", 2)] {
            second.insert(k, v);
        }

        let a = encode_block(&first, Codec::DagJson, HashAlgorithm::Sha2_256).unwrap();
        let b = encode_block(&second, Codec::DagJson, HashAlgorithm::Sha2_256).unwrap();
        assert_eq!(a.cid, b.cid);
        assert_eq!(a.bytes, br#"{"alpha":2,"mid":3,"zeta":1}"#);
    }

    #[test]
    fn test_hash_choice_changes_cid() {
        let a = encode_block(&agreement(), Codec::DagJson, HashAlgorithm::Sha2_256).unwrap();
        let b = encode_block(&agreement(), Codec::DagJson, HashAlgorithm::Sha2_512).unwrap();
        assert_ne!(a.cid, b.cid);
        assert!(verify_block(&a));
        assert!(verify_block(&b));
    }

    #[test]
    fn test_decode_roundtrip() {
        let block = encode_block(&agreement(), Codec::Json, HashAlgorithm::Sha2_256).unwrap();
        assert_eq!(block.decode::<Agreement>().unwrap(), agreement());
    }

    #[test]
    fn test_raw_codec_needs_bytes() {
        let result = encode_block(&agreement(), Codec::Raw, HashAlgorithm::Sha2_256);
        assert!(matches!(result, Err(ExchangeError::UnsupportedCodec(_))));

        let block = Block::raw(b"ciphertext".to_vec(), HashAlgorithm::Sha2_256);
        assert!(verify_block(&block));
        assert!(block.decode::<Agreement>().is_err());
    }

    #[test]
    fn test_corrupted_byte_detected() {
        let mut block = encode_block(&agreement(), Codec::DagJson, HashAlgorithm::Sha2_256).unwrap();
        block.bytes[5] ^= 0x20;
        assert!(!verify_block(&block));
        assert!(matches!(
            check_block(&block),
            Err(ExchangeError::BlockIntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_codec_relabel_detected() {
        let mut block = encode_block(&agreement(), Codec::DagJson, HashAlgorithm::Sha2_256).unwrap();
        block.codec = Codec::Json;
        assert!(!verify_block(&block));
    }

    #[test]
    fn test_from_parts_takes_cid_tags() {
        let original = encode_block(&agreement(), Codec::DagJson, HashAlgorithm::Sha2_512).unwrap();
        let rebuilt = Block::from_parts(original.cid.clone(), original.bytes.clone());
        assert_eq!(rebuilt, original);
        assert!(verify_block(&rebuilt));
    }
}
