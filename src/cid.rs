//! Content identifiers.
//!
//! CIDv1 binary layout:
//! `varint(1) || varint(codec) || varint(hash code) || varint(digest len) || digest`.
//! The string form is multibase base32 lower case with a `b` prefix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};

use crate::types::{ExchangeError, Result};

/// CID version written by this crate.
pub const CID_VERSION: u64 = 1;

/// Multibase prefix for lower-case base32.
const MULTIBASE_BASE32: char = 'b';

/// Longest varint accepted (enough for a u64).
const MAX_VARINT_LEN: usize = 10;

/// Multicodec of the bytes a CID addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Codec {
    /// Opaque bytes.
    Raw,
    /// Plain JSON, encoded as given.
    Json,
    /// Canonical JSON: sorted keys, no insignificant whitespace.
    DagJson,
}

impl Codec {
    /// Multicodec code.
    pub fn code(self) -> u64 {
        match self {
            Codec::Raw => 0x55,
            Codec::Json => 0x0200,
            Codec::DagJson => 0x0129,
        }
    }

    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0x55 => Ok(Codec::Raw),
            0x0200 => Ok(Codec::Json),
            0x0129 => Ok(Codec::DagJson),
            other => Err(ExchangeError::UnsupportedCodec(format!("0x{:x}", other))),
        }
    }
}

/// Multihash function used to digest block bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    #[serde(rename = "sha2-256")]
    Sha2_256,
    #[serde(rename = "sha2-512")]
    Sha2_512,
}

impl HashAlgorithm {
    /// Multihash code.
    pub fn code(self) -> u64 {
        match self {
            HashAlgorithm::Sha2_256 => 0x12,
            HashAlgorithm::Sha2_512 => 0x13,
        }
    }

    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0x12 => Ok(HashAlgorithm::Sha2_256),
            0x13 => Ok(HashAlgorithm::Sha2_512),
            other => Err(ExchangeError::UnsupportedHash(other)),
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha2_256 => 32,
            HashAlgorithm::Sha2_512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha2_256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha2_512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// A version 1 content identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cid {
    codec: Codec,
    hash: HashAlgorithm,
    digest: Vec<u8>,
}

impl Cid {
    /// Address `data` under the given codec and hash.
    pub fn compute(codec: Codec, hash: HashAlgorithm, data: &[u8]) -> Self {
        Self {
            codec,
            hash,
            digest: hash.digest(data),
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + self.digest.len());
        write_varint(&mut data, CID_VERSION);
        write_varint(&mut data, self.codec.code());
        write_varint(&mut data, self.hash.code());
        write_varint(&mut data, self.digest.len() as u64);
        data.extend_from_slice(&self.digest);
        data
    }

    /// Parse a CID from the front of `data`, returning it and the bytes consumed.
    pub fn read_bytes(data: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;

        let version = read_cid_varint(data, &mut offset)?;
        if version != CID_VERSION {
            return Err(ExchangeError::InvalidCid(format!(
                "Unsupported CID version: {}",
                version
            )));
        }

        let codec = Codec::from_code(read_cid_varint(data, &mut offset)?)?;
        let hash = HashAlgorithm::from_code(read_cid_varint(data, &mut offset)?)?;
        let digest_len = read_cid_varint(data, &mut offset)? as usize;

        if digest_len != hash.digest_len() {
            return Err(ExchangeError::InvalidCid(format!(
                "Digest length {} does not match hash function (expected {})",
                digest_len,
                hash.digest_len()
            )));
        }
        if data.len() < offset + digest_len {
            return Err(ExchangeError::InvalidCid("Digest truncated".to_string()));
        }

        let digest = data[offset..offset + digest_len].to_vec();
        offset += digest_len;

        Ok((Self { codec, hash, digest }, offset))
    }

    /// Parse a CID that must span all of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (cid, consumed) = Self::read_bytes(data)?;
        if consumed != data.len() {
            return Err(ExchangeError::InvalidCid(format!(
                "{} trailing bytes after CID",
                data.len() - consumed
            )));
        }
        Ok(cid)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = data_encoding::BASE32_NOPAD.encode(&self.to_bytes());
        write!(f, "{}{}", MULTIBASE_BASE32, encoded.to_ascii_lowercase())
    }
}

impl FromStr for Cid {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        let encoded = s.strip_prefix(MULTIBASE_BASE32).ok_or_else(|| {
            ExchangeError::InvalidCid(format!("Expected base32 multibase prefix: {}", s))
        })?;

        let decoded = data_encoding::BASE32_NOPAD
            .decode(encoded.to_ascii_uppercase().as_bytes())
            .map_err(|e| ExchangeError::InvalidCid(format!("Invalid base32: {}", e)))?;

        Self::from_bytes(&decoded)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Append an unsigned LEB128 varint.
pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read an unsigned LEB128 varint at `*offset`, advancing it.
///
/// Returns `None` on truncation or overflow.
pub(crate) fn read_varint(data: &[u8], offset: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = *data.get(*offset + i)?;
        let bits = u64::from(byte & 0x7f);
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            return None;
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            *offset += i + 1;
            return Some(value);
        }
    }
    None
}

fn read_cid_varint(data: &[u8], offset: &mut usize) -> Result<u64> {
    read_varint(data, offset).ok_or_else(|| ExchangeError::InvalidCid("Malformed varint".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_encoding() {
        let mut out = Vec::new();
        write_varint(&mut out, 0x0129);
        assert_eq!(out, vec![0xa9, 0x02]);

        let mut offset = 0;
        assert_eq!(read_varint(&out, &mut offset), Some(0x0129));
        assert_eq!(offset, 2);
    }

    #[test]
    fn test_varint_truncated() {
        let mut offset = 0;
        assert_eq!(read_varint(&[0x80, 0x80], &mut offset), None);
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_cid_binary_layout() {
        let cid = Cid::compute(Codec::Raw, HashAlgorithm::Sha2_256, b"hello");
        let bytes = cid.to_bytes();
        assert_eq!(&bytes[..4], &[0x01, 0x55, 0x12, 0x20]);
        assert_eq!(bytes.len(), 4 + 32);
        assert_eq!(Cid::from_bytes(&bytes).unwrap(), cid);
    }

    #[test]
    fn test_known_raw_cid() {
        // sha2-256 raw block of "hello", as produced by other IPFS tooling.
        let cid = Cid::compute(Codec::Raw, HashAlgorithm::Sha2_256, b"hello");
        assert_eq!(
            cid.to_string(),
            "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq"
        );
    }

    #[test]
    fn test_string_roundtrip() {
        let cid = Cid::compute(Codec::DagJson, HashAlgorithm::Sha2_512, b"{}");
        let s = cid.to_string();
        assert!(s.starts_with('b'));
        assert_eq!(s.parse::<Cid>().unwrap(), cid);
    }

    #[test]
    fn test_parse_rejects_other_multibase() {
        let result = "zQmSomething".parse::<Cid>();
        assert!(matches!(result, Err(ExchangeError::InvalidCid(_))));
    }

    #[test]
    fn test_digest_length_mismatch() {
        let mut bytes = Cid::compute(Codec::Raw, HashAlgorithm::Sha2_256, b"x").to_bytes();
        bytes[3] = 0x10;
        bytes.truncate(4 + 16);
        assert!(matches!(Cid::from_bytes(&bytes), Err(ExchangeError::InvalidCid(_))));
    }

    #[test]
    fn test_unknown_codec() {
        let mut bytes = Vec::new();
        write_varint(&mut bytes, 1);
        write_varint(&mut bytes, 0x71);
        assert!(matches!(
            Cid::read_bytes(&bytes),
            Err(ExchangeError::UnsupportedCodec(_))
        ));
    }
}
