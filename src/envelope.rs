//! Encrypted envelope encoding and decoding.
//!
//! Binary format (44-byte fixed header + variable fields):
//! - \[0\]:       version (0x01)
//! - \[1\]:       algorithm tag
//! - \[2..26\]:   nonce (24 bytes)
//! - \[26..42\]:  authentication tag (16 bytes)
//! - \[42..44\]:  key reference length (big-endian u16, 0 = absent)
//! - \[44..n\]:   key reference (UTF-8)
//! - \[n..\]:     ciphertext

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::types::{ExchangeError, Result, ENVELOPE_VERSION, NONCE_SIZE, TAG_SIZE};

/// Size of the fixed envelope header in bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 2 + NONCE_SIZE + TAG_SIZE + 2;

/// Authenticated encryption algorithm named by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// XChaCha20-Poly1305 with a direct 256-bit key.
    XChaCha20Poly1305,
}

impl Algorithm {
    /// Single-byte tag in the binary form.
    pub fn tag(self) -> u8 {
        match self {
            Algorithm::XChaCha20Poly1305 => 0x01,
        }
    }

    /// Name in the JSON form.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::XChaCha20Poly1305 => "XC20P",
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0x01 => Ok(Algorithm::XChaCha20Poly1305),
            other => Err(ExchangeError::UnsupportedAlgorithm(format!("tag 0x{:02x}", other))),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "XC20P" => Ok(Algorithm::XChaCha20Poly1305),
            other => Err(ExchangeError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A self-describing authenticated ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvelopeJson", into = "EnvelopeJson")]
pub struct EncryptedEnvelope {
    /// Algorithm used to produce the ciphertext.
    pub algorithm: Algorithm,
    /// Per-envelope random nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Encrypted payload without the tag.
    pub ciphertext: Vec<u8>,
    /// Authentication tag.
    pub tag: [u8; TAG_SIZE],
    /// Opaque slot for an external key escrow lookup. Never interpreted here.
    pub key_reference: Option<String>,
}

impl EncryptedEnvelope {
    /// Encode the envelope to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let key_reference = self.key_reference.as_deref().unwrap_or("").as_bytes();
        let reference_len = u16::try_from(key_reference.len()).map_err(|_| {
            ExchangeError::InvalidEnvelope(format!(
                "Key reference too long: {} bytes",
                key_reference.len()
            ))
        })?;

        let mut data = Vec::with_capacity(
            ENVELOPE_HEADER_SIZE + key_reference.len() + self.ciphertext.len(),
        );
        data.push(ENVELOPE_VERSION);
        data.push(self.algorithm.tag());
        data.extend_from_slice(&self.nonce);
        data.extend_from_slice(&self.tag);
        data.extend_from_slice(&reference_len.to_be_bytes());
        data.extend_from_slice(key_reference);
        data.extend_from_slice(&self.ciphertext);
        Ok(data)
    }

    /// Decode bytes into an envelope.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(ExchangeError::InvalidEnvelope(format!(
                "Data too short: {} bytes (minimum {})",
                data.len(),
                ENVELOPE_HEADER_SIZE
            )));
        }

        let version = data[0];
        if version != ENVELOPE_VERSION {
            return Err(ExchangeError::UnknownVersion(version));
        }

        let algorithm = Algorithm::from_tag(data[1])?;
        let mut offset = 2;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[offset..offset + NONCE_SIZE]);
        offset += NONCE_SIZE;

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&data[offset..offset + TAG_SIZE]);
        offset += TAG_SIZE;

        let reference_len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
        offset += 2;

        if data.len() < offset + reference_len {
            return Err(ExchangeError::InvalidEnvelope(format!(
                "Key reference truncated: need {} bytes, have {}",
                reference_len,
                data.len() - offset
            )));
        }

        let key_reference = if reference_len == 0 {
            None
        } else {
            let reference = std::str::from_utf8(&data[offset..offset + reference_len])
                .map_err(|e| ExchangeError::InvalidEnvelope(format!("Key reference: {}", e)))?;
            Some(reference.to_string())
        };
        offset += reference_len;

        Ok(Self {
            algorithm,
            nonce,
            ciphertext: data[offset..].to_vec(),
            tag,
            key_reference,
        })
    }
}

/// JSON shape of an envelope, with byte fields in standard base64.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeJson {
    alg: String,
    nonce: String,
    ciphertext: String,
    tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_reference: Option<String>,
}

impl From<EncryptedEnvelope> for EnvelopeJson {
    fn from(envelope: EncryptedEnvelope) -> Self {
        Self {
            alg: envelope.algorithm.name().to_string(),
            nonce: STANDARD.encode(envelope.nonce),
            ciphertext: STANDARD.encode(&envelope.ciphertext),
            tag: STANDARD.encode(envelope.tag),
            key_reference: envelope.key_reference,
        }
    }
}

impl TryFrom<EnvelopeJson> for EncryptedEnvelope {
    type Error = ExchangeError;

    fn try_from(json: EnvelopeJson) -> Result<Self> {
        let algorithm = Algorithm::from_name(&json.alg)?;
        let nonce = decode_fixed::<NONCE_SIZE>("nonce", &json.nonce)?;
        let tag = decode_fixed::<TAG_SIZE>("tag", &json.tag)?;
        let ciphertext = STANDARD
            .decode(json.ciphertext.as_bytes())
            .map_err(|e| ExchangeError::InvalidEnvelope(format!("ciphertext: {}", e)))?;

        Ok(Self {
            algorithm,
            nonce,
            ciphertext,
            tag,
            key_reference: json.key_reference,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, encoded: &str) -> Result<[u8; N]> {
    let decoded = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| ExchangeError::InvalidEnvelope(format!("{}: {}", field, e)))?;
    decoded.as_slice().try_into().map_err(|_| {
        ExchangeError::InvalidEnvelope(format!(
            "{} must be {} bytes, got {}",
            field,
            N,
            decoded.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(key_reference: Option<&str>) -> EncryptedEnvelope {
        EncryptedEnvelope {
            algorithm: Algorithm::XChaCha20Poly1305,
            nonce: [3u8; NONCE_SIZE],
            ciphertext: vec![5u8; 32],
            tag: [4u8; TAG_SIZE],
            key_reference: key_reference.map(str::to_string),
        }
    }

    #[test]
    fn test_encode_layout() {
        let encoded = sample(None).encode().unwrap();
        assert_eq!(encoded.len(), ENVELOPE_HEADER_SIZE + 32);
        assert_eq!(encoded[0], ENVELOPE_VERSION);
        assert_eq!(encoded[1], Algorithm::XChaCha20Poly1305.tag());
        assert_eq!(EncryptedEnvelope::decode(&encoded).unwrap(), sample(None));
    }

    #[test]
    fn test_key_reference_preserved() {
        let envelope = sample(Some("escrow://lit/abc123"));
        let decoded = EncryptedEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.key_reference.as_deref(), Some("escrow://lit/abc123"));
        assert_eq!(decoded.ciphertext, envelope.ciphertext);
    }

    #[test]
    fn test_decode_too_short() {
        let result = EncryptedEnvelope::decode(&[ENVELOPE_VERSION, 0x01]);
        assert!(matches!(result, Err(ExchangeError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_decode_wrong_version() {
        let mut data = sample(None).encode().unwrap();
        data[0] = 0x02;
        let result = EncryptedEnvelope::decode(&data);
        assert!(matches!(result, Err(ExchangeError::UnknownVersion(0x02))));
    }

    #[test]
    fn test_decode_unknown_algorithm() {
        let mut data = sample(None).encode().unwrap();
        data[1] = 0x7f;
        let result = EncryptedEnvelope::decode(&data);
        assert!(matches!(result, Err(ExchangeError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_decode_truncated_reference() {
        let mut data = sample(None).encode().unwrap();
        data.truncate(ENVELOPE_HEADER_SIZE);
        data[ENVELOPE_HEADER_SIZE - 1] = 10;
        let result = EncryptedEnvelope::decode(&data);
        assert!(matches!(result, Err(ExchangeError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_json_carries_algorithm() {
        let json = serde_json::to_value(sample(None)).unwrap();
        assert_eq!(json["alg"], "XC20P");
        assert!(json.get("keyReference").is_none());

        let parsed: EncryptedEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, sample(None));
    }

    #[test]
    fn test_json_rejects_bad_nonce() {
        let mut json = serde_json::to_value(sample(None)).unwrap();
        json["nonce"] = serde_json::Value::String(STANDARD.encode([1u8; 12]));
        assert!(serde_json::from_value::<EncryptedEnvelope>(json).is_err());
    }
}
