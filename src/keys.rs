//! Key generation and derivation for agreement exchange.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{
    ExchangeError, Result, AGREEMENT_KEY_SIZE, IDENTITY_DERIVATION_INFO, IDENTITY_DERIVATION_SALT,
};

/// A single-use 256-bit symmetric key protecting one agreement.
///
/// Keys are wiped from memory on drop. A fresh key is minted for every
/// publication, so two envelopes never share key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AgreementKey([u8; AGREEMENT_KEY_SIZE]);

impl AgreementKey {
    /// Generate a fresh random key from the OS-seeded thread RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; AGREEMENT_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: [u8; AGREEMENT_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; AGREEMENT_KEY_SIZE] = bytes.try_into().map_err(|_| {
            ExchangeError::InvalidKey(format!(
                "Agreement key must be {} bytes, got {}",
                AGREEMENT_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; AGREEMENT_KEY_SIZE] {
        &self.0
    }

    /// Standard base64 form used in the `agreementKey` message field.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parse the `agreementKey` message field.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut decoded = STANDARD
            .decode(encoded)
            .map_err(|e| ExchangeError::InvalidKey(format!("Invalid base64 key: {}", e)))?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }
}

impl std::fmt::Debug for AgreementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AgreementKey(..)")
    }
}

/// Derive an Ed25519 signing key from a 32-byte seed using HKDF-SHA256.
///
/// The same seed always yields the same identity.
pub fn derive_signing_key_from_seed(seed: &[u8]) -> Result<SigningKey> {
    if seed.len() != 32 {
        return Err(ExchangeError::InvalidKey(format!(
            "Invalid seed length: expected 32 bytes, got {}",
            seed.len()
        )));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(IDENTITY_DERIVATION_SALT), seed);
    let mut derived_key = [0u8; 32];
    hkdf.expand(IDENTITY_DERIVATION_INFO, &mut derived_key)
        .map_err(|e| ExchangeError::InvalidKey(format!("HKDF expand failed: {}", e)))?;

    let signing_key = SigningKey::from_bytes(&derived_key);
    derived_key.zeroize();
    Ok(signing_key)
}
