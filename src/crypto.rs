//! Symmetric encryption and decryption of agreement payloads.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::envelope::{Algorithm, EncryptedEnvelope};
use crate::keys::AgreementKey;
use crate::types::{ExchangeError, Result, NONCE_SIZE, TAG_SIZE};

/// Encrypt opaque payload bytes under a caller-supplied key.
///
/// A fresh random nonce is drawn for every call. `key_reference`, if given,
/// is stored verbatim in the envelope header and is not authenticated.
///
/// # Arguments
/// * `plaintext` - Payload bytes (raw agreement or serialized signed envelope)
/// * `key` - 256-bit agreement key
/// * `key_reference` - Optional escrow lookup handle
pub fn encrypt(
    plaintext: &[u8],
    key: &AgreementKey,
    key_reference: Option<String>,
) -> Result<EncryptedEnvelope> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| ExchangeError::EncryptionError(format!("Cipher init failed: {}", e)))?;

    let mut ciphertext = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(XNonce::from_slice(&nonce), b"", &mut ciphertext)
        .map_err(|e| ExchangeError::EncryptionError(format!("Encryption failed: {}", e)))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(EncryptedEnvelope {
        algorithm: Algorithm::XChaCha20Poly1305,
        nonce,
        ciphertext,
        tag: tag_bytes,
        key_reference,
    })
}

/// Decrypt an envelope with the given key.
///
/// Any authentication failure is reported as
/// [`ExchangeError::DecryptionFailed`].
pub fn decrypt(envelope: &EncryptedEnvelope, key: &AgreementKey) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| ExchangeError::DecryptionFailed(format!("Cipher init failed: {}", e)))?;

    let mut plaintext = envelope.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            XNonce::from_slice(&envelope.nonce),
            b"",
            &mut plaintext,
            Tag::from_slice(&envelope.tag),
        )
        .map_err(|_| ExchangeError::DecryptionFailed("Authentication tag mismatch".to_string()))?;

    Ok(plaintext)
}

/// Decode a binary envelope and decrypt it, folding malformed input into
/// [`ExchangeError::DecryptionFailed`].
pub fn decrypt_bytes(data: &[u8], key: &AgreementKey) -> Result<Vec<u8>> {
    let envelope = EncryptedEnvelope::decode(data)
        .map_err(|e| ExchangeError::DecryptionFailed(format!("Malformed envelope: {}", e)))?;
    decrypt(&envelope, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const AGREEMENT: &[u8] = br#"{"order":{"@id":"ipfs://fake"}}"#;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = AgreementKey::generate();
        let envelope = encrypt(AGREEMENT, &key, None).unwrap();

        assert_eq!(envelope.algorithm, Algorithm::XChaCha20Poly1305);
        assert_ne!(envelope.ciphertext.as_slice(), AGREEMENT);
        assert_eq!(decrypt(&envelope, &key).unwrap(), AGREEMENT);
    }

    #[test]
    fn test_empty_payload() {
        let key = AgreementKey::generate();
        let envelope = encrypt(b"", &key, None).unwrap();
        assert!(envelope.ciphertext.is_empty());
        assert_eq!(decrypt(&envelope, &key).unwrap(), b"");
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = AgreementKey::generate();
        let a = encrypt(AGREEMENT, &key, None).unwrap();
        let b = encrypt(AGREEMENT, &key, None).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_every_flipped_bit_detected() {
        let key = AgreementKey::generate();
        let envelope = encrypt(AGREEMENT, &key, None).unwrap();

        for byte in 0..envelope.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = envelope.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                let result = decrypt(&tampered, &key);
                assert!(matches!(result, Err(ExchangeError::DecryptionFailed(_))));
            }
        }
    }

    #[test]
    fn test_tampered_tag_detected() {
        let key = AgreementKey::generate();
        let mut envelope = encrypt(AGREEMENT, &key, None).unwrap();
        envelope.tag[0] ^= 0x01;
        assert!(matches!(
            decrypt(&envelope, &key),
            Err(ExchangeError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_wrong_key() {
        let envelope = encrypt(AGREEMENT, &AgreementKey::generate(), None).unwrap();
        let result = decrypt(&envelope, &AgreementKey::generate());
        assert!(matches!(result, Err(ExchangeError::DecryptionFailed(_))));
    }

    #[test]
    fn test_key_reference_not_interpreted() {
        let key = AgreementKey::generate();
        let envelope = encrypt(AGREEMENT, &key, Some("escrow:42".to_string())).unwrap();
        assert_eq!(envelope.key_reference.as_deref(), Some("escrow:42"));

        let mut relabelled = envelope.clone();
        relabelled.key_reference = Some("something else".to_string());
        assert_eq!(decrypt(&relabelled, &key).unwrap(), AGREEMENT);
    }

    #[test]
    fn test_decrypt_bytes_malformed() {
        let key = AgreementKey::generate();
        let result = decrypt_bytes(&[0x01, 0x01, 0x00], &key);
        assert!(matches!(result, Err(ExchangeError::DecryptionFailed(_))));
    }

    #[test]
    fn test_decrypt_bytes_roundtrip() {
        let key = AgreementKey::generate();
        let encoded = encrypt(AGREEMENT, &key, None).unwrap().encode().unwrap();
        assert_eq!(decrypt_bytes(&encoded, &key).unwrap(), AGREEMENT);
    }

    proptest! {
        /// Any payload encrypted under any key decrypts back to itself.
        #[test]
        fn roundtrip_any_payload_any_key(
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
            key_bytes in any::<[u8; 32]>(),
        ) {
            let key = AgreementKey::from_bytes(key_bytes);
            let envelope = encrypt(&payload, &key, None).unwrap();
            prop_assert_eq!(envelope.ciphertext.len(), payload.len());
            prop_assert_eq!(decrypt(&envelope, &key).unwrap(), payload);
        }

        /// A different key never opens the envelope.
        #[test]
        fn other_key_fails(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            key_bytes in any::<[u8; 32]>(),
            other_bytes in any::<[u8; 32]>(),
        ) {
            prop_assume!(key_bytes != other_bytes);
            let envelope = encrypt(&payload, &AgreementKey::from_bytes(key_bytes), None).unwrap();
            let result = decrypt(&envelope, &AgreementKey::from_bytes(other_bytes));
            prop_assert!(matches!(result, Err(ExchangeError::DecryptionFailed(_))));
        }
    }
}
