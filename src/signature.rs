//! Chained multi-party signatures over a single agreement payload.
//!
//! A [`SignedEnvelope`] holds one payload and an ordered list of independent
//! signatures over it, first signer first. Countersigning appends a new entry
//! and never touches earlier ones. Verification is all-or-nothing: a single
//! bad entry rejects the whole envelope.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use tracing::debug;

use crate::keys::derive_signing_key_from_seed;
use crate::types::{
    serde_base64, ExchangeError, Result, ED25519_IDENTITY_PREFIX, IDENTITY_CHECKSUM_SIZE,
    PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};

/// Produces signatures on behalf of one identity.
pub trait Signer: Send + Sync {
    /// The resolvable identity string of this signer.
    fn identity(&self) -> &str;

    /// Sign the payload bytes.
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Checks a signature against the key material bound to an identity.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `Ok(false)` for a well-formed but wrong signature.
    fn verify(&self, signer: &str, payload: &[u8], signature: &[u8]) -> Result<bool>;
}

/// One signature in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Identity of the signer.
    pub signer: String,
    /// Raw signature bytes.
    #[serde(with = "serde_base64")]
    pub signature: Vec<u8>,
}

/// A payload plus the ordered list of signatures over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// The signed bytes, identical for every entry.
    #[serde(with = "serde_base64")]
    pub payload: Vec<u8>,
    /// Signatures in chronological order.
    pub signatures: Vec<SignatureEntry>,
}

impl SignedEnvelope {
    /// An envelope with no signatures yet. Never valid input to [`verify`].
    pub fn unsigned(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            signatures: Vec::new(),
        }
    }

    /// Identities of all signers, first signer first.
    pub fn signers(&self) -> impl Iterator<Item = &str> {
        self.signatures.iter().map(|entry| entry.signer.as_str())
    }

    /// Serialize to the JSON form carried inside encrypted envelopes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the JSON form.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Sign a raw payload, producing a single-entry chain.
pub fn sign(payload: impl Into<Vec<u8>>, signer: &dyn Signer) -> Result<SignedEnvelope> {
    extend(&SignedEnvelope::unsigned(payload), signer)
}

/// Countersign an envelope, appending a new entry over the same payload.
pub fn extend(envelope: &SignedEnvelope, signer: &dyn Signer) -> Result<SignedEnvelope> {
    let signature = signer.sign(&envelope.payload)?;

    let mut extended = envelope.clone();
    extended.signatures.push(SignatureEntry {
        signer: signer.identity().to_string(),
        signature,
    });
    Ok(extended)
}

/// Verify every signature in the chain and return the payload.
///
/// Fails with [`ExchangeError::NoValidSignature`] on an empty chain and with
/// [`ExchangeError::InvalidSignature`] naming the first entry that does not
/// check out, even when all the others do.
pub fn verify<'a>(envelope: &'a SignedEnvelope, verifier: &dyn SignatureVerifier) -> Result<&'a [u8]> {
    if envelope.signatures.is_empty() {
        return Err(ExchangeError::NoValidSignature);
    }

    for (index, entry) in envelope.signatures.iter().enumerate() {
        let valid = match verifier.verify(&entry.signer, &envelope.payload, &entry.signature) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(index, signer = %entry.signer, error = %e, "Signature check errored");
                false
            }
        };

        if !valid {
            return Err(ExchangeError::InvalidSignature(index));
        }
    }

    Ok(&envelope.payload)
}

/// Ed25519 signer with a self-certifying identity string.
pub struct Ed25519Signer {
    signing_key: SigningKey,
    identity: String,
}

impl Ed25519Signer {
    /// Wrap an existing signing key.
    pub fn new(signing_key: SigningKey) -> Self {
        let identity = encode_identity(&signing_key.verifying_key());
        Self {
            signing_key,
            identity,
        }
    }

    /// Generate a random identity.
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Derive an identity deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        Ok(Self::new(derive_signing_key_from_seed(seed)?))
    }

    /// The Ed25519 public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl Signer for Ed25519Signer {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(payload).to_bytes().to_vec())
    }
}

/// Resolves `ed25519:` identity strings to keys and checks signatures.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, signer: &str, payload: &[u8], signature: &[u8]) -> Result<bool> {
        let verifying_key = decode_identity(signer)?;

        if signature.len() != SIGNATURE_SIZE {
            return Err(ExchangeError::MalformedSignature(format!(
                "must be {} bytes, got {}",
                SIGNATURE_SIZE,
                signature.len()
            )));
        }

        let signature_bytes: [u8; SIGNATURE_SIZE] = signature
            .try_into()
            .map_err(|_| ExchangeError::MalformedSignature("Invalid signature bytes".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        Ok(verifying_key.verify(payload, &signature).is_ok())
    }
}

fn identity_checksum(public_key: &[u8]) -> [u8; IDENTITY_CHECKSUM_SIZE] {
    let hash = Sha512_256::digest(public_key);
    let mut checksum = [0u8; IDENTITY_CHECKSUM_SIZE];
    checksum.copy_from_slice(&hash[hash.len() - IDENTITY_CHECKSUM_SIZE..]);
    checksum
}

/// Encode a public key as `ed25519:<BASE32(pubkey || checksum)>`.
pub fn encode_identity(verifying_key: &VerifyingKey) -> String {
    let public_key = verifying_key.as_bytes();
    let mut data = Vec::with_capacity(PUBLIC_KEY_SIZE + IDENTITY_CHECKSUM_SIZE);
    data.extend_from_slice(public_key);
    data.extend_from_slice(&identity_checksum(public_key));
    format!(
        "{}{}",
        ED25519_IDENTITY_PREFIX,
        data_encoding::BASE32_NOPAD.encode(&data)
    )
}

/// Decode an `ed25519:` identity string back to its public key.
pub fn decode_identity(identity: &str) -> Result<VerifyingKey> {
    let encoded = identity.strip_prefix(ED25519_IDENTITY_PREFIX).ok_or_else(|| {
        ExchangeError::InvalidIdentity(format!("Not an ed25519 identity: {}", identity))
    })?;

    let decoded = data_encoding::BASE32_NOPAD
        .decode(encoded.as_bytes())
        .map_err(|e| ExchangeError::InvalidIdentity(format!("Invalid base32: {}", e)))?;

    if decoded.len() != PUBLIC_KEY_SIZE + IDENTITY_CHECKSUM_SIZE {
        return Err(ExchangeError::InvalidIdentity(format!(
            "Decoded identity must be {} bytes, got {}",
            PUBLIC_KEY_SIZE + IDENTITY_CHECKSUM_SIZE,
            decoded.len()
        )));
    }

    let (public_key, checksum) = decoded.split_at(PUBLIC_KEY_SIZE);
    if identity_checksum(public_key) != checksum {
        return Err(ExchangeError::InvalidIdentity(
            "Identity checksum mismatch".to_string(),
        ));
    }

    let mut key_bytes = [0u8; PUBLIC_KEY_SIZE];
    key_bytes.copy_from_slice(public_key);

    VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| ExchangeError::InvalidIdentity(format!("Invalid Ed25519 public key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGREEMENT: &[u8] = br#"{"order":{"@id":"ipfs://fake"}}"#;

    #[test]
    fn test_sign_and_verify() {
        let alice = Ed25519Signer::generate();
        let signed = sign(AGREEMENT, &alice).unwrap();

        assert_eq!(signed.signatures.len(), 1);
        assert_eq!(signed.signatures[0].signer, alice.identity());
        assert_eq!(verify(&signed, &Ed25519Verifier).unwrap(), AGREEMENT);
    }

    #[test]
    fn test_extend_chain() {
        let alice = Ed25519Signer::generate();
        let bob = Ed25519Signer::generate();

        let signed = sign(AGREEMENT, &alice).unwrap();
        let countersigned = extend(&signed, &bob).unwrap();

        assert_eq!(countersigned.signatures.len(), 2);
        assert_eq!(countersigned.signatures[0], signed.signatures[0]);
        assert_eq!(
            countersigned.signers().collect::<Vec<_>>(),
            vec![alice.identity(), bob.identity()]
        );
        assert_eq!(verify(&countersigned, &Ed25519Verifier).unwrap(), AGREEMENT);
    }

    #[test]
    fn test_empty_chain_rejected() {
        let envelope = SignedEnvelope::unsigned(AGREEMENT);
        let result = verify(&envelope, &Ed25519Verifier);
        assert!(matches!(result, Err(ExchangeError::NoValidSignature)));
    }

    #[test]
    fn test_one_bad_signature_rejects_all() {
        let alice = Ed25519Signer::generate();
        let mallory = Ed25519Signer::generate();

        let mut envelope = sign(AGREEMENT, &alice).unwrap();
        envelope.signatures.push(SignatureEntry {
            signer: mallory.identity().to_string(),
            signature: mallory.sign(b"a different agreement").unwrap(),
        });

        let result = verify(&envelope, &Ed25519Verifier);
        assert!(matches!(result, Err(ExchangeError::InvalidSignature(1))));
    }

    #[test]
    fn test_unresolvable_signer_is_invalid() {
        let alice = Ed25519Signer::generate();
        let mut envelope = sign(AGREEMENT, &alice).unwrap();
        envelope.signatures[0].signer = "did:example:nobody".to_string();

        let result = verify(&envelope, &Ed25519Verifier);
        assert!(matches!(result, Err(ExchangeError::InvalidSignature(0))));
    }

    #[test]
    fn test_truncated_signature_is_malformed() {
        let alice = Ed25519Signer::generate();
        let signature = alice.sign(AGREEMENT).unwrap();

        let result = Ed25519Verifier.verify(alice.identity(), AGREEMENT, &signature[..32]);
        assert!(matches!(result, Err(ExchangeError::MalformedSignature(_))));

        let mut envelope = sign(AGREEMENT, &alice).unwrap();
        envelope.signatures[0].signature.truncate(32);
        assert!(matches!(
            verify(&envelope, &Ed25519Verifier),
            Err(ExchangeError::InvalidSignature(0))
        ));
    }

    #[test]
    fn test_identity_roundtrip() {
        let alice = Ed25519Signer::generate();
        let decoded = decode_identity(alice.identity()).unwrap();
        assert_eq!(decoded, alice.verifying_key());
    }

    #[test]
    fn test_identity_checksum_mismatch() {
        let alice = Ed25519Signer::generate();
        let mut identity = alice.identity().to_string();
        let last = identity.pop().unwrap();
        identity.push(if last == 'A' { 'B' } else { 'A' });

        assert!(matches!(
            decode_identity(&identity),
            Err(ExchangeError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_seeded_identity_is_stable() {
        let seed = [1u8; 32];
        let a = Ed25519Signer::from_seed(&seed).unwrap();
        let b = Ed25519Signer::from_seed(&seed).unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_json_form() {
        let alice = Ed25519Signer::generate();
        let signed = sign(AGREEMENT, &alice).unwrap();
        let bytes = signed.to_bytes().unwrap();
        assert_eq!(SignedEnvelope::from_bytes(&bytes).unwrap(), signed);
    }
}
