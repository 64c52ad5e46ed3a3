//! Type definitions and protocol constants for agreement exchange.

use thiserror::Error;

/// Encrypted envelope format version byte.
pub const ENVELOPE_VERSION: u8 = 0x01;

/// Size of an agreement key in bytes (256-bit).
pub const AGREEMENT_KEY_SIZE: usize = 32;

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the checksum appended to an encoded identity.
pub const IDENTITY_CHECKSUM_SIZE: usize = 4;

/// Prefix of identity strings produced by the bundled Ed25519 signer.
pub const ED25519_IDENTITY_PREFIX: &str = "ed25519:";

/// Identity derivation salt.
pub const IDENTITY_DERIVATION_SALT: &[u8] = b"LigoExchange-v1-identity";

/// Identity derivation info.
pub const IDENTITY_DERIVATION_INFO: &[u8] = b"ed25519-key";

/// Errors that can occur during agreement exchange.
#[derive(Error, Debug)]
pub enum ExchangeError {
    // Signing Errors
    /// The signature list was empty.
    #[error("No valid signatures found")]
    NoValidSignature,

    /// The signature at the given index failed verification.
    #[error("Invalid signature at index {0}")]
    InvalidSignature(usize),

    /// Signature bytes have the wrong shape for the signing scheme.
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// An identity string could not be resolved to key material.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// No local identity is configured.
    #[error("No local identity configured")]
    MissingIdentity,

    // Encryption Errors
    /// Invalid key material.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    /// Authentication tag mismatch or malformed ciphertext.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Invalid envelope data.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Unknown envelope version.
    #[error("Unknown envelope version: {0}")]
    UnknownVersion(u8),

    /// Envelope names an algorithm this crate does not implement.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The key escrow collaborator failed.
    #[error("Key escrow failed: {0}")]
    KeyEscrowFailed(String),

    // Content Addressing Errors
    /// Malformed content identifier.
    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    /// Codec not supported for this operation.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Hash algorithm not supported.
    #[error("Unsupported hash algorithm: 0x{0:x}")]
    UnsupportedHash(u64),

    /// Recomputed digest does not match the claimed CID.
    #[error("Block integrity mismatch: expected {expected}, got {actual}")]
    BlockIntegrityMismatch { expected: String, actual: String },

    /// Malformed archive bytes.
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// A declared root is not among the archived blocks.
    #[error("Root not present in archive: {0}")]
    MissingRoot(String),

    /// A referenced block could not be found.
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    // Message Errors
    /// Message type URI is not one of the known kinds.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Structurally invalid offer message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Serialization or deserialization failed.
    #[error("Encoding failed: {0}")]
    EncodingError(String),

    // Network Errors
    /// Publishing to the transport failed.
    #[error("Transport failed: {0}")]
    TransportError(String),

    /// Querying the durable store failed.
    #[error("Store query failed: {0}")]
    StoreQueryError(String),
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::EncodingError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Serde helpers for byte fields carried as standard base64 strings.
pub(crate) mod serde_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
