//! Ligo agreement exchange
//!
//! Sign, encrypt, content-address and exchange rental agreements over an
//! untrusted pub/sub transport using Ed25519 signature chains and
//! XChaCha20-Poly1305.

mod types;
mod keys;
mod signature;
mod envelope;
mod crypto;
mod cid;
mod block;
mod archive;
mod models;
mod transport;
mod storage;
mod channel;

pub use types::*;
pub use keys::*;
pub use signature::*;
pub use envelope::*;
pub use crypto::*;
pub use cid::*;
pub use block::*;
pub use archive::*;
pub use models::*;
pub use transport::*;
pub use storage::*;
pub use channel::*;
