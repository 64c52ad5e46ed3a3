//! Storage interfaces and implementations for encrypted agreements.
//!
//! This module provides the content storage trait used when an encrypted
//! agreement must outlive the transport, an in-memory implementation, and a
//! thin agreement store that verifies every block it hands back.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::block::{check_block, encode_block, Block};
use crate::cid::{Cid, Codec, HashAlgorithm};
use crate::envelope::EncryptedEnvelope;
use crate::types::{ExchangeError, Result};

// ============================================================================
// Content Store
// ============================================================================

/// Trait for persisting and retrieving content-addressed blocks.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Persist a block, returning its locator.
    async fn put(&self, block: &Block) -> Result<Cid>;

    /// Retrieve a block. `Ok(None)` when the store does not have it.
    async fn get(&self, cid: &Cid) -> Result<Option<Block>>;
}

/// In-memory implementation of ContentStore.
#[derive(Default, Clone)]
pub struct InMemoryContentStore {
    blocks: Arc<RwLock<HashMap<Cid, Vec<u8>>>>,
}

impl InMemoryContentStore {
    /// Creates a new in-memory content store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, block: &Block) -> Result<Cid> {
        let mut blocks = self.blocks.write().await;
        blocks.insert(block.cid.clone(), block.bytes.clone());
        Ok(block.cid.clone())
    }

    async fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        let blocks = self.blocks.read().await;
        Ok(blocks
            .get(cid)
            .map(|bytes| Block::from_parts(cid.clone(), bytes.clone())))
    }
}

// ============================================================================
// Agreement Store
// ============================================================================

/// Stores encrypted agreements as dag-json blocks in a [`ContentStore`].
pub struct AgreementStore<S: ContentStore> {
    store: S,
    hash: HashAlgorithm,
}

impl<S: ContentStore> AgreementStore<S> {
    /// Creates an agreement store hashing with sha2-256.
    pub fn new(store: S) -> Self {
        Self {
            store,
            hash: HashAlgorithm::Sha2_256,
        }
    }

    /// Use a different hash function for new blocks.
    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    /// Encode and persist an encrypted agreement.
    pub async fn store_agreement(&self, envelope: &EncryptedEnvelope) -> Result<Cid> {
        let block = encode_block(envelope, Codec::DagJson, self.hash)?;
        self.store.put(&block).await
    }

    /// Fetch an encrypted agreement, verifying the block before decoding it.
    pub async fn fetch_agreement(&self, cid: &Cid) -> Result<EncryptedEnvelope> {
        let block = self
            .store
            .get(cid)
            .await?
            .ok_or_else(|| ExchangeError::BlockNotFound(cid.to_string()))?;

        if &block.cid != cid {
            return Err(ExchangeError::BlockIntegrityMismatch {
                expected: cid.to_string(),
                actual: block.cid.to_string(),
            });
        }
        check_block(&block)?;

        block.decode()
    }

    /// The underlying content store.
    pub fn content_store(&self) -> &S {
        &self.store
    }
}
