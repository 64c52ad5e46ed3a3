//! Transport interfaces for topic-scoped publication.
//!
//! This module provides traits for the pub/sub substrate and for the
//! recipient-addressed packing of offer messages. Implementations can wrap
//! any gossip network with a durable store.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::OfferMessage;
use crate::types::{ExchangeError, Result};

/// Pub/sub substrate with a durable history per topic.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Publish one message on a topic. No acknowledgement from readers.
    async fn publish(&self, topic: &str, message: &[u8]) -> Result<()>;

    /// Every message stored for a topic, in store order.
    async fn query_historical(&self, topic: &str) -> Result<Vec<Vec<u8>>>;
}

/// Packs offer messages for delivery to their addressee.
///
/// The recipient list must be readable without unpacking, so readers can
/// drop traffic addressed to someone else cheaply.
pub trait MessagePacker: Send + Sync {
    /// Pack a message for its `to` identity.
    fn pack(&self, message: &OfferMessage) -> Result<Vec<u8>>;

    /// Identities a packed message is addressed to.
    fn recipients(&self, packed: &[u8]) -> Result<Vec<String>>;

    /// Recover the message.
    fn unpack(&self, packed: &[u8]) -> Result<OfferMessage>;
}

#[derive(Serialize)]
struct PackedRef<'a> {
    recipients: Vec<&'a str>,
    message: &'a OfferMessage,
}

#[derive(Deserialize)]
struct PackedRecipients {
    recipients: Vec<String>,
}

#[derive(Deserialize)]
struct PackedMessage {
    message: serde_json::Value,
}

/// Plain JSON packing: `{"recipients": [...], "message": {...}}`.
///
/// Provides addressing only. Confidentiality of the agreement comes from the
/// encrypted attachment, not from this layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPacker;

impl MessagePacker for JsonPacker {
    fn pack(&self, message: &OfferMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&PackedRef {
            recipients: vec![message.to.as_str()],
            message,
        })?)
    }

    fn recipients(&self, packed: &[u8]) -> Result<Vec<String>> {
        let parsed: PackedRecipients = serde_json::from_slice(packed)
            .map_err(|e| ExchangeError::InvalidMessage(format!("No recipient list: {}", e)))?;
        Ok(parsed.recipients)
    }

    fn unpack(&self, packed: &[u8]) -> Result<OfferMessage> {
        let parsed: PackedMessage = serde_json::from_slice(packed)
            .map_err(|e| ExchangeError::InvalidMessage(format!("Bad packing: {}", e)))?;
        OfferMessage::from_bytes(&serde_json::to_vec(&parsed.message)?)
    }
}

/// In-memory transport shared by cloning (for testing and local wiring).
#[derive(Default, Clone)]
pub struct InMemoryTransport {
    topics: Arc<RwLock<HashMap<String, Vec<Vec<u8>>>>>,
}

impl InMemoryTransport {
    /// Creates a new empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored on a topic.
    pub async fn message_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics.get(topic).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, message: &[u8]) -> Result<()> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .push(message.to_vec());
        Ok(())
    }

    async fn query_historical(&self, topic: &str) -> Result<Vec<Vec<u8>>> {
        let topics = self.topics.read().await;
        Ok(topics.get(topic).cloned().unwrap_or_default())
    }
}
