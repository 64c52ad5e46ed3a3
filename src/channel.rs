//! Offer channel: publishing and retrieving encrypted agreements per offer.
//!
//! Each offer has its own topic. Publishing signs nothing itself: it takes an
//! already signed envelope, encrypts it under a fresh single-use key, wraps
//! the ciphertext in a one-block archive and publishes a message carrying the
//! key and the archive. Fetching walks the same steps backwards, dropping any
//! message that is not for us, does not verify, or does not decrypt, without
//! disturbing the rest of the batch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::build_archive;
use crate::block::{check_block, encode_block, Block};
use crate::cid::{Cid, Codec, HashAlgorithm};
use crate::crypto::{decrypt, encrypt};
use crate::envelope::EncryptedEnvelope;
use crate::keys::AgreementKey;
use crate::models::{Attachment, MessageType, OfferBody, OfferMessage};
use crate::signature::SignedEnvelope;
use crate::storage::ContentStore;
use crate::transport::{MessagePacker, Transport};
use crate::types::{ExchangeError, Result};

/// Configuration for an offer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Application segment of topic names.
    pub topic_namespace: String,
    /// Version segment of topic names.
    pub topic_version: u32,
    /// Encoding segment of topic names.
    pub topic_encoding: String,
    /// Codec for the encrypted agreement block.
    pub block_codec: Codec,
    /// Hash function for the encrypted agreement block.
    pub hash_algorithm: HashAlgorithm,
    /// Attachments larger than this are skipped unread on fetch.
    pub max_attachment_size: usize,
    /// Human-readable attachment description.
    pub attachment_description: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic_namespace: "ligo".to_string(),
            topic_version: 1,
            topic_encoding: "proto".to_string(),
            block_codec: Codec::DagJson,
            hash_algorithm: HashAlgorithm::Sha2_256,
            max_attachment_size: 1024 * 1024,
            attachment_description: Some("A LigoAgreement".to_string()),
        }
    }
}

impl ChannelConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.topic_namespace = namespace.into();
        self
    }

    pub fn with_block_codec(mut self, codec: Codec) -> Self {
        self.block_codec = codec;
        self
    }

    pub fn with_hash_algorithm(mut self, hash: HashAlgorithm) -> Self {
        self.hash_algorithm = hash;
        self
    }

    pub fn with_max_attachment_size(mut self, size: usize) -> Self {
        self.max_attachment_size = size;
        self
    }

    /// Topic for an offer. Pure: the same offer id always maps to the same
    /// topic, and distinct ids never collide.
    pub fn topic_for(&self, offer_id: &str) -> String {
        format!(
            "/{}/{}/offer-{}/{}",
            self.topic_namespace,
            self.topic_version,
            URL_SAFE_NO_PAD.encode(offer_id),
            self.topic_encoding
        )
    }
}

/// Topic for an offer under the default configuration.
pub fn topic_for(offer_id: &str) -> String {
    ChannelConfig::default().topic_for(offer_id)
}

/// Escrows agreement keys with an external access-control service.
///
/// The returned reference goes into the envelope's key reference slot.
#[async_trait::async_trait]
pub trait KeyEscrow: Send + Sync {
    async fn escrow(&self, key: &AgreementKey, recipient: &str) -> Result<String>;
}

/// Why a fetched message was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Addressed to someone else.
    NotAddressedToUs,
    /// A different message kind than the one being fetched.
    WrongMessageType(MessageType),
    /// Body names a different offer than the topic it arrived on.
    OfferMismatch(String),
    /// Could not be unpacked or parsed.
    Unreadable(String),
    /// Attachment exceeds the configured size limit.
    AttachmentTooLarge(usize),
    /// The referenced block is in neither the attachment nor the store.
    BlockNotFound(String),
    /// Recomputed CID differs from the claimed one.
    BlockIntegrity(String),
    /// Envelope malformed or authentication failed.
    DecryptionFailed(String),
    /// Plaintext is not a signed envelope.
    InvalidPayload(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotAddressedToUs => write!(f, "not addressed to us"),
            SkipReason::WrongMessageType(t) => write!(f, "message type {}", t),
            SkipReason::OfferMismatch(offer) => write!(f, "body names offer {}", offer),
            SkipReason::Unreadable(e) => write!(f, "unreadable: {}", e),
            SkipReason::AttachmentTooLarge(size) => write!(f, "attachment too large: {} bytes", size),
            SkipReason::BlockNotFound(cid) => write!(f, "block not found: {}", cid),
            SkipReason::BlockIntegrity(e) => write!(f, "block integrity: {}", e),
            SkipReason::DecryptionFailed(e) => write!(f, "decryption failed: {}", e),
            SkipReason::InvalidPayload(e) => write!(f, "invalid payload: {}", e),
        }
    }
}

/// Hooks for watching channel activity. All methods default to no-ops.
pub trait ChannelObserver: Send + Sync {
    fn on_published(&self, _offer_id: &str, _message: &OfferMessage) {}

    fn on_skipped(&self, _offer_id: &str, _reason: &SkipReason) {}
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Id of the published message.
    pub message_id: String,
    /// CID of the encrypted agreement block.
    pub cid: Cid,
    /// Topic the message went out on.
    pub topic: String,
}

/// Decrypted agreements per offer, plus offers whose store query failed.
///
/// Every requested offer id lands in exactly one of the two maps.
#[derive(Debug, Default)]
pub struct OfferResponses {
    pub responses: HashMap<String, Vec<SignedEnvelope>>,
    pub failures: HashMap<String, ExchangeError>,
}

impl OfferResponses {
    /// Agreements for one offer; empty if none or if its query failed.
    pub fn get(&self, offer_id: &str) -> &[SignedEnvelope] {
        self.responses.get(offer_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total agreements across all offers.
    pub fn total(&self) -> usize {
        self.responses.values().map(Vec::len).sum()
    }
}

/// Publishes and retrieves agreements on per-offer topics.
///
/// Holds no per-offer state. Collaborators are injected; there is no default
/// transport or identity.
pub struct OfferChannel<T, P>
where
    T: Transport,
    P: MessagePacker,
{
    /// Local identity, used as `from` and to select messages addressed to us.
    identity: Option<String>,
    transport: T,
    packer: P,
    config: ChannelConfig,
    store: Option<Arc<dyn ContentStore>>,
    key_escrow: Option<Arc<dyn KeyEscrow>>,
    observer: Option<Arc<dyn ChannelObserver>>,
}

impl<T, P> OfferChannel<T, P>
where
    T: Transport,
    P: MessagePacker,
{
    /// Creates a channel over the given transport and packer.
    pub fn new(transport: T, packer: P, config: ChannelConfig) -> Self {
        Self {
            identity: None,
            transport,
            packer,
            config,
            store: None,
            key_escrow: None,
            observer: None,
        }
    }

    /// Set the local identity.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Persist published blocks and resolve missing attachment blocks here.
    pub fn with_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Escrow each agreement key and record the reference in the envelope.
    pub fn with_key_escrow(mut self, escrow: Arc<dyn KeyEscrow>) -> Self {
        self.key_escrow = Some(escrow);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the local identity, if configured.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Topic for an offer under this channel's configuration.
    pub fn topic_for(&self, offer_id: &str) -> String {
        self.config.topic_for(offer_id)
    }

    fn require_identity(&self) -> Result<&str> {
        self.identity.as_deref().ok_or(ExchangeError::MissingIdentity)
    }

    /// Send a signed agreement proposal for an offer.
    pub async fn propose(
        &self,
        offer_id: &str,
        counterparty: &str,
        signed: &SignedEnvelope,
    ) -> Result<PublishReceipt> {
        self.publish(offer_id, counterparty, signed, MessageType::ProposeAgreement)
            .await
    }

    /// Send a signed response to an offer.
    pub async fn respond(
        &self,
        offer_id: &str,
        counterparty: &str,
        signed: &SignedEnvelope,
    ) -> Result<PublishReceipt> {
        self.publish(offer_id, counterparty, signed, MessageType::ResponseToOffer)
            .await
    }

    /// Encrypt, content-address and publish a signed agreement.
    ///
    /// Every call mints a fresh key, so retrying after a failure is safe.
    pub async fn publish(
        &self,
        offer_id: &str,
        counterparty: &str,
        signed: &SignedEnvelope,
        message_type: MessageType,
    ) -> Result<PublishReceipt> {
        let identity = self.require_identity()?;

        let key = AgreementKey::generate();
        let key_reference = match &self.key_escrow {
            Some(escrow) => Some(
                escrow
                    .escrow(&key, counterparty)
                    .await
                    .map_err(|e| match e {
                        ExchangeError::KeyEscrowFailed(_) => e,
                        other => ExchangeError::KeyEscrowFailed(other.to_string()),
                    })?,
            ),
            None => None,
        };

        let envelope = encrypt(&signed.to_bytes()?, &key, key_reference)?;
        let block = self.encode_envelope(&envelope)?;
        let archive = build_archive(std::slice::from_ref(&block), &[block.cid.clone()])?;

        if let Some(store) = &self.store {
            store.put(&block).await?;
        }

        let message = OfferMessage::new(
            message_type,
            identity,
            counterparty,
            OfferBody {
                offer: offer_id.to_string(),
                agreement_key: key.to_base64(),
                agreement_cid: Some(block.cid.clone()),
            },
            vec![Attachment::new(
                block.cid.clone(),
                &archive,
                self.config.attachment_description.clone(),
            )],
        );

        let packed = self.packer.pack(&message)?;
        let topic = self.topic_for(offer_id);

        self.transport
            .publish(&topic, &packed)
            .await
            .map_err(|e| match e {
                ExchangeError::TransportError(_) => e,
                other => ExchangeError::TransportError(other.to_string()),
            })?;

        info!(
            offer_id = %offer_id,
            message_id = %message.id,
            cid = %block.cid,
            message_type = %message_type,
            "Published agreement"
        );

        if let Some(observer) = &self.observer {
            observer.on_published(offer_id, &message);
        }

        Ok(PublishReceipt {
            message_id: message.id,
            cid: block.cid,
            topic,
        })
    }

    fn encode_envelope(&self, envelope: &EncryptedEnvelope) -> Result<Block> {
        match self.config.block_codec {
            Codec::Raw => Ok(Block::raw(envelope.encode()?, self.config.hash_algorithm)),
            codec => encode_block(envelope, codec, self.config.hash_algorithm),
        }
    }

    /// Collect responses addressed to us for each offer.
    pub async fn fetch_responses(&self, offer_ids: &[&str]) -> Result<OfferResponses> {
        self.fetch(offer_ids, MessageType::ResponseToOffer).await
    }

    /// Collect proposals addressed to us for each offer.
    pub async fn fetch_proposals(&self, offer_ids: &[&str]) -> Result<OfferResponses> {
        self.fetch(offer_ids, MessageType::ProposeAgreement).await
    }

    /// Fetch and decrypt every message of one kind addressed to us.
    ///
    /// Offers are queried concurrently and fail independently. Bad messages
    /// are skipped; only a missing identity fails the whole call.
    pub async fn fetch(
        &self,
        offer_ids: &[&str],
        message_type: MessageType,
    ) -> Result<OfferResponses> {
        let identity = self.require_identity()?;

        let outcomes = join_all(
            offer_ids
                .iter()
                .map(|offer_id| self.fetch_offer(offer_id, message_type, identity)),
        )
        .await;

        let mut result = OfferResponses::default();
        for (offer_id, outcome) in offer_ids.iter().zip(outcomes) {
            match outcome {
                Ok(agreements) => {
                    result.responses.insert(offer_id.to_string(), agreements);
                }
                Err(e) => {
                    warn!(offer_id = %offer_id, error = %e, "Offer query failed");
                    result.failures.insert(offer_id.to_string(), e);
                }
            }
        }

        Ok(result)
    }

    async fn fetch_offer(
        &self,
        offer_id: &str,
        message_type: MessageType,
        identity: &str,
    ) -> Result<Vec<SignedEnvelope>> {
        let topic = self.topic_for(offer_id);
        let messages = self
            .transport
            .query_historical(&topic)
            .await
            .map_err(|e| match e {
                ExchangeError::StoreQueryError(_) => e,
                other => ExchangeError::StoreQueryError(other.to_string()),
            })?;

        let mut agreements = Vec::new();
        for packed in &messages {
            match self.open_message(offer_id, packed, message_type, identity).await {
                Ok(signed) => agreements.push(signed),
                Err(reason) => self.skip(offer_id, reason),
            }
        }

        debug!(
            offer_id = %offer_id,
            received = messages.len(),
            accepted = agreements.len(),
            "Fetched offer messages"
        );

        Ok(agreements)
    }

    fn skip(&self, offer_id: &str, reason: SkipReason) {
        debug!(offer_id = %offer_id, reason = %reason, "Skipped message");
        if let Some(observer) = &self.observer {
            observer.on_skipped(offer_id, &reason);
        }
    }

    async fn open_message(
        &self,
        offer_id: &str,
        packed: &[u8],
        message_type: MessageType,
        identity: &str,
    ) -> std::result::Result<SignedEnvelope, SkipReason> {
        let recipients = self
            .packer
            .recipients(packed)
            .map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        if !recipients.iter().any(|r| r == identity) {
            return Err(SkipReason::NotAddressedToUs);
        }

        let message = self
            .packer
            .unpack(packed)
            .map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        if message.to != identity {
            return Err(SkipReason::NotAddressedToUs);
        }
        if message.message_type != message_type {
            return Err(SkipReason::WrongMessageType(message.message_type));
        }
        if message.body.offer != offer_id {
            return Err(SkipReason::OfferMismatch(message.body.offer.clone()));
        }

        let cid = message
            .content_reference()
            .ok_or_else(|| SkipReason::BlockNotFound("no content reference".to_string()))?;
        let block = self.locate_block(&message, cid).await?;

        if &block.cid != cid {
            return Err(SkipReason::BlockIntegrity(format!(
                "expected {}, got {}",
                cid, block.cid
            )));
        }
        check_block(&block).map_err(|e| SkipReason::BlockIntegrity(e.to_string()))?;

        let envelope = match block.codec {
            Codec::Raw => EncryptedEnvelope::decode(&block.bytes),
            _ => block.decode::<EncryptedEnvelope>(),
        }
        .map_err(|e| SkipReason::DecryptionFailed(e.to_string()))?;

        let key = AgreementKey::from_base64(&message.body.agreement_key)
            .map_err(|e| SkipReason::DecryptionFailed(e.to_string()))?;
        let plaintext =
            decrypt(&envelope, &key).map_err(|e| SkipReason::DecryptionFailed(e.to_string()))?;

        SignedEnvelope::from_bytes(&plaintext).map_err(|e| SkipReason::InvalidPayload(e.to_string()))
    }

    /// Find the referenced block in the attachment, then in the store.
    async fn locate_block(
        &self,
        message: &OfferMessage,
        cid: &Cid,
    ) -> std::result::Result<Block, SkipReason> {
        if let Some(attachment) = message.agreement_attachment() {
            let size = attachment.approximate_size();
            if size > self.config.max_attachment_size {
                return Err(SkipReason::AttachmentTooLarge(size));
            }

            let archive = attachment
                .archive()
                .map_err(|e| SkipReason::Unreadable(e.to_string()))?;
            if let Some(block) = archive.get(cid) {
                return Ok(block.clone());
            }
        }

        if let Some(store) = &self.store {
            match store.get(cid).await {
                Ok(Some(block)) => return Ok(block),
                Ok(None) => {}
                Err(e) => debug!(cid = %cid, error = %e, "Content store lookup failed"),
            }
        }

        Err(SkipReason::BlockNotFound(cid.to_string()))
    }
}
