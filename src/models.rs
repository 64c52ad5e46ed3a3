//! Data models for offer messages.
//!
//! This module defines the wire shapes exchanged over the transport: the
//! closed set of message kinds, the message body and its archive attachments.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::archive::{read_archive, Archive};
use crate::cid::Cid;
use crate::types::{ExchangeError, Result};

/// Kinds of offer message. Anything else on the wire is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// The proposer's signed agreement for an offer.
    ProposeAgreement,
    /// A counterparty's response to an offer.
    ResponseToOffer,
}

impl MessageType {
    /// Type URI carried in the `type` field.
    pub fn uri(self) -> &'static str {
        match self {
            MessageType::ProposeAgreement => "https://ligo.dev/didcomm/ProposeAgreement",
            MessageType::ResponseToOffer => "https://ligo.dev/didcomm/ResponseToOffer",
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        match uri {
            "https://ligo.dev/didcomm/ProposeAgreement" => Ok(MessageType::ProposeAgreement),
            "https://ligo.dev/didcomm/ResponseToOffer" => Ok(MessageType::ResponseToOffer),
            other => Err(ExchangeError::UnknownMessageType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.uri())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;
        MessageType::from_uri(&uri).map_err(serde::de::Error::custom)
    }
}

/// Body of an offer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferBody {
    /// Offer this message belongs to.
    pub offer: String,
    /// Base64 agreement key.
    pub agreement_key: String,
    /// CID of the encrypted agreement block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement_cid: Option<Cid>,
}

/// Attachment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentData {
    /// Base64 archive bytes.
    pub base64: String,
}

/// An archive attached to a message, keyed by its root CID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Root CID of the attached archive.
    pub id: Cid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data: AttachmentData,
}

impl Attachment {
    /// Attach archive bytes under the given root.
    pub fn new(id: Cid, archive: &[u8], description: Option<String>) -> Self {
        Self {
            id,
            description,
            data: AttachmentData {
                base64: STANDARD.encode(archive),
            },
        }
    }

    /// Decoded size in bytes, computed without decoding.
    pub fn approximate_size(&self) -> usize {
        self.data.base64.len() / 4 * 3
    }

    /// Raw archive bytes.
    pub fn archive_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.data.base64.as_bytes())
            .map_err(|e| ExchangeError::InvalidMessage(format!("Attachment base64: {}", e)))
    }

    /// Parse the attached archive.
    pub fn archive(&self) -> Result<Archive> {
        read_archive(&self.archive_bytes()?)
    }
}

/// A message published on an offer topic. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferMessage {
    /// Unique message id.
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Sender identity.
    pub from: String,
    /// Recipient identity.
    pub to: String,
    /// Unix seconds, as a decimal string.
    pub created_time: String,
    pub body: OfferBody,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl OfferMessage {
    /// Creates a new message stamped with a fresh id and the current time.
    pub fn new(
        message_type: MessageType,
        from: impl Into<String>,
        to: impl Into<String>,
        body: OfferBody,
        attachments: Vec<Attachment>,
    ) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type,
            from: from.into(),
            to: to.into(),
            created_time: created.to_string(),
            body,
            attachments,
        }
    }

    /// The attachment whose id matches the body's content reference, falling
    /// back to the first attachment when the body carries no reference.
    pub fn agreement_attachment(&self) -> Option<&Attachment> {
        match &self.body.agreement_cid {
            Some(cid) => self.attachments.iter().find(|a| &a.id == cid),
            None => self.attachments.first(),
        }
    }

    /// CID of the encrypted agreement, from the body or the attachment id.
    pub fn content_reference(&self) -> Option<&Cid> {
        self.body
            .agreement_cid
            .as_ref()
            .or_else(|| self.attachments.first().map(|a| &a.id))
    }

    /// Creation time, if `created_time` parses.
    pub fn created_at(&self) -> Option<SystemTime> {
        let secs: u64 = self.created_time.parse().ok()?;
        Some(UNIX_EPOCH + Duration::from_secs(secs))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a message, rejecting unknown `type` values explicitly.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(data)?;
        if let Some(uri) = value.get("type").and_then(|t| t.as_str()) {
            MessageType::from_uri(uri)?;
        }
        serde_json::from_value(value)
            .map_err(|e| ExchangeError::InvalidMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::build_archive;
    use crate::block::Block;
    use crate::cid::HashAlgorithm;

    fn message() -> OfferMessage {
        let block = Block::raw(b"ciphertext".to_vec(), HashAlgorithm::Sha2_256);
        let archive = build_archive(std::slice::from_ref(&block), &[block.cid.clone()]).unwrap();
        OfferMessage::new(
            MessageType::ResponseToOffer,
            "ed25519:ALICE",
            "ed25519:BOB",
            OfferBody {
                offer: "offer-1".to_string(),
                agreement_key: "a2V5".to_string(),
                agreement_cid: Some(block.cid.clone()),
            },
            vec![Attachment::new(block.cid, &archive, Some("A LigoAgreement".to_string()))],
        )
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(message()).unwrap();
        assert_eq!(json["type"], "https://ligo.dev/didcomm/ResponseToOffer");
        assert_eq!(json["body"]["offer"], "offer-1");
        assert_eq!(json["body"]["agreementKey"], "a2V5");
        assert!(json["body"]["agreementCid"].as_str().unwrap().starts_with('b'));
        assert!(json["attachments"][0]["data"]["base64"].is_string());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let msg = message();
        let parsed = OfferMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, msg);
        assert!(parsed.created_at().is_some());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut json = serde_json::to_value(message()).unwrap();
        json["type"] = serde_json::Value::String("https://ligo.dev/didcomm/Unknown".into());
        let bytes = serde_json::to_vec(&json).unwrap();

        let result = OfferMessage::from_bytes(&bytes);
        assert!(matches!(result, Err(ExchangeError::UnknownMessageType(_))));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let result = OfferMessage::from_bytes(br#"{"type":"https://ligo.dev/didcomm/ResponseToOffer"}"#);
        assert!(matches!(result, Err(ExchangeError::InvalidMessage(_))));
    }

    #[test]
    fn test_agreement_attachment_lookup() {
        let msg = message();
        let attachment = msg.agreement_attachment().unwrap();
        assert_eq!(Some(&attachment.id), msg.content_reference());

        let archive = attachment.archive().unwrap();
        assert!(archive.get(&attachment.id).is_some());
    }

    #[test]
    fn test_fresh_ids() {
        assert_ne!(message().id, message().id);
    }
}
