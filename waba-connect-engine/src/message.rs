//! Message model and normalization
//!
//! The provider returns flat JSON records ([`RawMessage`], camelCase field
//! names) with optional direction, sender/recipient identifiers and a
//! free-form status string. Before aggregation each record is normalized
//! into a [`Message`] with an explicit [`Direction`], closed [`MessageStatus`]
//! and [`MessageKind`] variants, and a resolved counterparty key.
//!
//! Records whose counterparty cannot be resolved are dropped by the
//! aggregator instead of failing the whole collection.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Message direction relative to the business account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by the customer to the business
    Incoming,
    /// Sent by the business to the customer
    Outgoing,
}

/// Delivery status of a message.
///
/// `Received` is the provider marker attached to inbound records; it doubles
/// as the direction hint for records that carry no explicit direction field.
/// Unknown status strings decode to [`MessageStatus::Unknown`] so a new
/// provider status never fails the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Received,
    Sent,
    Delivered,
    Read,
    Replied,
    Failed,
    /// Any status string this version does not know about
    #[default]
    #[serde(other)]
    Unknown,
}

/// Content kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Template,
    Media,
    /// Any type string this version does not know about
    #[serde(other)]
    Other,
}

/// Raw provider message record, as fetched.
///
/// Every field except `timestamp` is optional or defaulted: the engine is
/// tolerant of partially-filled records and decides later whether a record
/// is usable (it needs a resolvable counterparty identifier).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub id: String,

    /// Explicit direction, when the provider supplies one
    #[serde(default)]
    pub direction: Option<Direction>,

    /// Sender phone identifier (set on incoming messages)
    #[serde(default)]
    pub from: Option<String>,

    /// Recipient phone identifier (set on outgoing messages)
    #[serde(default)]
    pub to: Option<String>,

    /// Human name of the sender, from the provider's contact data
    #[serde(default)]
    pub sender_name: Option<String>,

    #[serde(default)]
    pub body: String,

    #[serde(default, rename = "type")]
    pub kind: MessageKind,

    #[serde(default)]
    pub status: MessageStatus,

    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,

    /// Which business phone number handled the message
    #[serde(default)]
    pub source_account_id: String,

    #[serde(default)]
    pub template_name: Option<String>,
}

impl RawMessage {
    /// Resolve the direction of this record.
    ///
    /// The explicit `direction` field takes precedence over the provider
    /// status marker when both are present; without either, a `received`
    /// status means incoming and everything else is outgoing.
    pub fn resolved_direction(&self) -> Direction {
        if let Some(direction) = self.direction {
            return direction;
        }
        if self.status == MessageStatus::Received {
            Direction::Incoming
        } else {
            Direction::Outgoing
        }
    }

    /// Resolve the conversation key: the normalized phone number of the
    /// other party. `None` when the record carries no usable identifier.
    pub fn counterparty(&self) -> Option<String> {
        let raw = match self.resolved_direction() {
            Direction::Incoming => self.from.as_deref(),
            Direction::Outgoing => self.to.as_deref(),
        }?;
        let key = normalize_phone(raw);
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Normalize into a [`Message`], or `None` when no counterparty can be
    /// resolved.
    pub fn normalize(&self) -> Option<Message> {
        let direction = self.resolved_direction();
        let counterparty = self.counterparty()?;
        Some(Message {
            id: self.id.clone(),
            direction,
            counterparty,
            body: self.body.clone(),
            kind: self.kind,
            status: self.status,
            timestamp: self.timestamp,
            source_account_id: self.source_account_id.clone(),
            template_name: self.template_name.clone(),
            pending: false,
        })
    }
}

/// A normalized message, immutable once authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub direction: Direction,
    /// Normalized phone number of the other party
    pub counterparty: String,
    pub body: String,
    pub kind: MessageKind,
    pub status: MessageStatus,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub source_account_id: String,
    pub template_name: Option<String>,
    /// True only for locally-originated sends not yet confirmed by a refresh
    pub pending: bool,
}

impl Message {
    /// Whether this message counts towards the unread total: incoming and
    /// neither read nor replied.
    pub fn is_unread(&self) -> bool {
        self.direction == Direction::Incoming
            && !matches!(self.status, MessageStatus::Read | MessageStatus::Replied)
    }

    /// Synthetic placeholder shown as the last message of a conversation
    /// seeded from a lead before any real message exists. The timestamp is
    /// the seed time, captured once by the caller so rebuilding the view on
    /// identical input yields identical output.
    pub(crate) fn placeholder(key: &str, timestamp: i64) -> Self {
        Message {
            id: format!("seed-{}", key),
            direction: Direction::Outgoing,
            counterparty: key.to_string(),
            body: String::new(),
            kind: MessageKind::Other,
            status: MessageStatus::Pending,
            timestamp,
            source_account_id: String::new(),
            template_name: None,
            pending: false,
        }
    }
}

/// Normalize a phone identifier into a comparable conversation key.
///
/// Strips a WhatsApp JID suffix (`@s.whatsapp.net`, `@c.us`), a leading `+`
/// and every other non-digit character. An empty result means the
/// identifier is unusable.
pub fn normalize_phone(raw: &str) -> String {
    let bare = raw.split('@').next().unwrap_or(raw);
    bare.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Decode a complete provider message collection from JSON bytes.
///
/// Tolerates the two response shapes seen across provider API versions: a
/// bare array or an object wrapping it under `messages`.
pub fn parse_collection(data: &[u8]) -> Result<Vec<RawMessage>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Envelope {
        Wrapped { messages: Vec<RawMessage> },
        Bare(Vec<RawMessage>),
    }

    Ok(match serde_json::from_slice(data)? {
        Envelope::Wrapped { messages } => messages,
        Envelope::Bare(messages) => messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+49 170 1234567"), "491701234567");
        assert_eq!(normalize_phone("491701234567@s.whatsapp.net"), "491701234567");
        assert_eq!(normalize_phone("5511999990000@c.us"), "5511999990000");
        assert_eq!(normalize_phone("(49) 170-1234567"), "491701234567");
        assert_eq!(normalize_phone("no digits"), "");
    }

    #[test]
    fn test_direction_from_status_marker() {
        let record = RawMessage {
            from: Some("491701234567".to_string()),
            status: MessageStatus::Received,
            ..Default::default()
        };
        assert_eq!(record.resolved_direction(), Direction::Incoming);

        let record = RawMessage {
            to: Some("491701234567".to_string()),
            status: MessageStatus::Sent,
            ..Default::default()
        };
        assert_eq!(record.resolved_direction(), Direction::Outgoing);
    }

    #[test]
    fn test_explicit_direction_wins_over_status_marker() {
        // Disagreeing field and marker: the explicit field takes precedence.
        let record = RawMessage {
            direction: Some(Direction::Outgoing),
            to: Some("491701234567".to_string()),
            status: MessageStatus::Received,
            ..Default::default()
        };
        assert_eq!(record.resolved_direction(), Direction::Outgoing);
    }

    #[test]
    fn test_counterparty_resolution() {
        let incoming = RawMessage {
            from: Some("+49 170 1234567".to_string()),
            to: Some("15550001111".to_string()),
            status: MessageStatus::Received,
            ..Default::default()
        };
        assert_eq!(incoming.counterparty().as_deref(), Some("491701234567"));

        let outgoing = RawMessage {
            from: Some("15550001111".to_string()),
            to: Some("491701234567@s.whatsapp.net".to_string()),
            status: MessageStatus::Sent,
            ..Default::default()
        };
        assert_eq!(outgoing.counterparty().as_deref(), Some("491701234567"));
    }

    #[test]
    fn test_unresolvable_record_normalizes_to_none() {
        let record = RawMessage {
            body: "orphan".to_string(),
            ..Default::default()
        };
        assert!(record.normalize().is_none());
    }

    #[test]
    fn test_unread_predicate() {
        let record = RawMessage {
            from: Some("491701234567".to_string()),
            status: MessageStatus::Received,
            ..Default::default()
        };
        let message = record.normalize().unwrap();
        assert!(message.is_unread());

        let read = Message {
            status: MessageStatus::Read,
            ..message.clone()
        };
        assert!(!read.is_unread());

        let replied = Message {
            status: MessageStatus::Replied,
            ..message
        };
        assert!(!replied.is_unread());
    }

    #[test]
    fn test_parse_collection_tolerates_unknown_fields() {
        let data = br#"[
            {
                "id": "m1",
                "from": "491701234567",
                "senderName": "Ada",
                "body": "hi",
                "type": "text",
                "status": "received",
                "timestamp": 1000,
                "sourceAccountId": "acct-1",
                "somethingNew": true
            },
            {
                "id": "m2",
                "to": "491701234567",
                "body": "welcome",
                "type": "template",
                "templateName": "greeting",
                "status": "some_future_status",
                "timestamp": 2000,
                "sourceAccountId": "acct-1"
            }
        ]"#;

        let records = parse_collection(data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sender_name.as_deref(), Some("Ada"));
        assert_eq!(records[0].status, MessageStatus::Received);
        assert_eq!(records[1].kind, MessageKind::Template);
        assert_eq!(records[1].template_name.as_deref(), Some("greeting"));
        assert_eq!(records[1].status, MessageStatus::Unknown);
    }

    #[test]
    fn test_parse_collection_accepts_wrapped_object() {
        let data = br#"{"messages": [
            {"id": "m1", "to": "111", "status": "sent", "timestamp": 5},
            {"id": "m2", "from": "111", "status": "received", "timestamp": 6}
        ]}"#;

        let records = parse_collection(data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "m1");
    }

    #[test]
    fn test_parse_collection_rejects_malformed_json() {
        assert!(parse_collection(br#"{"messages": 3}"#).is_err());
    }
}
