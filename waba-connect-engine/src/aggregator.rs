//! Conversation aggregation
//!
//! [`aggregate`] is the pure core of the engine: it maps a raw message
//! collection to an ordered conversation set. It is deterministic and
//! idempotent, so the engine can rebuild the whole view from scratch on
//! every refresh instead of patching state incrementally. Unread counts are
//! always recomputed by full scan for the same reason: counters that are
//! never incremented cannot drift.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::message::{Message, RawMessage};

/// The ordered set of messages exchanged with one counterparty phone number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    /// Normalized counterparty phone number, unique per conversation
    pub key: String,
    /// Human name when one is known, otherwise the bare phone number
    pub display_name: String,
    /// Business phone number handling this thread
    pub source_account_id: String,
    /// Ascending by timestamp; equal timestamps keep input order
    pub messages: Vec<Message>,
    /// Tail of `messages`, or a synthetic placeholder for a seeded
    /// conversation that has no messages yet
    pub last_message: Option<Message>,
    /// Incoming messages not yet read or replied
    pub unread_count: usize,
}

impl Conversation {
    /// A conversation seeded from a lead, before any message exists.
    /// `seeded_at` is the placeholder timestamp, so the seed keeps its place
    /// in the list ordering across rebuilds.
    pub(crate) fn empty(key: &str, display_name: &str, seeded_at: i64) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            source_account_id: String::new(),
            messages: Vec::new(),
            last_message: Some(Message::placeholder(key, seeded_at)),
            unread_count: 0,
        }
    }

    /// Timestamp used for presentation ordering of the conversation list.
    pub fn last_timestamp(&self) -> i64 {
        self.last_message
            .as_ref()
            .map(|m| m.timestamp)
            .unwrap_or(i64::MIN)
    }

    pub(crate) fn recount_unread(&mut self) {
        self.unread_count = self.messages.iter().filter(|m| m.is_unread()).count();
    }
}

/// Rebuild the conversation set from a raw message collection.
///
/// `contacts` maps normalized phone keys to human names supplied by the
/// lead system; a contact name takes precedence over the sender name
/// carried on individual records. Records without a resolvable
/// counterparty are dropped, never an error.
///
/// The result is ordered most-recent-first by last-message timestamp;
/// ties keep first-appearance order so repeated calls on identical input
/// yield structurally identical output.
pub fn aggregate(records: &[RawMessage], contacts: &HashMap<String, String>) -> Vec<Conversation> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<Message>> = HashMap::new();
    let mut names: HashMap<String, String> = HashMap::new();
    let mut accounts: HashMap<String, String> = HashMap::new();

    for record in records {
        let Some(message) = record.normalize() else {
            debug!(id = %record.id, "dropping record with no resolvable counterparty");
            continue;
        };

        let key = message.counterparty.clone();
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }

        // First non-empty human name wins; later records cannot displace it.
        if !names.contains_key(&key) {
            if let Some(name) = record.sender_name.as_deref() {
                let name = name.trim();
                if !name.is_empty() {
                    names.insert(key.clone(), name.to_string());
                }
            }
        }

        if !message.source_account_id.is_empty() {
            accounts.insert(key.clone(), message.source_account_id.clone());
        }

        buckets.entry(key).or_default().push(message);
    }

    let mut conversations: Vec<Conversation> = order
        .into_iter()
        .map(|key| {
            let mut messages = buckets.remove(&key).unwrap_or_default();
            // Stable sort: equal timestamps keep input order.
            messages.sort_by_key(|m| m.timestamp);

            let display_name = contacts
                .get(&key)
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .or_else(|| names.remove(&key))
                .unwrap_or_else(|| key.clone());

            let last_message = messages.last().cloned();
            let unread_count = messages.iter().filter(|m| m.is_unread()).count();

            Conversation {
                source_account_id: accounts.remove(&key).unwrap_or_default(),
                key,
                display_name,
                messages,
                last_message,
                unread_count,
            }
        })
        .collect();

    // Stable sort keeps first-appearance order for equal timestamps.
    conversations.sort_by(|a, b| b.last_timestamp().cmp(&a.last_timestamp()));
    conversations
}
