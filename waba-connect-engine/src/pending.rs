//! Optimistic send bookkeeping
//!
//! A [`PendingSend`] is a locally-synthesized outgoing message shown before
//! the provider confirms it. It lives only in the overlay: every refresh
//! rebuilds conversations wholesale and re-applies pending sends that are
//! still unresolved, so a pending send disappears the moment its
//! authoritative counterpart shows up in the fetched collection.

use uuid::Uuid;

use crate::aggregator::Conversation;
use crate::message::{now_millis, Direction, Message, MessageKind, MessageStatus};

/// Clock skew allowance when matching an authoritative message against the
/// pending send it supersedes. Server timestamps may lag the local clock.
const RECONCILE_SKEW_MS: i64 = 60_000;

/// A locally-originated message awaiting reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    /// The overlaid message, `status = Pending`, `pending = true`
    pub message: Message,
    /// Local wall-clock time at submission, epoch milliseconds
    pub created_at: i64,
}

impl PendingSend {
    /// Synthesize a pending send with a locally unique identifier.
    pub fn new(key: &str, body: &str, source_account_id: &str) -> Self {
        let now = now_millis();
        Self {
            message: Message {
                id: format!("local-{}", Uuid::new_v4()),
                direction: Direction::Outgoing,
                counterparty: key.to_string(),
                body: body.to_string(),
                kind: MessageKind::Text,
                status: MessageStatus::Pending,
                timestamp: now,
                source_account_id: source_account_id.to_string(),
                template_name: None,
                pending: true,
            },
            created_at: now,
        }
    }

    /// True once `conversation`, rebuilt from authoritative data, contains a
    /// real message that supersedes this pending send: outgoing, same body,
    /// not older than the submission (minus skew allowance).
    pub fn resolved_by(&self, conversation: &Conversation) -> bool {
        conversation.key == self.message.counterparty
            && conversation.messages.iter().any(|m| {
                !m.pending
                    && m.direction == Direction::Outgoing
                    && m.body == self.message.body
                    && m.timestamp + RECONCILE_SKEW_MS >= self.created_at
            })
    }
}
