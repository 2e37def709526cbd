//! Conversation Aggregation and Synchronization Engine
//!
//! This library turns the flat, unordered message collection returned by a
//! WhatsApp business messaging provider into stable per-contact conversation
//! threads with correct unread counts. Locally-originated ("optimistic")
//! sends are overlaid onto the derived state immediately and reconciled
//! against authoritative refreshes without duplicates or stale overwrites.
//!
//! The engine is a pure in-memory derivation layer: the raw collection is
//! replaced wholesale on every refresh and conversations are recomputed
//! deterministically from it. Nothing is persisted and no wire format is
//! owned here; fetching and sending go through the [`MessageTransport`]
//! collaborator trait.

pub mod aggregator;
pub mod engine;
pub mod message;
pub mod pending;
pub mod scheduler;
pub mod transport;

mod error;

pub use aggregator::{aggregate, Conversation};
pub use engine::{EngineConfig, SyncEngine};
pub use error::{EngineError, Result};
pub use message::{
    normalize_phone, now_millis, parse_collection, Direction, Message, MessageKind,
    MessageStatus, RawMessage,
};
pub use pending::PendingSend;
pub use scheduler::PollScheduler;
pub use transport::{Lead, MessageTransport};
