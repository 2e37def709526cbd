//! External collaborator boundary
//!
//! The engine never talks to the network itself; it goes through
//! [`MessageTransport`]. Production wires this to the provider's REST API,
//! tests inject in-memory mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::RawMessage;

/// The external messaging collaborator.
///
/// `fetch_messages` returns the complete current collection; there is no
/// delta or pagination contract, the engine replaces its store wholesale.
/// Fetch failures are transient by definition: the engine logs them and the
/// next cycle retries. `send_message` failures carry a human-readable
/// reason that is surfaced to the caller.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn fetch_messages(&self) -> Result<Vec<RawMessage>>;

    async fn send_message(&self, phone: &str, body: &str) -> Result<()>;
}

/// Contact handed over by the lead system to start a conversation before
/// any message exists for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub name: String,
    pub phone: String,
}
