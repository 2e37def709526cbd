//! Synchronization engine
//!
//! [`SyncEngine`] owns the visible conversation state and the two paths that
//! mutate it: refresh application (total replacement from the latest fetch)
//! and optimistic append (a well-defined overlay). Both funnel through the
//! same write lock, so an optimistic append is never lost to a concurrently
//! arriving refresh and a refresh never observes a half-applied append.
//!
//! Refreshes are tagged with a monotonically increasing sequence number at
//! issue time; a later-completing but lower-numbered result is discarded so
//! a slow fetch can never regress the view. Overlapping fetches are
//! tolerated and never serialized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate, Conversation};
use crate::error::{EngineError, Result};
use crate::message::{normalize_phone, now_millis, RawMessage};
use crate::pending::PendingSend;
use crate::scheduler::PollScheduler;
use crate::transport::{Lead, MessageTransport};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the polling scheduler
    pub poll_interval: Duration,
    /// Delay before the reconciling refresh that follows a successful send
    pub reconcile_delay: Duration,
    /// Business account attached to sends into brand-new conversations
    pub default_account: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            reconcile_delay: Duration::from_secs(2),
            default_account: None,
        }
    }
}

/// Everything behind the single write path.
#[derive(Default)]
struct EngineState {
    /// Sequence number of the last applied refresh
    applied_seq: u64,
    /// Latest fetched raw collection, replaced wholesale each cycle
    store: Vec<RawMessage>,
    /// Lead-supplied names, keyed by normalized phone
    contacts: HashMap<String, String>,
    /// Keys seeded from leads that have no messages yet, with the seed time
    /// in epoch milliseconds (captured once, so rebuilds are stable)
    seeded: HashMap<String, i64>,
    /// Unresolved optimistic sends
    pending: Vec<PendingSend>,
    /// Derived view, most recent conversation first
    conversations: Vec<Conversation>,
}

struct EngineInner {
    transport: Arc<dyn MessageTransport>,
    config: EngineConfig,
    state: RwLock<EngineState>,
    /// Issue-time counter for refresh sequence numbers
    seq: AtomicU64,
    shutdown: AtomicBool,
    revision: watch::Sender<u64>,
}

impl EngineInner {
    /// One full refresh cycle: fetch, then apply under the sequence guard.
    async fn refresh(&self) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        match self.transport.fetch_messages().await {
            Ok(records) => self.apply_refresh(seq, records).await,
            Err(e) => {
                // Transient by contract: keep the previous state, the next
                // scheduled tick retries.
                warn!(seq, error = %e, "message fetch failed, keeping previous state");
            }
        }
    }

    /// Apply a fetched collection, unless a newer refresh already landed.
    async fn apply_refresh(&self, seq: u64, records: Vec<RawMessage>) {
        if self.shutdown.load(Ordering::SeqCst) {
            debug!(seq, "engine stopped, refresh result discarded");
            return;
        }

        {
            let mut guard = self.state.write().await;
            if seq <= guard.applied_seq {
                debug!(
                    seq,
                    applied = guard.applied_seq,
                    "discarding stale refresh result"
                );
                return;
            }
            guard.applied_seq = seq;
            guard.store = records;
            Self::rebuild(&mut guard);
        }
        self.notify();
    }

    /// Recompute the derived view from the stored raw collection, then
    /// re-overlay whatever optimistic sends are still unresolved.
    fn rebuild(state: &mut EngineState) {
        let mut conversations = aggregate(&state.store, &state.contacts);

        // A seed is only needed until real messages exist for the key.
        state
            .seeded
            .retain(|key, _| !conversations.iter().any(|c| &c.key == key));
        for (key, seeded_at) in &state.seeded {
            let name = state
                .contacts
                .get(key)
                .cloned()
                .unwrap_or_else(|| key.clone());
            conversations.push(Conversation::empty(key, &name, *seeded_at));
        }

        // Keep only the most recent unresolved pending send per conversation.
        state.pending.sort_by_key(|p| p.created_at);
        let mut latest: HashMap<String, PendingSend> = HashMap::new();
        for pending in state.pending.drain(..) {
            latest.insert(pending.message.counterparty.clone(), pending);
        }
        let mut kept: Vec<PendingSend> = latest
            .into_values()
            .filter(|p| !conversations.iter().any(|c| p.resolved_by(c)))
            .collect();
        kept.sort_by_key(|p| p.created_at);

        for pending in &kept {
            Self::overlay(&mut conversations, pending, &state.contacts);
        }
        state.pending = kept;

        conversations.sort_by(|a, b| b.last_timestamp().cmp(&a.last_timestamp()));
        state.conversations = conversations;
    }

    /// Attach one pending send to its conversation, creating the
    /// conversation when none exists yet. The optimistic entry always goes
    /// to the tail and becomes the visible last message.
    fn overlay(
        conversations: &mut Vec<Conversation>,
        pending: &PendingSend,
        contacts: &HashMap<String, String>,
    ) {
        let key = pending.message.counterparty.clone();
        if !conversations.iter().any(|c| c.key == key) {
            let name = contacts.get(&key).cloned().unwrap_or_else(|| key.clone());
            conversations.push(Conversation::empty(&key, &name, pending.created_at));
        }
        if let Some(conversation) = conversations.iter_mut().find(|c| c.key == key) {
            conversation.messages.push(pending.message.clone());
            conversation.last_message = Some(pending.message.clone());
            conversation.recount_unread();
        }
    }

    fn notify(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

/// The conversation synchronization engine.
///
/// Construction is cheap and does nothing; call [`SyncEngine::start`] for
/// periodic polling or [`SyncEngine::refresh_now`] for a one-shot load.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    scheduler: Mutex<PollScheduler>,
}

impl SyncEngine {
    pub fn new(transport: Arc<dyn MessageTransport>, config: EngineConfig) -> Self {
        let (revision, _) = watch::channel(0u64);
        let poll_interval = config.poll_interval;
        Self {
            inner: Arc::new(EngineInner {
                transport,
                config,
                state: RwLock::new(EngineState::default()),
                seq: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                revision,
            }),
            scheduler: Mutex::new(PollScheduler::new(poll_interval)),
        }
    }

    /// Start periodic polling. The first refresh fires immediately.
    /// Idempotent while running; restarts a previously stopped engine.
    pub fn start(&self) {
        self.inner.shutdown.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        if let Ok(mut scheduler) = self.scheduler.lock() {
            scheduler.start(move || {
                let inner = Arc::clone(&inner);
                async move {
                    inner.refresh().await;
                }
            });
        }
        info!("sync engine started");
    }

    /// Stop the timer and mark the engine inert. Outstanding network
    /// operations are not cancelled; their results are discarded.
    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Ok(mut scheduler) = self.scheduler.lock() {
            scheduler.stop();
        }
        info!("sync engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .map(|s| s.is_running())
            .unwrap_or(false)
    }

    /// On-demand refresh: initial load, manual refresh button, post-send
    /// reconciliation.
    pub async fn refresh_now(&self) {
        self.inner.refresh().await;
    }

    /// Snapshot of the conversation list, most recent first.
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.state.read().await.conversations.clone()
    }

    /// Snapshot of a single conversation.
    pub async fn conversation(&self, key: &str) -> Option<Conversation> {
        let key = normalize_phone(key);
        self.inner
            .state
            .read()
            .await
            .conversations
            .iter()
            .find(|c| c.key == key)
            .cloned()
    }

    /// Unread messages across all conversations.
    pub async fn total_unread(&self) -> usize {
        self.inner
            .state
            .read()
            .await
            .conversations
            .iter()
            .map(|c| c.unread_count)
            .sum()
    }

    /// Revision channel; the value bumps on every visible state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Seed an empty conversation from a lead, with a synthetic placeholder
    /// last message. The lead's name joins display-name resolution for the
    /// key from now on.
    pub async fn start_conversation(&self, lead: &Lead) -> Result<()> {
        let key = normalize_phone(&lead.phone);
        if key.is_empty() {
            return Err(EngineError::InvalidPhone(lead.phone.clone()));
        }

        {
            let mut guard = self.inner.state.write().await;
            let name = lead.name.trim();
            if !name.is_empty() {
                guard.contacts.insert(key.clone(), name.to_string());
            }
            // Re-seeding the same lead keeps the original seed time.
            guard.seeded.entry(key.clone()).or_insert_with(now_millis);
            EngineInner::rebuild(&mut guard);
        }
        self.inner.notify();
        debug!(key = %key, "conversation seeded from lead");
        Ok(())
    }

    /// Send a message with synchronous optimistic feedback.
    ///
    /// The pending entry is visible to consumers before the network call is
    /// issued. On success a reconciling refresh is scheduled after the
    /// configured delay; on rejection the append is rolled back, a
    /// corrective refresh is triggered and the reason is returned.
    pub async fn send(&self, conversation_key: &str, body: &str) -> Result<()> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::Stopped);
        }
        let key = normalize_phone(conversation_key);
        if key.is_empty() {
            return Err(EngineError::InvalidPhone(conversation_key.to_string()));
        }

        let pending = {
            let mut guard = self.inner.state.write().await;
            let state = &mut *guard;
            let account = state
                .conversations
                .iter()
                .find(|c| c.key == key)
                .map(|c| c.source_account_id.clone())
                .filter(|a| !a.is_empty())
                .or_else(|| self.inner.config.default_account.clone())
                .unwrap_or_default();

            let pending = PendingSend::new(&key, body, &account);
            state.pending.push(pending.clone());
            EngineInner::overlay(&mut state.conversations, &pending, &state.contacts);
            state
                .conversations
                .sort_by(|a, b| b.last_timestamp().cmp(&a.last_timestamp()));
            pending
        };
        self.inner.notify();

        match self.inner.transport.send_message(&key, body).await {
            Ok(()) => {
                debug!(key = %key, "send accepted, scheduling reconciling refresh");
                let inner = Arc::clone(&self.inner);
                let delay = self.inner.config.reconcile_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.refresh().await;
                });
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "send rejected, rolling back optimistic append");
                {
                    let mut guard = self.inner.state.write().await;
                    guard.pending.retain(|p| p.message.id != pending.message.id);
                    // Restore the last authoritative view right away...
                    EngineInner::rebuild(&mut guard);
                }
                self.inner.notify();
                // ...and fetch a fresh one in the background.
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    inner.refresh().await;
                });
                Err(EngineError::SendRejected(e.to_string()))
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }
}
