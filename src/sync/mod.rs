// Message synchronization engine for parley
//
// Owns the per-contact message buffers: backward pagination by id cursor,
// live-event merge, send validation, and the auto-scroll decision. All
// mutation is serialized through one state lock; completions for a
// conversation the user has navigated away from are discarded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::Engine;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::error::{FetchError, SendError};
use crate::models::{ChatMessage, Contact};
use crate::pairing::crypto;
use crate::transport::{ClientBackend, CODE_NOT_FOUND, CODE_OK};

pub mod viewport;

pub use viewport::Viewport;

/// Maximum message body length in characters
pub const MAX_BODY_CHARS: usize = 250;

/// Default viewport height handed to new conversations, in display units
const DEFAULT_VIEWPORT_HEIGHT: f32 = 480.0;

/// What a guarded history fetch resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A page merged into the buffer; carries the number of new messages
    Applied(usize),
    /// The oldest-history boundary; reported exactly once per cursor
    Exhausted,
    /// A fetch for this (contact, cursor) is in flight or already resolved
    /// exhausted; no network call was made
    Skipped,
    /// The page completed after the conversation stopped being active and
    /// was thrown away
    Discarded,
}

struct Conversation {
    /// Ascending by id, no duplicates
    messages: Vec<ChatMessage>,
    has_more: bool,
    in_flight: HashSet<u64>,
    exhausted: HashSet<u64>,
    viewport: Viewport,
}

impl Conversation {
    fn new() -> Self {
        Conversation {
            messages: Vec::new(),
            has_more: true,
            in_flight: HashSet::new(),
            exhausted: HashSet::new(),
            viewport: Viewport::new(DEFAULT_VIEWPORT_HEIGHT),
        }
    }

    /// Merge by final id order, never by arrival order: a live message
    /// racing a backfill for an overlapping range lands in the right place
    /// and duplicates collapse.
    fn merge(&mut self, incoming: Vec<ChatMessage>) -> usize {
        let before = self.messages.len();
        self.messages.extend(incoming);
        self.messages.sort_by_key(|m| m.id);
        self.messages.dedup_by_key(|m| m.id);
        self.messages.len() - before
    }

    fn oldest_id(&self) -> Option<u64> {
        self.messages.first().map(|m| m.id)
    }
}

struct SyncState {
    active: Option<String>,
    conversations: HashMap<String, Conversation>,
}

pub struct MessageSyncEngine {
    backend: Arc<dyn ClientBackend>,
    state: Arc<Mutex<SyncState>>,
}

/// Scoped live-delivery subscription for one conversation.
///
/// Returned by [`MessageSyncEngine::subscribe`]; the engine only applies
/// live events for the subscribed conversation. `release` is the explicit,
/// deterministic teardown invoked when the active conversation changes.
pub struct Subscription {
    contact_id: String,
    state: Arc<Mutex<SyncState>>,
    released: bool,
}

impl Subscription {
    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }

    pub async fn release(mut self) {
        let mut state = self.state.lock().await;
        if state.active.as_deref() == Some(self.contact_id.as_str()) {
            state.active = None;
        }
        self.released = true;
        debug!("released subscription for {}", self.contact_id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "subscription for {} dropped without release",
                self.contact_id
            );
        }
    }
}

impl MessageSyncEngine {
    pub fn new(backend: Arc<dyn ClientBackend>) -> Self {
        MessageSyncEngine {
            backend,
            state: Arc::new(Mutex::new(SyncState {
                active: None,
                conversations: HashMap::new(),
            })),
        }
    }

    /// Make `contact_id` the live conversation and hand out the release
    /// handle. Only one conversation is live at a time; the caller releases
    /// the previous handle before subscribing anew.
    pub async fn subscribe(&self, contact_id: &str) -> Subscription {
        let mut state = self.state.lock().await;
        state.active = Some(contact_id.to_string());
        state
            .conversations
            .entry(contact_id.to_string())
            .or_insert_with(Conversation::new);
        debug!("subscribed to conversation {}", contact_id);

        Subscription {
            contact_id: contact_id.to_string(),
            state: Arc::clone(&self.state),
            released: false,
        }
    }

    pub async fn is_active(&self, contact_id: &str) -> bool {
        self.state.lock().await.active.as_deref() == Some(contact_id)
    }

    /// Snapshot of a conversation's buffer, ascending by id
    pub async fn messages(&self, contact_id: &str) -> Vec<ChatMessage> {
        let state = self.state.lock().await;
        state
            .conversations
            .get(contact_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Oldest loaded id and whether older history may exist; the directory
    /// mirrors this on the contact entry.
    pub async fn sync_progress(&self, contact_id: &str) -> (Option<u64>, bool) {
        let state = self.state.lock().await;
        state
            .conversations
            .get(contact_id)
            .map(|c| (c.oldest_id(), c.has_more))
            .unwrap_or((None, true))
    }

    pub async fn set_viewport_height(&self, contact_id: &str, height: f32) {
        let mut state = self.state.lock().await;
        if let Some(conv) = state.conversations.get_mut(contact_id) {
            conv.viewport.resize(height);
        }
    }

    pub async fn viewport(&self, contact_id: &str) -> Option<Viewport> {
        let state = self.state.lock().await;
        state.conversations.get(contact_id).map(|c| c.viewport)
    }

    /// Fetch messages older than `cursor` (0 requests the newest page).
    ///
    /// Guarded per (contact, cursor): a pair that is in flight or already
    /// resolved exhausted is skipped without a network call. The exhausted
    /// sentinel is a 404 envelope; an empty 200 page is mapped to the same
    /// outcome at this boundary so callers see a single convention.
    pub async fn get_messages(
        &self,
        contact_id: &str,
        cursor: u64,
    ) -> Result<FetchOutcome, FetchError> {
        {
            let mut state = self.state.lock().await;
            let conv = state
                .conversations
                .entry(contact_id.to_string())
                .or_insert_with(Conversation::new);
            if conv.in_flight.contains(&cursor) || conv.exhausted.contains(&cursor) {
                debug!("skipping duplicate fetch for {} @ {}", contact_id, cursor);
                return Ok(FetchOutcome::Skipped);
            }
            conv.in_flight.insert(cursor);
        }

        let result = self.backend.get_messages(contact_id, cursor).await;

        let mut state = self.state.lock().await;
        let active = state.active.clone();
        let conv = state
            .conversations
            .entry(contact_id.to_string())
            .or_insert_with(Conversation::new);
        conv.in_flight.remove(&cursor);

        let envelope = match result {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("history fetch for {} failed: {}", contact_id, e);
                return Err(FetchError::Transport(e.to_string()));
            }
        };

        // Stale-response suppression: the page no longer targets the active
        // conversation. The cursor stays fetchable for a later reopen.
        if active.as_deref() != Some(contact_id) {
            debug!(
                "discarding stale history page for {} @ {}",
                contact_id, cursor
            );
            return Ok(FetchOutcome::Discarded);
        }

        match envelope.code {
            CODE_NOT_FOUND => {
                // The newest page (cursor 0) can gain messages later, so
                // only real history cursors are latched as exhausted
                if cursor != 0 {
                    conv.exhausted.insert(cursor);
                }
                conv.has_more = false;
                debug!("history exhausted for {} @ {}", contact_id, cursor);
                Ok(FetchOutcome::Exhausted)
            }
            CODE_OK if envelope.data.is_empty() => {
                if cursor != 0 {
                    conv.exhausted.insert(cursor);
                }
                conv.has_more = false;
                Ok(FetchOutcome::Exhausted)
            }
            CODE_OK => {
                let added = conv.merge(envelope.data);
                conv.has_more = true;
                if cursor == 0 {
                    conv.viewport.on_appended(added);
                    conv.viewport.scroll_to_bottom();
                } else {
                    conv.viewport.on_prepended(added);
                }
                debug!("merged {} message(s) for {} @ {}", added, contact_id, cursor);
                Ok(FetchOutcome::Applied(added))
            }
            other => {
                warn!("history fetch for {} answered {}", contact_id, other);
                Err(FetchError::Transport(format!("unknown status {}", other)))
            }
        }
    }

    /// Validate, seal and send a message body.
    ///
    /// Length outside 1..=250 characters rejects synchronously without any
    /// network call. A delivered message is appended to that conversation's
    /// history exactly once, whether or not it is still the active one; a
    /// failed send appends nothing so the input can be retried.
    pub async fn send_message(
        &self,
        contact: &Contact,
        body: &str,
    ) -> Result<ChatMessage, SendError> {
        let chars = body.chars().count();
        if chars == 0 || chars > MAX_BODY_CHARS {
            return Err(SendError::InvalidLength(chars));
        }

        let sealed = crypto::seal(contact.shared_key(), body.as_bytes()).map_err(|e| {
            warn!("sealing message for {} failed: {}", contact.id, e);
            SendError::Transport(e.to_string())
        })?;
        let ciphertext = base64::engine::general_purpose::STANDARD.encode(sealed);

        let envelope = self
            .backend
            .send_message(&contact.id, &ciphertext)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        match envelope.code {
            CODE_OK => {
                let message = envelope.data;
                let mut state = self.state.lock().await;
                let conv = state
                    .conversations
                    .entry(contact.id.clone())
                    .or_insert_with(Conversation::new);
                let added = conv.merge(vec![message.clone()]);
                if added > 0 {
                    conv.viewport.on_appended(added);
                }
                info!("sent message {} to {}", message.id, contact.id);
                Ok(message)
            }
            CODE_NOT_FOUND => Err(SendError::PeerOffline),
            other => {
                warn!("send to {} answered {}", contact.id, other);
                Err(SendError::Transport(format!("unknown status {}", other)))
            }
        }
    }

    /// Apply a live `msg:new` event. Returns true when the message was
    /// merged into the live conversation; false when `peer_id` is not the
    /// subscribed conversation (the caller routes it to the unread path).
    pub async fn append_live(&self, peer_id: &str, message: ChatMessage) -> bool {
        let mut state = self.state.lock().await;
        if state.active.as_deref() != Some(peer_id) {
            return false;
        }

        let conv = state
            .conversations
            .entry(peer_id.to_string())
            .or_insert_with(Conversation::new);
        let added = conv.merge(vec![message]);
        if added > 0 {
            conv.viewport.on_appended(added);
        } else {
            debug!("duplicate live message for {} ignored", peer_id);
        }
        true
    }

    /// The user scrolled the conversation view. When the top boundary is
    /// reached and older history may exist, trigger a guarded backfill with
    /// the oldest loaded id as cursor.
    pub async fn on_scroll(
        &self,
        contact_id: &str,
        scroll_top: f32,
    ) -> Result<Option<FetchOutcome>, FetchError> {
        let cursor = {
            let mut state = self.state.lock().await;
            let Some(conv) = state.conversations.get_mut(contact_id) else {
                return Ok(None);
            };
            conv.viewport.set_scroll_top(scroll_top);
            if conv.viewport.is_at_top() && conv.has_more {
                conv.oldest_id()
            } else {
                None
            }
        };

        match cursor {
            Some(cursor) => Ok(Some(self.get_messages(contact_id, cursor).await?)),
            None => Ok(None),
        }
    }
}
