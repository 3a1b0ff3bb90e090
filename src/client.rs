// Owning coordinator for the parley client core.
//
// ChatClient owns the pairing coordinator, the contact directory, the sync
// engine, the single active conversation and its live subscription. All
// state transitions go through its methods on one logical thread; push
// events and request completions are serialized here.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::directory::ContactDirectory;
use crate::error::{FetchError, PairError, SendError};
use crate::models::{ChatMessage, ContactCard, LocalIdentity, PeerCandidate};
use crate::pairing::PairingCoordinator;
use crate::sync::{FetchOutcome, MessageSyncEngine, Subscription};
use crate::transport::{ClientBackend, PushEvent};

pub struct ChatClient {
    pub pairing: PairingCoordinator,
    pub directory: ContactDirectory,
    pub sync: MessageSyncEngine,
    subscription: Option<Subscription>,
    events_tx: mpsc::Sender<PushEvent>,
    events_rx: mpsc::Receiver<PushEvent>,
}

impl ChatClient {
    /// Build the client core over a backend. Also returns the receiver for
    /// debounced search results.
    pub fn new(
        backend: Arc<dyn ClientBackend>,
        identity: LocalIdentity,
    ) -> (Self, mpsc::Receiver<Vec<ContactCard>>) {
        let identity = Arc::new(identity);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (directory, search_rx) = ContactDirectory::new(Arc::clone(&backend));
        let pairing =
            PairingCoordinator::new(Arc::clone(&backend), identity, events_tx.clone());
        let sync = MessageSyncEngine::new(backend);

        (
            ChatClient {
                pairing,
                directory,
                sync,
                subscription: None,
                events_tx,
                events_rx,
            },
            search_rx,
        )
    }

    /// Handle for collaborators that push `pair:new` / `msg:new`
    pub fn event_sender(&self) -> mpsc::Sender<PushEvent> {
        self.events_tx.clone()
    }

    /// Load the initial contact snapshot; failures are logged and the
    /// client starts with an empty directory.
    pub async fn startup(&self) {
        match self.directory.load_contacts().await {
            Ok(count) => debug!("startup loaded {} contact(s)", count),
            Err(e) => warn!("initial contact load failed: {}", e),
        }
    }

    /// Requester-side pairing: run the handshake and insert the resulting
    /// contact. Nothing is inserted when any step fails.
    pub async fn pair_with(
        &self,
        peer: &PeerCandidate,
        code: &str,
    ) -> Result<ContactCard, PairError> {
        let contact = self.pairing.request_pairing(peer, code).await?;
        let card = ContactCard {
            id: contact.id.clone(),
            username: contact.username.clone(),
            unread: 0,
        };
        self.directory.on_pair_new(contact).await;
        Ok(card)
    }

    /// Switch the active conversation: release the previous subscription,
    /// reset the unread counter, subscribe, and fetch the newest page.
    pub async fn open_conversation(
        &mut self,
        contact_id: &str,
    ) -> Result<FetchOutcome, FetchError> {
        if let Some(old) = self.subscription.take() {
            old.release().await;
        }

        self.directory.open_conversation(contact_id).await;
        self.subscription = Some(self.sync.subscribe(contact_id).await);
        info!("opened conversation with {}", contact_id);

        let outcome = self.sync.get_messages(contact_id, 0).await?;
        let (cursor, has_more) = self.sync.sync_progress(contact_id).await;
        self.directory
            .record_sync_progress(contact_id, cursor, has_more)
            .await;
        Ok(outcome)
    }

    /// Leave the current conversation, releasing its subscription
    pub async fn close_conversation(&mut self) {
        if let Some(old) = self.subscription.take() {
            old.release().await;
        }
        self.directory.clear_active().await;
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.contact_id())
    }

    /// Send a message to a known contact, borrowing its key in place
    pub async fn send_message(
        &self,
        contact_id: &str,
        body: &str,
    ) -> Result<ChatMessage, SendError> {
        let entries = self.directory.entries().await;
        let entry = entries
            .iter()
            .find(|e| e.contact.id == contact_id)
            .ok_or_else(|| SendError::Transport(format!("unknown contact {}", contact_id)))?;
        self.sync.send_message(&entry.contact, body).await
    }

    /// The conversation view scrolled; forward to the engine and mirror the
    /// pagination state onto the directory entry.
    pub async fn scrolled(
        &self,
        contact_id: &str,
        scroll_top: f32,
    ) -> Result<Option<FetchOutcome>, FetchError> {
        let outcome = self.sync.on_scroll(contact_id, scroll_top).await?;
        if outcome.is_some() {
            let (cursor, has_more) = self.sync.sync_progress(contact_id).await;
            self.directory
                .record_sync_progress(contact_id, cursor, has_more)
                .await;
        }
        Ok(outcome)
    }

    /// Route one push notification
    pub async fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::PairNew(contact) => self.directory.on_pair_new(contact).await,
            PushEvent::MsgNew { peer_id, message } => {
                if !self.sync.append_live(&peer_id, message).await {
                    self.directory.on_msg_new(&peer_id).await;
                }
            }
        }
    }

    /// Drain every queued push event onto this thread
    pub async fn pump_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_push(event).await;
        }
    }
}
