// Contact directory for parley
//
// Owns the list of known contacts, per-contact unread counters and the
// debounced search. Search results and listings are key-free cards; the
// shared keys never leave the directory's entries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::models::{Contact, ContactCard, ContactEntry, SharedKey, SHARED_KEY_SIZE};
use crate::transport::ClientBackend;

/// Quiet period before a search term is evaluated
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Cancellable one-shot timer owned by the directory. Scheduling replaces
/// the pending evaluation, so only the last of a burst of rapid calls
/// survives.
pub struct SearchDebouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl SearchDebouncer {
    pub fn new(delay: Duration) -> Self {
        SearchDebouncer {
            delay,
            pending: None,
        }
    }

    pub fn schedule<F>(&mut self, evaluate: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(old) = self.pending.take() {
            old.abort();
        }
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            evaluate.await;
        }));
    }

}

pub struct ContactDirectory {
    backend: Arc<dyn ClientBackend>,
    entries: Arc<Mutex<Vec<ContactEntry>>>,
    active: Mutex<Option<String>>,
    debouncer: Mutex<SearchDebouncer>,
    results_tx: mpsc::Sender<Vec<ContactCard>>,
}

impl ContactDirectory {
    /// Create the directory and the channel its search results arrive on
    pub fn new(backend: Arc<dyn ClientBackend>) -> (Self, mpsc::Receiver<Vec<ContactCard>>) {
        let (results_tx, results_rx) = mpsc::channel(16);
        (
            ContactDirectory {
                backend,
                entries: Arc::new(Mutex::new(Vec::new())),
                active: Mutex::new(None),
                debouncer: Mutex::new(SearchDebouncer::new(SEARCH_DEBOUNCE)),
                results_tx,
            },
            results_rx,
        )
    }

    /// Initial snapshot from the persistence collaborator
    pub async fn load_contacts(&self) -> anyhow::Result<usize> {
        let envelope = self.backend.get_contacts().await?;
        if !envelope.is_ok() {
            anyhow::bail!("contact load answered {}", envelope.code);
        }

        let mut loaded = Vec::new();
        for record in envelope.data {
            let raw = base64::engine::general_purpose::STANDARD.decode(&record.shared_key)?;
            let bytes: [u8; SHARED_KEY_SIZE] = raw
                .try_into()
                .map_err(|_| anyhow::anyhow!("stored key for {} has wrong length", record.id))?;
            loaded.push(ContactEntry::new(Contact::new(
                record.id,
                record.username,
                SharedKey::from_bytes(bytes),
            )));
        }

        let count = loaded.len();
        *self.entries.lock().await = loaded;
        info!("loaded {} contact(s)", count);
        Ok(count)
    }

    /// Direct access to the entries, for callers that need the contact
    /// itself (sending borrows the shared key in place)
    pub async fn entries(&self) -> MutexGuard<'_, Vec<ContactEntry>> {
        self.entries.lock().await
    }

    /// Key-free listing of all entries
    pub async fn contacts(&self) -> Vec<ContactCard> {
        let entries = self.entries.lock().await;
        entries.iter().map(|e| e.card()).collect()
    }

    /// Schedule a debounced search; the result arrives on the results
    /// channel after the quiet period, unless a newer call replaces it.
    pub async fn search(&self, term: &str) {
        let entries = Arc::clone(&self.entries);
        let tx = self.results_tx.clone();
        let term = term.to_string();

        let mut debouncer = self.debouncer.lock().await;
        debouncer.schedule(async move {
            let entries = entries.lock().await;
            let cards = filter_entries(&entries, &term);
            debug!("search '{}' matched {} entr(ies)", term, cards.len());
            if tx.send(cards).await.is_err() {
                warn!("search result dropped: receiver gone");
            }
        });
    }

    /// Make `contact_id` the active conversation; its unread counter resets
    /// to 0 exactly now and stays 0 while active.
    pub async fn open_conversation(&self, contact_id: &str) {
        *self.active.lock().await = Some(contact_id.to_string());
        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|e| e.contact.id == contact_id) {
            Some(entry) => entry.reset_unread(),
            None => warn!("opened conversation with unknown contact {}", contact_id),
        }
    }

    pub async fn clear_active(&self) {
        *self.active.lock().await = None;
    }

    pub async fn active(&self) -> Option<String> {
        self.active.lock().await.clone()
    }

    /// A pairing handshake completed; append the new contact with a clean
    /// unread counter. Duplicate ids are ignored.
    pub async fn on_pair_new(&self, contact: Contact) {
        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.contact.id == contact.id) {
            warn!("contact {} already in directory, ignoring", contact.id);
            return;
        }
        info!("new contact added: {} ({})", contact.username, contact.id);
        entries.push(ContactEntry::new(contact));
    }

    /// A message arrived for `peer_id`. Increments unread only while that
    /// conversation is not active; returns whether a counter changed.
    pub async fn on_msg_new(&self, peer_id: &str) -> bool {
        if self.active.lock().await.as_deref() == Some(peer_id) {
            return false;
        }
        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|e| e.contact.id == peer_id) {
            Some(entry) => {
                entry.increment_unread();
                true
            }
            None => {
                warn!("message event for unknown contact {}", peer_id);
                false
            }
        }
    }

    /// Mirror the sync engine's pagination state onto the entry
    pub async fn record_sync_progress(
        &self,
        contact_id: &str,
        cursor: Option<u64>,
        has_more: bool,
    ) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.contact.id == contact_id) {
            entry.last_sync_cursor = cursor;
            entry.has_more_history = has_more;
        }
    }
}

/// Case-insensitive substring match over username or id; a blank term
/// matches everything.
pub fn filter_entries(entries: &[ContactEntry], term: &str) -> Vec<ContactCard> {
    let needle = term.trim().to_lowercase();
    entries
        .iter()
        .filter(|e| {
            needle.is_empty()
                || e.contact.username.to_lowercase().contains(&needle)
                || e.contact.id.to_lowercase().contains(&needle)
        })
        .map(|e| e.card())
        .collect()
}
