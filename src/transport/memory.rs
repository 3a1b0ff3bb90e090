// In-memory ClientBackend simulating a single remote peer.
//
// Used by the demo binary and the integration tests. The simulated peer
// owns its own X25519 keypair and a scriptable outstanding pairing code, so
// the full requester-side handshake can run against it; message stores keep
// sealed bodies at rest and decrypt at the boundary, the way the real
// storage collaborator does.

use std::collections::{HashMap, HashSet};

use base64::Engine;
use chrono::Utc;
use log::{debug, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{ChatMessage, PeerCandidate, SharedKey, SHARED_KEY_SIZE};
use crate::pairing::crypto;
use crate::pairing::CODE_TTL_SECS;

use super::{
    ClientBackend, ContactRecord, Envelope, IssuedCode, PairRequest, PairResponse, CODE_NOT_FOUND,
    CODE_UNAUTHORIZED,
};

/// Messages returned per history page
pub const PAGE_SIZE: usize = 20;

struct RemotePeer {
    id: String,
    username: String,
    secret_key: Vec<u8>,
    public_key: Vec<u8>,
}

#[derive(Default)]
struct BackendState {
    remote_code: Option<String>,
    peers: Vec<PeerCandidate>,
    contacts: Vec<ContactRecord>,
    /// The backend's own copy of each shared key, as the storage
    /// collaborator would hold it (keyed by contact id)
    keys: HashMap<String, [u8; SHARED_KEY_SIZE]>,
    /// Sealed bodies at rest, ascending by id
    histories: HashMap<String, Vec<StoredMessage>>,
    next_id: HashMap<String, u64>,
    offline: HashSet<String>,
    scan_failure: bool,
    fetch_calls: HashMap<(String, u64), usize>,
    send_calls: usize,
    fetch_delay: Option<std::time::Duration>,
}

struct StoredMessage {
    id: u64,
    sender: String,
    sealed: Vec<u8>,
    created_at: chrono::DateTime<Utc>,
}

pub struct MemoryBackend {
    local_id: String,
    remote: RemotePeer,
    state: Mutex<BackendState>,
}

impl MemoryBackend {
    pub fn new(local_id: impl Into<String>) -> Self {
        let (secret_key, public_key) = crypto::generate_keypair();
        let remote = RemotePeer {
            id: Uuid::new_v4().to_string(),
            username: "remote".to_string(),
            secret_key,
            public_key,
        };

        let mut state = BackendState::default();
        state.peers.push(PeerCandidate {
            id: remote.id.clone(),
            username: remote.username.clone(),
            address: "192.168.1.20:60606".to_string(),
        });

        MemoryBackend {
            local_id: local_id.into(),
            remote,
            state: Mutex::new(state),
        }
    }

    /// The simulated peer as a discovery scan would report it
    pub async fn remote_candidate(&self) -> PeerCandidate {
        let state = self.state.lock().await;
        state.peers[0].clone()
    }

    /// Script the code the simulated peer currently has outstanding
    pub async fn set_remote_code(&self, code: &str) {
        self.state.lock().await.remote_code = Some(code.to_string());
    }

    /// Install a shared key for a contact, as if pairing had completed
    pub async fn install_key(&self, contact_id: &str, key: [u8; SHARED_KEY_SIZE]) {
        self.state.lock().await.keys.insert(contact_id.to_string(), key);
    }

    pub async fn insert_contact_record(&self, record: ContactRecord) {
        self.state.lock().await.contacts.push(record);
    }

    pub async fn set_offline(&self, contact_id: &str, offline: bool) {
        let mut state = self.state.lock().await;
        if offline {
            state.offline.insert(contact_id.to_string());
        } else {
            state.offline.remove(contact_id);
        }
    }

    /// Make the next discovery scan fail at the transport level
    pub async fn fail_next_scan(&self) {
        self.state.lock().await.scan_failure = true;
    }

    /// How many times `send_message` reached this backend
    pub async fn send_count(&self) -> usize {
        self.state.lock().await.send_calls
    }

    /// Delay every subsequent `get_messages` by `delay`, so tests can
    /// interleave completions deterministically under paused time
    pub async fn set_fetch_delay(&self, delay: std::time::Duration) {
        self.state.lock().await.fetch_delay = Some(delay);
    }

    /// How many times `get_messages` was called for this (contact, cursor)
    pub async fn fetch_count(&self, contact_id: &str, cursor: u64) -> usize {
        let state = self.state.lock().await;
        state
            .fetch_calls
            .get(&(contact_id.to_string(), cursor))
            .copied()
            .unwrap_or(0)
    }

    /// Seed a conversation with messages from the peer, ids 1..=n
    pub async fn seed_history(&self, contact_id: &str, bodies: &[&str]) {
        let mut state = self.state.lock().await;
        let key = SharedKey::from_bytes(
            *state
                .keys
                .get(contact_id)
                .expect("install_key before seed_history"),
        );

        let history = state.histories.entry(contact_id.to_string()).or_default();
        for body in bodies {
            let id = history.last().map(|m| m.id + 1).unwrap_or(1);
            let sealed = crypto::seal(&key, body.as_bytes()).expect("seal seeded body");
            history.push(StoredMessage {
                id,
                sender: contact_id.to_string(),
                sealed,
                created_at: Utc::now(),
            });
        }
        let next = history.last().map(|m| m.id + 1).unwrap_or(1);
        state.next_id.insert(contact_id.to_string(), next);
    }

    /// Store an incoming message from the peer and return it in the shape
    /// the push channel carries (plaintext body, decrypted at the boundary).
    pub async fn push_incoming(&self, contact_id: &str, body: &str) -> ChatMessage {
        let mut state = self.state.lock().await;
        let key = SharedKey::from_bytes(
            *state
                .keys
                .get(contact_id)
                .expect("install_key before push_incoming"),
        );

        let id = *state
            .next_id
            .entry(contact_id.to_string())
            .and_modify(|n| *n += 1)
            .or_insert(2)
            - 1;
        let sealed = crypto::seal(&key, body.as_bytes()).expect("seal incoming body");
        let created_at = Utc::now();
        state
            .histories
            .entry(contact_id.to_string())
            .or_default()
            .push(StoredMessage {
                id,
                sender: contact_id.to_string(),
                sealed,
                created_at,
            });

        ChatMessage {
            id,
            sender: contact_id.to_string(),
            body: body.to_string(),
            created_at,
        }
    }
}

#[async_trait::async_trait]
impl ClientBackend for MemoryBackend {
    async fn generate_code(&self) -> anyhow::Result<Envelope<IssuedCode>> {
        Ok(Envelope::new(IssuedCode {
            code: crypto::generate_code_value(),
            ttl_secs: CODE_TTL_SECS,
        }))
    }

    async fn scan_peers(&self) -> anyhow::Result<Envelope<Vec<PeerCandidate>>> {
        let mut state = self.state.lock().await;
        if state.scan_failure {
            state.scan_failure = false;
            anyhow::bail!("mdns query timed out");
        }
        // Snapshot: replaced wholesale each scan, never mutated in place
        Ok(Envelope::new(state.peers.clone()))
    }

    async fn request_pairing(
        &self,
        peer: &PeerCandidate,
        req: &PairRequest,
    ) -> anyhow::Result<Envelope<PairResponse>> {
        let mut state = self.state.lock().await;

        if peer.id != self.remote.id || state.offline.contains(&peer.id) {
            return Ok(Envelope::new(PairResponse {
                pubkey: String::new(),
            })
            .status(CODE_NOT_FOUND));
        }

        let accepted = state.remote_code.as_deref() == Some(req.code.as_str());
        if !accepted {
            debug!("simulated peer rejected pairing code");
            return Ok(Envelope::new(PairResponse {
                pubkey: String::new(),
            })
            .status(CODE_UNAUTHORIZED));
        }
        // Single use: consumed on first success
        state.remote_code = None;

        let requester_pub = base64::engine::general_purpose::STANDARD
            .decode(&req.pubkey)
            .map_err(|e| anyhow::anyhow!("bad requester pubkey: {}", e))?;
        let key = crypto::derive_shared_key(&self.remote.secret_key, &requester_pub)
            .map_err(|e| anyhow::anyhow!("peer-side key agreement failed: {}", e))?;
        // The peer's copy of the key, stored under the requester's contact
        // id on its side; here we index by our own remote id because the
        // local client addresses this conversation by it.
        state.keys.insert(self.remote.id.clone(), *key.as_bytes());

        Ok(Envelope::new(PairResponse {
            pubkey: base64::engine::general_purpose::STANDARD.encode(&self.remote.public_key),
        }))
    }

    async fn get_contacts(&self) -> anyhow::Result<Envelope<Vec<ContactRecord>>> {
        let state = self.state.lock().await;
        Ok(Envelope::new(state.contacts.clone()))
    }

    async fn send_message(
        &self,
        contact_id: &str,
        ciphertext: &str,
    ) -> anyhow::Result<Envelope<ChatMessage>> {
        let mut state = self.state.lock().await;
        state.send_calls += 1;

        let placeholder = ChatMessage {
            id: 0,
            sender: self.local_id.clone(),
            body: String::new(),
            created_at: Utc::now(),
        };

        if state.offline.contains(contact_id) {
            return Ok(Envelope::new(placeholder).status(CODE_NOT_FOUND));
        }

        let Some(key_bytes) = state.keys.get(contact_id).copied() else {
            warn!("no shared key on record for {}", contact_id);
            return Ok(Envelope::new(placeholder).status(500));
        };
        let key = SharedKey::from_bytes(key_bytes);

        let sealed = base64::engine::general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|e| anyhow::anyhow!("bad ciphertext encoding: {}", e))?;
        let body = crypto::open(&key, &sealed)
            .map_err(|e| anyhow::anyhow!("could not open sealed body: {}", e))?;

        let id = *state
            .next_id
            .entry(contact_id.to_string())
            .and_modify(|n| *n += 1)
            .or_insert(2)
            - 1;
        let created_at = Utc::now();
        state
            .histories
            .entry(contact_id.to_string())
            .or_default()
            .push(StoredMessage {
                id,
                sender: self.local_id.clone(),
                sealed,
                created_at,
            });

        Ok(Envelope::new(ChatMessage {
            id,
            sender: self.local_id.clone(),
            body: String::from_utf8_lossy(&body).into_owned(),
            created_at,
        }))
    }

    async fn get_messages(
        &self,
        contact_id: &str,
        cursor: u64,
    ) -> anyhow::Result<Envelope<Vec<ChatMessage>>> {
        let delay = self.state.lock().await.fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        *state
            .fetch_calls
            .entry((contact_id.to_string(), cursor))
            .or_insert(0) += 1;

        let key = state.keys.get(contact_id).copied().map(SharedKey::from_bytes);

        let page: Vec<ChatMessage> = state
            .histories
            .get(contact_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|m| cursor == 0 || m.id < cursor)
                    .rev()
                    .take(PAGE_SIZE)
                    .map(|m| {
                        let body = key
                            .as_ref()
                            .and_then(|k| crypto::open(k, &m.sealed).ok())
                            .map(|b| String::from_utf8_lossy(&b).into_owned())
                            .unwrap_or_default();
                        ChatMessage {
                            id: m.id,
                            sender: m.sender.clone(),
                            body,
                            created_at: m.created_at,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        // Oldest-history boundary: the canonical exhausted sentinel
        if page.is_empty() {
            return Ok(Envelope::new(Vec::new()).status(CODE_NOT_FOUND));
        }

        let mut page = page;
        page.reverse(); // ascending by id within the page
        Ok(Envelope::new(page))
    }
}
