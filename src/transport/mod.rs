// Collaborator boundary for parley
//
// Everything peer-facing (discovery, pairing requests, message delivery,
// history storage) lives behind the ClientBackend trait. All calls exchange
// an Envelope { code, data }: 200 is success, 401 unauthorized, 404
// not-found/exhausted/offline, anything else an unknown failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Contact, PeerCandidate};

pub mod memory;

pub use memory::MemoryBackend;

pub const CODE_OK: u16 = 200;
pub const CODE_UNAUTHORIZED: u16 = 401;
pub const CODE_NOT_FOUND: u16 = 404;

/// Response envelope shared by every collaborator call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Envelope { code: CODE_OK, data }
    }

    pub fn status(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// A freshly issued pairing code and its time to live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCode {
    pub code: String,
    pub ttl_secs: u64,
}

/// Outbound pairing request: our identity, the human-entered code and our
/// public key, base64 on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequest {
    pub id: String,
    pub username: String,
    pub code: String,
    pub pubkey: String,
}

/// The peer's half of the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairResponse {
    pub pubkey: String,
}

/// A stored contact as the persistence collaborator returns it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: String,
    pub username: String,
    /// base64 of the raw shared key bytes
    pub shared_key: String,
}

/// Push notifications delivered by the collaborator onto the client's
/// event channel.
#[derive(Debug)]
pub enum PushEvent {
    /// A pairing handshake completed; carries the new contact
    PairNew(Contact),
    /// A message arrived for the conversation with `peer_id`
    MsgNew { peer_id: String, message: ChatMessage },
}

/// The narrow interface to everything outside the client core.
///
/// Implementations must be cancel-safe: the client may drop a call future
/// when the user navigates away.
#[async_trait]
pub trait ClientBackend: Send + Sync {
    /// Issue a fresh single-use pairing code
    async fn generate_code(&self) -> anyhow::Result<Envelope<IssuedCode>>;

    /// Scan the local network for peers advertising the chat service
    async fn scan_peers(&self) -> anyhow::Result<Envelope<Vec<PeerCandidate>>>;

    /// Deliver a pairing request to the peer at `peer.address`; 401 means
    /// the code was rejected, 404 means the peer could not be reached.
    async fn request_pairing(
        &self,
        peer: &PeerCandidate,
        req: &PairRequest,
    ) -> anyhow::Result<Envelope<PairResponse>>;

    /// Initial contact snapshot from the persistence collaborator
    async fn get_contacts(&self) -> anyhow::Result<Envelope<Vec<ContactRecord>>>;

    /// Deliver a sealed message body (base64 ciphertext) to the peer;
    /// 404 means the peer is offline.
    async fn send_message(
        &self,
        contact_id: &str,
        ciphertext: &str,
    ) -> anyhow::Result<Envelope<ChatMessage>>;

    /// Fetch messages older than `cursor` (0 requests the newest page),
    /// ascending by id within the page; 404 means no older history exists.
    async fn get_messages(
        &self,
        contact_id: &str,
        cursor: u64,
    ) -> anyhow::Result<Envelope<Vec<ChatMessage>>>;
}
