// Core data model for parley
// Shared between the pairing, sync and directory modules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Length of the symmetric key derived by the pairing handshake (256 bits)
pub const SHARED_KEY_SIZE: usize = 32;

/// Symmetric secret derived once per contact via the pairing handshake.
///
/// Deliberately not `Clone`: the key is set exactly once at handshake
/// completion and owned by the `Contact` it was derived for. Memory is
/// zeroed on drop.
pub struct SharedKey([u8; SHARED_KEY_SIZE]);

impl SharedKey {
    pub fn from_bytes(bytes: [u8; SHARED_KEY_SIZE]) -> Self {
        SharedKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_SIZE] {
        &self.0
    }

    /// Short hex fingerprint for logging, never the full key
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Drop for SharedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey({}..)", self.fingerprint())
    }
}

impl PartialEq for SharedKey {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison, same approach as the crypto module
        let mut diff = 0u8;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

/// A peer known through a completed pairing handshake
#[derive(Debug)]
pub struct Contact {
    pub id: String,
    pub username: String,
    shared_key: SharedKey,
}

impl Contact {
    pub fn new(id: impl Into<String>, username: impl Into<String>, shared_key: SharedKey) -> Self {
        Contact {
            id: id.into(),
            username: username.into(),
            shared_key,
        }
    }

    /// The established shared secret. There is no setter; the key is
    /// immutable after pairing.
    pub fn shared_key(&self) -> &SharedKey {
        &self.shared_key
    }
}

/// A peer seen on the local network during a discovery scan.
/// Transient: scan results are immutable snapshots replaced wholesale,
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerCandidate {
    pub id: String,
    pub username: String,
    pub address: String,
}

/// A single message within one conversation.
///
/// `id` is a strictly increasing per-conversation sequence number and doubles
/// as the backward-pagination cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub sender: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Directory entry for one contact
#[derive(Debug)]
pub struct ContactEntry {
    pub contact: Contact,
    unread: u64,
    pub last_sync_cursor: Option<u64>,
    pub has_more_history: bool,
}

/// Rendering cap for the unread badge; the internal counter is not capped
pub const UNREAD_DISPLAY_CAP: u64 = 99;

impl ContactEntry {
    pub fn new(contact: Contact) -> Self {
        ContactEntry {
            contact,
            unread: 0,
            last_sync_cursor: None,
            has_more_history: true,
        }
    }

    pub fn unread(&self) -> u64 {
        self.unread
    }

    /// Unread count as shown in the contact list (capped at 99)
    pub fn display_unread(&self) -> u64 {
        self.unread.min(UNREAD_DISPLAY_CAP)
    }

    pub(crate) fn increment_unread(&mut self) {
        self.unread += 1;
    }

    pub(crate) fn reset_unread(&mut self) {
        self.unread = 0;
    }

    /// Key-free projection for listings and search results
    pub fn card(&self) -> ContactCard {
        ContactCard {
            id: self.contact.id.clone(),
            username: self.contact.username.clone(),
            unread: self.display_unread(),
        }
    }
}

/// What the contact list renders: everything about an entry except the key
#[derive(Debug, Clone, PartialEq)]
pub struct ContactCard {
    pub id: String,
    pub username: String,
    pub unread: u64,
}

/// The local user's identity: profile plus the static X25519 keypair used
/// for pairing handshakes.
pub struct LocalIdentity {
    pub id: String,
    pub username: String,
    pub secret_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl LocalIdentity {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        secret_key: Vec<u8>,
        public_key: Vec<u8>,
    ) -> Self {
        LocalIdentity {
            id: id.into(),
            username: username.into(),
            secret_key,
            public_key,
        }
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("id", &self.id)
            .field("username", &self.username)
            .finish()
    }
}
