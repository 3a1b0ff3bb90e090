// Pairing coordinator for parley
//
// Owns the outstanding pairing code (issuer side) and drives the
// key-exchange handshake (requester side). The 6-digit code is an
// out-of-band authenticator for the X25519 exchange, not the encryption
// key itself: the peer only answers with its public key when the human
// entered the code the issuer is currently showing.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::PairError;
use crate::models::{Contact, LocalIdentity, PeerCandidate};
use crate::transport::{
    ClientBackend, IssuedCode, PairRequest, PairResponse, PushEvent, CODE_NOT_FOUND, CODE_OK,
    CODE_UNAUTHORIZED,
};

pub mod crypto;

/// Pairing codes are exactly this many ASCII digits
pub const CODE_LEN: usize = 6;

/// Default time to live for an issued code
pub const CODE_TTL_SECS: u64 = 60;

/// Lifecycle of the issuer-side code slot.
///
/// `Issued -> Expired` when the countdown fires, `Issued -> Consumed` when a
/// valid request arrives first; both are terminal for that code. Generating
/// again while `Issued` supersedes the old code, which is invalid from that
/// instant even if unexpired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeState {
    Idle,
    Issued,
    Consumed,
    Expired,
}

struct OutstandingCode {
    value: String,
    issued_at: Instant,
    ttl: Duration,
}

struct CodeSlot {
    generation: u64,
    state: CodeState,
    code: Option<OutstandingCode>,
}

pub struct PairingCoordinator {
    backend: Arc<dyn ClientBackend>,
    identity: Arc<LocalIdentity>,
    slot: Arc<Mutex<CodeSlot>>,
    countdown: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::Sender<PushEvent>,
    ttl: Duration,
}

impl PairingCoordinator {
    pub fn new(
        backend: Arc<dyn ClientBackend>,
        identity: Arc<LocalIdentity>,
        events_tx: mpsc::Sender<PushEvent>,
    ) -> Self {
        PairingCoordinator {
            backend,
            identity,
            slot: Arc::new(Mutex::new(CodeSlot {
                generation: 0,
                state: CodeState::Idle,
                code: None,
            })),
            countdown: Mutex::new(None),
            events_tx,
            ttl: Duration::from_secs(CODE_TTL_SECS),
        }
    }

    /// Current issuer-side state
    pub async fn code_state(&self) -> CodeState {
        self.slot.lock().await.state
    }

    /// Issue a fresh single-use pairing code and arm its countdown.
    ///
    /// Any previously outstanding code is superseded immediately: its timer
    /// is aborted before the new one is armed, so no two countdowns ever
    /// run at once.
    pub async fn generate_code(&self) -> Result<IssuedCode, PairError> {
        let envelope = self
            .backend
            .generate_code()
            .await
            .map_err(|e| PairError::Transport(e.to_string()))?;
        if !envelope.is_ok() {
            return Err(PairError::Transport(format!(
                "code generation answered {}",
                envelope.code
            )));
        }
        let issued = envelope.data;

        let generation = {
            let mut slot = self.slot.lock().await;
            if slot.state == CodeState::Issued {
                info!("superseding outstanding pairing code");
            }
            slot.generation += 1;
            slot.state = CodeState::Issued;
            slot.code = Some(OutstandingCode {
                value: issued.code.clone(),
                issued_at: Instant::now(),
                ttl: self.ttl,
            });
            slot.generation
        };

        let slot = Arc::clone(&self.slot);
        let ttl = self.ttl;
        // Pin the deadline to issuance time so the countdown does not depend
        // on when the spawned task is first polled (matters under a paused
        // test clock).
        let deadline = Instant::now() + ttl;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut slot = slot.lock().await;
            // A superseded or consumed code must not be expired by a stale timer
            if slot.generation == generation && slot.state == CodeState::Issued {
                slot.state = CodeState::Expired;
                info!("pairing code expired after {}s", ttl.as_secs());
            }
        });

        let mut countdown = self.countdown.lock().await;
        if let Some(old) = countdown.replace(handle) {
            old.abort();
        }

        info!("issued pairing code, valid for {}s", issued.ttl_secs);
        Ok(issued)
    }

    /// Scan the local network for peers advertising the chat service.
    ///
    /// Failures are reported in the log and surface as an empty snapshot;
    /// the caller retries by scanning again.
    pub async fn scan_peers(&self) -> Vec<PeerCandidate> {
        match self.backend.scan_peers().await {
            Ok(envelope) if envelope.is_ok() => {
                debug!("discovery scan found {} peer(s)", envelope.data.len());
                envelope.data
            }
            Ok(envelope) => {
                warn!("discovery scan answered {}", envelope.code);
                Vec::new()
            }
            Err(e) => {
                warn!("discovery scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Requester side of the handshake: send our identity, the entered code
    /// and our public key; derive the shared key from the peer's answer.
    pub async fn request_pairing(
        &self,
        peer: &PeerCandidate,
        code: &str,
    ) -> Result<Contact, PairError> {
        // Local validation; a malformed code never reaches the network
        if !crypto::is_valid_code_format(code) {
            return Err(PairError::MalformedCode);
        }

        let req = PairRequest {
            id: self.identity.id.clone(),
            username: self.identity.username.clone(),
            code: code.to_string(),
            pubkey: base64::engine::general_purpose::STANDARD.encode(&self.identity.public_key),
        };

        let envelope = self
            .backend
            .request_pairing(peer, &req)
            .await
            .map_err(|e| PairError::Transport(e.to_string()))?;

        match envelope.code {
            CODE_OK => {
                let peer_public = base64::engine::general_purpose::STANDARD
                    .decode(&envelope.data.pubkey)
                    .map_err(|e| PairError::Handshake(format!("bad peer public key: {}", e)))?;
                let shared = crypto::derive_shared_key(&self.identity.secret_key, &peer_public)
                    .map_err(|e| PairError::Handshake(e.to_string()))?;

                info!(
                    "paired with {} ({}), key fingerprint {}",
                    peer.username,
                    peer.id,
                    shared.fingerprint()
                );
                Ok(Contact::new(peer.id.clone(), peer.username.clone(), shared))
            }
            CODE_UNAUTHORIZED => Err(PairError::InvalidCode),
            CODE_NOT_FOUND => Err(PairError::PeerUnreachable),
            other => Err(PairError::Transport(format!(
                "pairing answered unknown status {}",
                other
            ))),
        }
    }

    /// Issuer side of the handshake: validate the presented code against the
    /// outstanding one, consume it, and answer with our public key.
    ///
    /// A wrong, expired, superseded or already-consumed code rejects with
    /// `InvalidCode`; nothing is mutated and no `pair:new` fires on failure.
    pub async fn handle_pair_request(&self, req: &PairRequest) -> Result<PairResponse, PairError> {
        let mut slot = self.slot.lock().await;

        match slot.state {
            CodeState::Issued => {}
            _ => {
                debug!("pairing attempt with no live code ({:?})", slot.state);
                return Err(PairError::InvalidCode);
            }
        }

        let outstanding = slot.code.as_ref().ok_or(PairError::InvalidCode)?;
        if outstanding.issued_at.elapsed() > outstanding.ttl {
            slot.state = CodeState::Expired;
            debug!("pairing attempt against expired code");
            return Err(PairError::InvalidCode);
        }
        if outstanding.value != req.code {
            debug!("pairing attempt with wrong code");
            return Err(PairError::InvalidCode);
        }

        // Derive before consuming so a bad handshake leaves the code live
        let requester_public = base64::engine::general_purpose::STANDARD
            .decode(&req.pubkey)
            .map_err(|e| PairError::Handshake(format!("bad requester public key: {}", e)))?;
        let shared = crypto::derive_shared_key(&self.identity.secret_key, &requester_public)
            .map_err(|e| PairError::Handshake(e.to_string()))?;

        // Consumed atomically on the first successful attempt; terminal
        slot.state = CodeState::Consumed;
        slot.code = None;
        drop(slot);

        let mut countdown = self.countdown.lock().await;
        if let Some(handle) = countdown.take() {
            handle.abort();
        }
        drop(countdown);

        let contact = Contact::new(req.id.clone(), req.username.clone(), shared);
        info!("pairing completed with {} ({})", contact.username, contact.id);

        if let Err(e) = self.events_tx.send(PushEvent::PairNew(contact)).await {
            warn!("nobody listening for pair:new: {}", e);
        }

        Ok(PairResponse {
            pubkey: base64::engine::general_purpose::STANDARD.encode(&self.identity.public_key),
        })
    }
}
