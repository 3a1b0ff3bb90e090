// Common test utilities for integration tests
// Shared setup for the pairing, sync and directory test suites

use std::sync::Arc;
use std::sync::Once;

use log::LevelFilter;
use tokio::sync::mpsc;

use parley::models::{ContactCard, LocalIdentity};
use parley::pairing::crypto;
use parley::transport::MemoryBackend;
use parley::ChatClient;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// A fresh local identity with a real handshake keypair
pub fn test_identity(username: &str) -> LocalIdentity {
    let (secret_key, public_key) = crypto::generate_keypair();
    LocalIdentity::new(
        uuid::Uuid::new_v4().to_string(),
        username,
        secret_key,
        public_key,
    )
}

/// Build a client over a fresh in-memory backend
pub fn test_client(
    username: &str,
) -> (
    ChatClient,
    Arc<MemoryBackend>,
    mpsc::Receiver<Vec<ContactCard>>,
) {
    setup_logging();
    let identity = test_identity(username);
    let backend = Arc::new(MemoryBackend::new(identity.id.clone()));
    let (client, search_rx) = ChatClient::new(backend.clone(), identity);
    (client, backend, search_rx)
}

/// Build a client already paired with the simulated remote peer; returns
/// the new contact's card alongside.
pub async fn paired_client(
    username: &str,
) -> (
    ChatClient,
    Arc<MemoryBackend>,
    ContactCard,
    mpsc::Receiver<Vec<ContactCard>>,
) {
    let (client, backend, search_rx) = test_client(username);

    let peer = backend.remote_candidate().await;
    backend.set_remote_code("482913").await;
    let card = client
        .pair_with(&peer, "482913")
        .await
        .expect("pairing with the simulated peer");

    (client, backend, card, search_rx)
}
