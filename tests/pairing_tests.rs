// Pairing handshake tests
// Cover the code lifecycle (issue, expire, supersede, consume) and both
// sides of the key exchange against the in-memory backend.

mod common;
use common::{paired_client, test_client, test_identity};

use std::time::Duration;

use base64::Engine;
use log::info;
use tokio::time::advance;

use parley::error::{ErrorKind, PairError};
use parley::pairing::{crypto, CodeState};
use parley::transport::PairRequest;

fn pair_request_from(identity: &parley::LocalIdentity, code: &str) -> PairRequest {
    PairRequest {
        id: identity.id.clone(),
        username: identity.username.clone(),
        code: code.to_string(),
        pubkey: base64::engine::general_purpose::STANDARD.encode(&identity.public_key),
    }
}

#[tokio::test]
async fn test_requester_pairing_succeeds() {
    let (client, _backend, card, _search_rx) = paired_client("alice").await;

    assert_eq!(card.username, "remote");
    assert_eq!(card.unread, 0);

    let contacts = client.directory.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].id, card.id);
}

#[tokio::test]
async fn test_malformed_code_is_rejected_before_the_network() {
    let (client, backend, _search_rx) = test_client("alice");
    let peer = backend.remote_candidate().await;
    backend.set_remote_code("482913").await;

    for code in ["", "12345", "1234567", "12a456", "482 13"] {
        let err = client.pair_with(&peer, code).await.unwrap_err();
        assert_eq!(err, PairError::MalformedCode);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    // The scripted code was never consumed, so a proper attempt still works
    assert!(client.pair_with(&peer, "482913").await.is_ok());
}

#[tokio::test]
async fn test_wrong_code_is_rejected_by_the_peer() {
    let (client, backend, _search_rx) = test_client("alice");
    let peer = backend.remote_candidate().await;
    backend.set_remote_code("482913").await;

    let err = client.pair_with(&peer, "000000").await.unwrap_err();
    assert_eq!(err, PairError::InvalidCode);
    assert_eq!(err.kind(), ErrorKind::Protocol);

    // Nothing was added on failure
    assert!(client.directory.contacts().await.is_empty());
}

#[tokio::test]
async fn test_unreachable_peer() {
    let (client, backend, _search_rx) = test_client("alice");
    let peer = backend.remote_candidate().await;
    backend.set_remote_code("482913").await;
    backend.set_offline(&peer.id, true).await;

    let err = client.pair_with(&peer, "482913").await.unwrap_err();
    assert_eq!(err, PairError::PeerUnreachable);
    assert!(client.directory.contacts().await.is_empty());
}

#[tokio::test]
async fn test_scan_failure_surfaces_as_empty_snapshot() {
    let (client, backend, _search_rx) = test_client("alice");

    backend.fail_next_scan().await;
    assert!(client.pairing.scan_peers().await.is_empty());

    // The next scan works again
    assert_eq!(client.pairing.scan_peers().await.len(), 1);
}

/// The spec scenario: issue a code, accept one pairing at t+30s, reject the
/// replay one second later.
#[tokio::test(start_paused = true)]
async fn test_code_is_single_use() {
    let (mut client, _backend, _search_rx) = test_client("alice");
    let issued = client.pairing.generate_code().await.unwrap();
    assert_eq!(issued.ttl_secs, 60);
    assert_eq!(client.pairing.code_state().await, CodeState::Issued);

    advance(Duration::from_secs(30)).await;

    let peer_a = test_identity("peera");
    let req = pair_request_from(&peer_a, &issued.code);
    let response = client.pairing.handle_pair_request(&req).await.unwrap();
    assert!(!response.pubkey.is_empty());
    assert_eq!(client.pairing.code_state().await, CodeState::Consumed);

    // pair:new observed exactly once
    client.pump_events().await;
    let contacts = client.directory.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].id, peer_a.id);

    // Replay at t+31 fails and adds nothing
    advance(Duration::from_secs(1)).await;
    let err = client.pairing.handle_pair_request(&req).await.unwrap_err();
    assert_eq!(err, PairError::InvalidCode);
    client.pump_events().await;
    assert_eq!(client.directory.contacts().await.len(), 1);

    // A stale countdown firing later must not disturb the terminal state
    advance(Duration::from_secs(120)).await;
    tokio::task::yield_now().await;
    assert_eq!(client.pairing.code_state().await, CodeState::Consumed);
}

#[tokio::test(start_paused = true)]
async fn test_code_expires_after_ttl() {
    let (client, _backend, _search_rx) = test_client("alice");
    let issued = client.pairing.generate_code().await.unwrap();

    advance(Duration::from_secs(61)).await;
    tokio::task::yield_now().await;
    assert_eq!(client.pairing.code_state().await, CodeState::Expired);

    let peer_a = test_identity("peera");
    let req = pair_request_from(&peer_a, &issued.code);
    let err = client.pairing.handle_pair_request(&req).await.unwrap_err();
    assert_eq!(err, PairError::InvalidCode);
}

#[tokio::test(start_paused = true)]
async fn test_regenerating_supersedes_the_old_code() {
    let (client, _backend, _search_rx) = test_client("alice");
    let first = client.pairing.generate_code().await.unwrap();

    advance(Duration::from_secs(30)).await;
    let mut second = client.pairing.generate_code().await.unwrap();
    // Guard against the one-in-a-million value collision
    while second.code == first.code {
        second = client.pairing.generate_code().await.unwrap();
    }

    // The old code fails immediately, well before its own ttl would elapse
    let peer_a = test_identity("peera");
    let req = pair_request_from(&peer_a, &first.code);
    let err = client.pairing.handle_pair_request(&req).await.unwrap_err();
    assert_eq!(err, PairError::InvalidCode);
    assert_eq!(client.pairing.code_state().await, CodeState::Issued);

    // The old countdown was aborted: 45s after the second issue (75s after
    // the first) the new code is still live and accepted
    advance(Duration::from_secs(45)).await;
    tokio::task::yield_now().await;
    assert_eq!(client.pairing.code_state().await, CodeState::Issued);

    let req = pair_request_from(&peer_a, &second.code);
    assert!(client.pairing.handle_pair_request(&req).await.is_ok());
}

#[tokio::test]
async fn test_pair_request_without_a_live_code() {
    let (client, _backend, _search_rx) = test_client("alice");
    assert_eq!(client.pairing.code_state().await, CodeState::Idle);

    let peer_a = test_identity("peera");
    let req = pair_request_from(&peer_a, "123456");
    let err = client.pairing.handle_pair_request(&req).await.unwrap_err();
    assert_eq!(err, PairError::InvalidCode);
}

#[tokio::test]
async fn test_bad_requester_key_leaves_the_code_live() {
    let (client, _backend, _search_rx) = test_client("alice");
    let issued = client.pairing.generate_code().await.unwrap();

    let peer_a = test_identity("peera");
    let mut req = pair_request_from(&peer_a, &issued.code);
    req.pubkey = "not base64!".to_string();

    let err = client.pairing.handle_pair_request(&req).await.unwrap_err();
    assert!(matches!(err, PairError::Handshake(_)));

    // The failed handshake did not consume the code
    assert_eq!(client.pairing.code_state().await, CodeState::Issued);
    let req = pair_request_from(&peer_a, &issued.code);
    assert!(client.pairing.handle_pair_request(&req).await.is_ok());
}

#[tokio::test]
async fn test_both_sides_derive_the_same_key() {
    // Pure key agreement check at the crypto contract level
    let (secret_a, public_a) = crypto::generate_keypair();
    let (secret_b, public_b) = crypto::generate_keypair();

    let key_a = crypto::derive_shared_key(&secret_a, &public_b).unwrap();
    let key_b = crypto::derive_shared_key(&secret_b, &public_a).unwrap();
    assert_eq!(key_a, key_b);
    info!("derived matching keys with fingerprint {}", key_a.fingerprint());
}
