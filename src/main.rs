use anyhow::Result;
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

mod utils;

use parley::pairing::crypto;
use parley::transport::{MemoryBackend, PushEvent};
use parley::{ChatClient, LocalIdentity};

/// Command line arguments for parley
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "parley: a local-network peer-to-peer encrypted chat client core.",
    long_about = "Runs the client core against the in-memory backend: pairs with a \
    simulated peer over the 6-digit code handshake, exchanges messages, and \
    walks the history and search paths."
)]
struct Args {
    /// Write the log to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Username to register the local identity under
    #[arg(long, default_value = "alice")]
    username: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(
        args.log_file.as_deref().and_then(|p| p.to_str()),
        LevelFilter::Debug,
    )?;

    info!("parley client core starting up");

    // Local identity: fresh id and static handshake keypair
    let (secret_key, public_key) = crypto::generate_keypair();
    let identity = LocalIdentity::new(
        uuid::Uuid::new_v4().to_string(),
        args.username.clone(),
        secret_key,
        public_key,
    );
    let local_id = identity.id.clone();

    let backend = Arc::new(MemoryBackend::new(local_id));
    let (mut client, mut search_rx) = ChatClient::new(backend.clone(), identity);
    client.startup().await;

    // Discover the simulated peer
    let peers = client.pairing.scan_peers().await;
    let peer = peers
        .first()
        .ok_or_else(|| anyhow::anyhow!("no peers found on the network"))?;
    println!("Found peer {} at {}", peer.username, peer.address);

    // The peer's screen shows a 6-digit code; here we script it
    backend.set_remote_code("482913").await;
    let card = client.pair_with(peer, "482913").await?;
    println!("Paired with {} ({})", card.username, card.id);

    // Open the conversation and exchange a few messages
    client.open_conversation(&card.id).await?;
    client.send_message(&card.id, "hello from the lan").await?;

    let incoming = backend.push_incoming(&card.id, "hi back!").await;
    client
        .event_sender()
        .send(PushEvent::MsgNew {
            peer_id: card.id.clone(),
            message: incoming,
        })
        .await?;
    client.pump_events().await;

    println!("\nConversation with {}:", card.username);
    for message in client.sync.messages(&card.id).await {
        println!("  [{}] {}: {}", message.id, message.sender, message.body);
    }

    // Debounced search: the result lands after the quiet period
    client.directory.search("rem").await;
    if let Some(results) = search_rx.recv().await {
        println!("\nSearch 'rem' matched:");
        for result in results {
            println!("  {} ({}), {} unread", result.username, result.id, result.unread);
        }
    }

    info!("demo walkthrough complete");
    Ok(())
}
