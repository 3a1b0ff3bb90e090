// Re-export needed modules for testing
pub mod client;
pub mod directory;
pub mod error;
pub mod models;
pub mod pairing; // Pairing code + key exchange
pub mod sync; // Message synchronization engine
pub mod transport;

// Re-export main types for convenience
pub use client::ChatClient; // Expose the owning coordinator directly
pub use models::*;
