//! Session client.
//!
//! This module contains the main entry point for talking to a Browser Agent
//! Protocol server.
//!
//! # Components
//!
//! | Type | Role |
//! |------|------|
//! | [`Client`] | Async session: handshake, calls, subscriptions, close |
//! | [`ClientBuilder`] | Validated configuration |
//! | [`BlockingClient`] | Synchronous facade with an owned runtime |
//! | [`Subscription`] | Handle returned by every `on*` registration |
//!
//! # Example
//!
//! ```no_run
//! use bap_client::{Client, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = Client::builder().build()?;
//! client.connect().await?;
//!
//! let sub = client.on_stream_chunk(|chunk| {
//!     println!("chunk {} of {}", chunk.index, chunk.stream_id);
//! });
//!
//! // ...
//!
//! sub.unsubscribe();
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod blocking;
mod builder;
mod dispatcher;
mod options;
mod router;
mod session;
mod state;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use blocking::BlockingClient;
pub use builder::ClientBuilder;
pub use dispatcher::DEFAULT_MAX_PENDING;
pub use options::{
    ClientOptions, DEFAULT_CLIENT_NAME, DEFAULT_CLIENT_VERSION, DEFAULT_EVENTS, DEFAULT_TIMEOUT,
    DEFAULT_URL, SHUTDOWN_GRACE, TransportKind,
};
pub use router::Subscription;
pub use session::{Client, SessionInfo};
pub use state::ConnectionState;
