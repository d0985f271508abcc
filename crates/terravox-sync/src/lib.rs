//! Multiplayer sync for terravox - ships full saves and diff queues between
//! a server store and client stores
//!
//! Transport framing is up to the embedder: messages travel as JSON strings
//! over channels, which a socket layer can forward verbatim.
//! ```ignore
//! let events = Arc::new(EventBus::default());
//! let mut server = SyncServer::new(store, SyncConfig::default(), events.clone())?;
//! let (id, inbox) = server.connect_client()?;
//! let mut client = SyncClient::new(id, client_store, inbox, events);
//! server.tick(dt)?;
//! client.poll()?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod server;

pub use client::SyncClient;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use events::{ClientId, EventBus, SyncEvent};
pub use protocol::SyncMessage;
pub use server::SyncServer;
