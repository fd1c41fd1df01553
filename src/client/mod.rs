//! AgFS client
//!
//! `ServerConnection` talks to one server; `Aggregator` presents every
//! configured server as one namespace and resolves name collisions with
//! server tags (`name{:server:}`).
//!
//! # Example Usage
//!
//! ```ignore
//! use agfs::client::Aggregator;
//! use agfs::config::ClientConfig;
//!
//! let aggregator = Aggregator::load(&ClientConfig::default()).await?;
//! for entry in aggregator.readdir("/").await.map_err(|e| format!("errno {}", -e))? {
//!     println!("{} {}", entry.stat.size, entry.name);
//! }
//! aggregator.shutdown().await;
//! ```

pub mod aggregator;
pub mod connection;
pub mod disambiguate;
pub mod peer;

pub use aggregator::{Aggregator, FileHandle};
pub use connection::ServerConnection;
pub use disambiguate::{ambiguate, tag, Disambiguator};
pub use peer::RemotePeer;

// vim: ts=4
