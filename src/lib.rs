//! # AgFS - Aggregating Network Filesystem
//!
//! AgFS exports local directories over TCP under pre-shared keys and lets a
//! client see the exports of several servers as one directory tree.
//!
//! - [`protocol`]: command vocabulary, byte-level codec, handshake and heartbeat
//! - [`server`]: accept loop, per-connection sessions, sandboxed request handler
//! - [`client`]: per-server connections and the multi-server aggregator
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agfs::client::Aggregator;
//! use agfs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let fs = Aggregator::load(&config.client).await?;
//!     let stat = fs.getattr("/docs/readme.txt").await.map_err(|e| format!("errno {}", -e))?;
//!     println!("{} bytes", stat.size);
//!     fs.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod users;

// Re-export commonly used types and functions
pub use config::Config;
pub use error::{AgfsError, ConnectionError, HandshakeFailure};
pub use protocol::{Command, DirEntry, ErrorCode, FileStat, OpResult};

// vim: ts=4
