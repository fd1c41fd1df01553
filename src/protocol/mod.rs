//! AgFS wire protocol
//!
//! This module holds everything both peers must agree on: the command
//! vocabulary and metadata record (`types`), the byte-level encoding
//! (`codec`), the error taxonomy (`error`) and the handshake/heartbeat
//! vocabulary (`session`).
//!
//! # Example Usage
//!
//! ```ignore
//! use agfs::protocol::{codec, Command};
//!
//! codec::write_command(&mut stream, Command::GetAttr).await?;
//! codec::write_string(&mut stream, "/docs/readme.txt").await?;
//! let err = codec::read_error(&mut stream).await?;
//! if err >= 0 {
//!     let stat = codec::read_stat(&mut stream).await?;
//! }
//! ```

pub mod codec;
pub mod error;
pub mod session;
pub mod types;

// Re-export public API
pub use error::{LengthKind, ProtocolError, ProtocolResult};
pub use session::{HandshakeOutcome, HeartbeatMonitor, SessionState};
pub use types::{
	Command, DirEntry, ErrorCode, FileStat, MaskValue, OpResult, SizeValue, ASCII_KEY_LEN,
	MAX_MISSED_HEARTBEATS,
};

// vim: ts=4
