//! Operations the aggregator needs from one backing server
//!
//! `ServerConnection` is the network implementation. The aggregator depends
//! only on this trait, so it can be exercised against in-memory peers.

use async_trait::async_trait;

use crate::protocol::types::*;

/// One remote server as seen by the aggregator
///
/// Every operation reports failure as a negated errno, including transport
/// failures (`-ENOTCONN`, `-ETIMEDOUT`, ...).
#[async_trait]
pub trait RemotePeer: Send + Sync {
	/// Host name; also the disambiguation tag for this server's entries
	fn name(&self) -> &str;

	fn is_connected(&self) -> bool;

	// === Filesystem operations ===

	async fn getattr(&self, path: &str) -> OpResult<FileStat>;

	async fn access(&self, path: &str, mask: MaskValue) -> OpResult<()>;

	async fn readdir(&self, path: &str) -> OpResult<Vec<DirEntry>>;

	/// Read up to `size` bytes; a short result means end of file
	async fn read(&self, path: &str, size: SizeValue, offset: SizeValue) -> OpResult<Vec<u8>>;

	/// Returns the number of bytes written
	async fn write(&self, path: &str, data: &[u8], offset: SizeValue) -> OpResult<SizeValue>;

	async fn open(&self, path: &str, flags: MaskValue) -> OpResult<()>;

	// === Lifecycle ===

	/// One HEARTBEAT round-trip; false closes the socket
	async fn heartbeat(&self) -> bool;

	/// Send STOP and close; true if the close itself succeeded
	async fn stop(&self) -> bool;
}

// vim: ts=4
