//! Session vocabulary shared by both ends of a connection
//!
//! A session moves `Connecting -> Authenticating -> Active -> Closed`. The
//! client half of the handshake lives here; the server half needs the key
//! store and user directory and is driven from `server::session`.

use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::codec;
use super::error::{ProtocolError, ProtocolResult};
use super::types::{Command, MAX_MISSED_HEARTBEATS};
use crate::error::HandshakeFailure;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Connecting,
	Authenticating,
	Active,
	Closed,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SessionState::Connecting => "connecting",
			SessionState::Authenticating => "authenticating",
			SessionState::Active => "active",
			SessionState::Closed => "closed",
		};
		write!(f, "{}", name)
	}
}

/// Counts consecutive missed heartbeats
///
/// Only an explicit heartbeat round-trip clears the counter; other traffic
/// leaves it untouched.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
	missed: u32,
	threshold: u32,
}

impl Default for HeartbeatMonitor {
	fn default() -> Self {
		Self::new(MAX_MISSED_HEARTBEATS)
	}
}

impl HeartbeatMonitor {
	pub fn new(threshold: u32) -> Self {
		Self { missed: 0, threshold }
	}

	/// Record one missed heartbeat; returns true once the threshold is reached
	pub fn record_miss(&mut self) -> bool {
		self.missed = self.missed.saturating_add(1);
		self.expired()
	}

	pub fn record_beat(&mut self) {
		self.missed = 0;
	}

	pub fn missed(&self) -> u32 {
		self.missed
	}

	pub fn expired(&self) -> bool {
		self.missed >= self.threshold
	}
}

/// Result of the client side of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
	Accepted,
	Rejected(HandshakeFailure),
}

/// Interpret the server's single handshake reply
pub fn outcome_from_reply(reply: Command) -> HandshakeOutcome {
	match reply {
		Command::Accept => HandshakeOutcome::Accepted,
		Command::InvalidKey => HandshakeOutcome::Rejected(HandshakeFailure::InvalidKey),
		Command::MountNotFound => HandshakeOutcome::Rejected(HandshakeFailure::MountNotFound),
		Command::UserNotFound => HandshakeOutcome::Rejected(HandshakeFailure::UserNotFound),
		other => HandshakeOutcome::Rejected(HandshakeFailure::Unexpected(other.to_wire())),
	}
}

/// Client half of the handshake: send the token, read one reply
pub async fn client_handshake<S>(stream: &mut S, key: &str) -> ProtocolResult<HandshakeOutcome>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	codec::write_key(stream, key).await?;
	stream.flush().await?;
	match codec::read_command(stream).await {
		Ok(reply) => Ok(outcome_from_reply(reply)),
		Err(ProtocolError::UnknownCommand(v)) => {
			Ok(HandshakeOutcome::Rejected(HandshakeFailure::Unexpected(v)))
		}
		Err(e) => Err(e),
	}
}

/// Server side: send the reply for a handshake decision
pub async fn send_handshake_reply<S>(stream: &mut S, reply: Command) -> ProtocolResult<()>
where
	S: AsyncWrite + Unpin,
{
	debug_assert!(reply.is_handshake_reply());
	codec::write_command(stream, reply).await?;
	stream.flush().await?;
	Ok(())
}


// vim: ts=4
