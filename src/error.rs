//! Error types for AgFS operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::protocol::error::ProtocolError;
use crate::protocol::types::Command;

/// Main error type for setup and connection management
#[derive(Debug)]
pub enum AgfsError {
	/// I/O error
	Io(io::Error),

	/// Invalid or unreadable configuration
	Config { message: String },

	/// Connection error (nested)
	Connection(ConnectionError),

	/// Protocol error (nested)
	Protocol(ProtocolError),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for AgfsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AgfsError::Io(e) => write!(f, "I/O error: {}", e),
			AgfsError::Config { message } => write!(f, "Invalid configuration: {}", message),
			AgfsError::Connection(e) => write!(f, "Connection error: {}", e),
			AgfsError::Protocol(e) => write!(f, "Protocol error: {}", e),
			AgfsError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for AgfsError {}

impl From<io::Error> for AgfsError {
	fn from(e: io::Error) -> Self {
		AgfsError::Io(e)
	}
}

impl From<String> for AgfsError {
	fn from(e: String) -> Self {
		AgfsError::Other { message: e }
	}
}

impl From<ConnectionError> for AgfsError {
	fn from(e: ConnectionError) -> Self {
		AgfsError::Connection(e)
	}
}

impl From<ProtocolError> for AgfsError {
	fn from(e: ProtocolError) -> Self {
		AgfsError::Protocol(e)
	}
}

/// Terminal handshake outcomes other than ACCEPT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
	/// Key not present in the server's authorized list
	InvalidKey,

	/// Key matched but its mount root does not exist
	MountNotFound,

	/// Key matched but its local user cannot be resolved
	UserNotFound,

	/// Server answered with something outside the handshake vocabulary
	Unexpected(u16),
}

impl HandshakeFailure {
	/// Command the server sends for this failure
	pub fn reply(self) -> Command {
		match self {
			HandshakeFailure::InvalidKey => Command::InvalidKey,
			HandshakeFailure::MountNotFound => Command::MountNotFound,
			HandshakeFailure::UserNotFound => Command::UserNotFound,
			HandshakeFailure::Unexpected(_) => Command::None,
		}
	}
}

impl fmt::Display for HandshakeFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			HandshakeFailure::InvalidKey => write!(f, "key rejected"),
			HandshakeFailure::MountNotFound => write!(f, "mount root not found on server"),
			HandshakeFailure::UserNotFound => write!(f, "user not found on server"),
			HandshakeFailure::Unexpected(v) => write!(f, "unexpected handshake reply {}", v),
		}
	}
}

/// Connection-specific errors
#[derive(Debug)]
pub enum ConnectionError {
	/// TCP connect (or name resolution) failed
	Connect { address: String, source: io::Error },

	/// Server refused the handshake
	Handshake { server: String, reason: HandshakeFailure },

	/// Transport failed mid-exchange
	Protocol(ProtocolError),

	/// No live socket
	NotConnected,

	/// Operation timeout
	Timeout,

	/// Connection was explicitly stopped
	Stopped,
}

impl fmt::Display for ConnectionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionError::Connect { address, source } => {
				write!(f, "Could not connect to {}: {}", address, source)
			}
			ConnectionError::Handshake { server, reason } => {
				write!(f, "Handshake with {} failed: {}", server, reason)
			}
			ConnectionError::Protocol(e) => write!(f, "Protocol error: {}", e),
			ConnectionError::NotConnected => write!(f, "Not connected"),
			ConnectionError::Timeout => write!(f, "Connection timeout"),
			ConnectionError::Stopped => write!(f, "Connection stopped"),
		}
	}
}

impl Error for ConnectionError {}

impl From<ProtocolError> for ConnectionError {
	fn from(e: ProtocolError) -> Self {
		match e {
			ProtocolError::Timeout => ConnectionError::Timeout,
			other => ConnectionError::Protocol(other),
		}
	}
}


// vim: ts=4
