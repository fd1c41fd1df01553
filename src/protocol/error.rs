//! Protocol error types
//!
//! Covers transport failures and malformed frames. Every variant can be
//! downgraded to a negative `ErrorCode` so that callers of the filesystem
//! operations only ever see errno-style results.

use std::fmt;
use std::io;

use super::types::{errno_from_io, neg, ErrorCode};

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Which kind of length-prefixed field overflowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthKind {
	/// Path or other string
	Name,
	/// Data block or entry count
	Payload,
}

/// Protocol error type
#[derive(Debug)]
pub enum ProtocolError {
	/// I/O error from the underlying stream
	Io(io::Error),
	/// Peer closed the stream, possibly mid-message
	Closed,
	/// Read or write did not complete in time
	Timeout,
	/// A length-prefixed field declared more bytes than allowed
	LengthExceeded { kind: LengthKind, len: u64, max: u64 },
	/// Command value outside the known vocabulary
	UnknownCommand(u16),
	/// String field was not valid UTF-8
	InvalidUtf8,
	/// Protocol violation (unexpected reply or state)
	ProtocolViolation(String),
	/// Generic error message
	Other(String),
}

impl ProtocolError {
	/// Negative error code reported to filesystem callers
	pub fn errno(&self) -> ErrorCode {
		match self {
			ProtocolError::Io(e) => errno_from_io(e),
			ProtocolError::Closed => neg(libc::ENOTCONN),
			ProtocolError::Timeout => neg(libc::ETIMEDOUT),
			ProtocolError::LengthExceeded { kind: LengthKind::Name, .. } => neg(libc::ENAMETOOLONG),
			ProtocolError::LengthExceeded { kind: LengthKind::Payload, .. } => neg(libc::EFBIG),
			ProtocolError::UnknownCommand(_)
			| ProtocolError::InvalidUtf8
			| ProtocolError::ProtocolViolation(_) => neg(libc::EPROTO),
			ProtocolError::Other(_) => neg(libc::EIO),
		}
	}

	/// True when the stream can no longer be trusted and must be closed
	pub fn is_fatal(&self) -> bool {
		!matches!(self, ProtocolError::UnknownCommand(_))
	}
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
			ProtocolError::Closed => write!(f, "Connection closed by peer"),
			ProtocolError::Timeout => write!(f, "Timed out"),
			ProtocolError::LengthExceeded { len, max, .. } => {
				write!(f, "Declared length {} exceeds maximum {}", len, max)
			}
			ProtocolError::UnknownCommand(v) => write!(f, "Unknown command {}", v),
			ProtocolError::InvalidUtf8 => write!(f, "String field is not valid UTF-8"),
			ProtocolError::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
			ProtocolError::Other(msg) => write!(f, "{}", msg),
		}
	}
}

impl std::error::Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
	fn from(e: io::Error) -> Self {
		if e.kind() == io::ErrorKind::UnexpectedEof {
			ProtocolError::Closed
		} else {
			ProtocolError::Io(e)
		}
	}
}

impl From<tokio::time::error::Elapsed> for ProtocolError {
	fn from(_: tokio::time::error::Elapsed) -> Self {
		ProtocolError::Timeout
	}
}


// vim: ts=4
