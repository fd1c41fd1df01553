//! Wire-level types shared by client and server
//!
//! Every value that crosses the socket is described here: the command
//! vocabulary, the signed error slot, the narrowed file metadata record and
//! the protocol constants both sides must agree on.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;

use super::error::ProtocolError;

/// Signed error slot: non-negative is success, negative is `-errno`
pub type ErrorCode = i64;

/// Unsigned size field, transmitted separately from `ErrorCode`
pub type SizeValue = u64;

/// Access mask / open flags field
pub type MaskValue = u32;

/// Result of one remote filesystem operation; the error is always a negative errno
pub type OpResult<T> = Result<T, ErrorCode>;

/// Width of the handshake token, in bytes
pub const ASCII_KEY_LEN: usize = 512;

/// Default TCP port of the server
pub const DEFAULT_PORT: u16 = 2678;

/// Consecutive missed heartbeats after which a session is closed
pub const MAX_MISSED_HEARTBEATS: u32 = 5;

/// Default upper bound for any length-prefixed string
pub const DEFAULT_MAX_PATH_LEN: u64 = 4096;

/// Default upper bound for one READ/WRITE payload
pub const DEFAULT_MAX_IO_SIZE: u64 = 16 * 1024 * 1024;

/// Default upper bound for the number of entries in one READDIR reply
pub const DEFAULT_MAX_DIR_ENTRIES: u64 = 1 << 20;

/// Protocol command, sent as a big-endian `u16`
///
/// `Accept`, `InvalidKey`, `MountNotFound` and `UserNotFound` only appear as
/// the server's single handshake reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
	Stop,
	Heartbeat,
	GetAttr,
	Access,
	ReadDir,
	Read,
	Write,
	Open,
	Accept,
	InvalidKey,
	MountNotFound,
	UserNotFound,
	None,
}

impl Command {
	/// Numeric wire value
	pub fn to_wire(self) -> u16 {
		match self {
			Command::Stop => 0,
			Command::Heartbeat => 1,
			Command::GetAttr => 2,
			Command::Access => 3,
			Command::ReadDir => 4,
			Command::Read => 5,
			Command::Write => 6,
			Command::Open => 7,
			Command::Accept => 8,
			Command::InvalidKey => 9,
			Command::MountNotFound => 10,
			Command::UserNotFound => 11,
			Command::None => 12,
		}
	}

	/// True for the four values a server may answer a handshake with
	pub fn is_handshake_reply(self) -> bool {
		matches!(
			self,
			Command::Accept | Command::InvalidKey | Command::MountNotFound | Command::UserNotFound
		)
	}
}

impl TryFrom<u16> for Command {
	type Error = ProtocolError;

	fn try_from(value: u16) -> Result<Self, Self::Error> {
		let cmd = match value {
			0 => Command::Stop,
			1 => Command::Heartbeat,
			2 => Command::GetAttr,
			3 => Command::Access,
			4 => Command::ReadDir,
			5 => Command::Read,
			6 => Command::Write,
			7 => Command::Open,
			8 => Command::Accept,
			9 => Command::InvalidKey,
			10 => Command::MountNotFound,
			11 => Command::UserNotFound,
			12 => Command::None,
			other => return Err(ProtocolError::UnknownCommand(other)),
		};
		Ok(cmd)
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Command::Stop => "STOP",
			Command::Heartbeat => "HEARTBEAT",
			Command::GetAttr => "GETATTR",
			Command::Access => "ACCESS",
			Command::ReadDir => "READDIR",
			Command::Read => "READ",
			Command::Write => "WRITE",
			Command::Open => "OPEN",
			Command::Accept => "ACCEPT",
			Command::InvalidKey => "INVALID_KEY",
			Command::MountNotFound => "MOUNT_NOT_FOUND",
			Command::UserNotFound => "USER_NOT_FOUND",
			Command::None => "NONE",
		};
		write!(f, "{}", name)
	}
}

/// Narrowed projection of `struct stat` that crosses the wire
///
/// Fields are sent one by one in declaration order, never as a memory dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
	pub dev: u64,
	pub mode: u32,
	pub size: u64,
	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,
}

impl FileStat {
	/// Encoded size on the wire
	pub const WIRE_LEN: usize = 8 + 4 + 8 + 8 + 8 + 8;

	pub fn is_dir(&self) -> bool {
		self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
	}

	pub fn is_file(&self) -> bool {
		self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
	}
}

impl From<&Metadata> for FileStat {
	fn from(meta: &Metadata) -> Self {
		FileStat {
			dev: meta.dev(),
			mode: meta.mode(),
			size: meta.size(),
			atime: meta.atime(),
			mtime: meta.mtime(),
			ctime: meta.ctime(),
		}
	}
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
	pub name: String,
	pub stat: FileStat,
}

/// Convert an I/O error into a negative error code
pub fn errno_from_io(err: &io::Error) -> ErrorCode {
	let raw = match err.raw_os_error() {
		Some(code) => code,
		None => match err.kind() {
			io::ErrorKind::NotFound => libc::ENOENT,
			io::ErrorKind::PermissionDenied => libc::EACCES,
			io::ErrorKind::AlreadyExists => libc::EEXIST,
			io::ErrorKind::InvalidInput => libc::EINVAL,
			io::ErrorKind::TimedOut => libc::ETIMEDOUT,
			io::ErrorKind::UnexpectedEof => libc::EIO,
			_ => libc::EIO,
		},
	};
	-(raw as ErrorCode)
}

/// Negative error code for a libc errno constant
pub fn neg(errno: i32) -> ErrorCode {
	-(errno as ErrorCode)
}


// vim: ts=4
