//! Local user resolution
//!
//! Every accepted session is bound to one local account named in the
//! authorized-key list. The server never switches its own process identity
//! (sessions share the process); permission bits are instead evaluated for
//! the bound account before any file is touched.

use nix::unistd::User;
use std::fmt;

use crate::logging::*;

/// A resolved local account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
	pub name: String,
	pub uid: u32,
	pub gid: u32,
}

impl fmt::Display for LocalUser {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({}:{})", self.name, self.uid, self.gid)
	}
}

const R_OK: u32 = libc::R_OK as u32;
const W_OK: u32 = libc::W_OK as u32;
const X_OK: u32 = libc::X_OK as u32;

impl LocalUser {
	/// Would this user be granted `mask` (`R_OK|W_OK|X_OK`, or `F_OK`) on a
	/// file with the given mode and ownership?
	pub fn permits(&self, mode: u32, owner: u32, group: u32, mask: u32) -> bool {
		let mask = mask & (R_OK | W_OK | X_OK);
		if mask == 0 {
			return true;
		}
		if self.uid == 0 {
			let is_dir = mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32;
			return mask & X_OK == 0 || is_dir || mode & 0o111 != 0;
		}
		let bits = if self.uid == owner {
			(mode >> 6) & 0o7
		} else if self.gid == group {
			(mode >> 3) & 0o7
		} else {
			mode & 0o7
		};
		bits & mask == mask
	}
}

/// Lookup of local accounts by name
pub trait UserDirectory: Send + Sync {
	fn lookup(&self, name: &str) -> Option<LocalUser>;
}

/// Resolves names through the system passwd database
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUserDirectory;

impl UserDirectory for SystemUserDirectory {
	fn lookup(&self, name: &str) -> Option<LocalUser> {
		if name.is_empty() || name.contains('\0') {
			return None;
		}
		match User::from_name(name) {
			Ok(Some(user)) => Some(LocalUser {
				name: name.to_string(),
				uid: user.uid.as_raw(),
				gid: user.gid.as_raw(),
			}),
			Ok(None) => None,
			Err(e) => {
				warn!("Cannot look up user {}: {}", name, e);
				None
			}
		}
	}
}


// vim: ts=4
