//! Key material on disk
//!
//! The server reads an authorized-key list, one `mountRoot user key` triple
//! per line (whitespace or comma separated). The client reads `*.agkey`
//! files, each holding `hostname port key`. Generating keys and writing these
//! files is left to external tooling.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One line of the authorized-key list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
	pub mount_root: PathBuf,
	pub user: String,
	pub key: String,
}

/// Server-side authorized-key list
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
	entries: Vec<AuthorizedKey>,
}

fn fields(line: &str) -> Vec<&str> {
	line.split(|c: char| c == ',' || c.is_whitespace()).filter(|f| !f.is_empty()).collect()
}

impl AuthorizedKeys {
	pub fn new(entries: Vec<AuthorizedKey>) -> Self {
		Self { entries }
	}

	/// Parse the list; malformed lines are skipped
	pub fn parse(text: &str) -> Self {
		let mut entries = Vec::new();
		for (lineno, line) in text.lines().enumerate() {
			let trimmed = line.trim();
			if trimmed.is_empty() || trimmed.starts_with('#') {
				continue;
			}
			match fields(trimmed).as_slice() {
				[mount_root, user, key] => entries.push(AuthorizedKey {
					mount_root: PathBuf::from(*mount_root),
					user: (*user).to_string(),
					key: (*key).to_string(),
				}),
				other => {
					warn!(
						"Skipping key list line {}: expected 3 fields, got {}",
						lineno + 1,
						other.len()
					);
				}
			}
		}
		Self { entries }
	}

	pub fn load(path: &Path) -> std::io::Result<Self> {
		let text = fs::read_to_string(path)?;
		let keys = Self::parse(&text);
		debug!("Loaded {} authorized keys from {}", keys.len(), path.display());
		Ok(keys)
	}

	/// First entry whose key equals `key` exactly
	pub fn find(&self, key: &str) -> Option<&AuthorizedKey> {
		self.entries.iter().find(|entry| entry.key == key)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// One remote server the client should connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
	pub hostname: String,
	pub port: u16,
	pub key: String,
}

impl PeerEntry {
	/// Parse the contents of one `.agkey` file
	pub fn parse(text: &str) -> Option<PeerEntry> {
		let parts: Vec<&str> = text.split_whitespace().collect();
		match parts.as_slice() {
			[hostname, port, key] => Some(PeerEntry {
				hostname: (*hostname).to_string(),
				port: port.parse().ok()?,
				key: (*key).to_string(),
			}),
			_ => None,
		}
	}

	pub fn address(&self) -> String {
		format!("{}:{}", self.hostname, self.port)
	}
}

/// Extension of client key files
pub const KEY_FILE_EXTENSION: &str = "agkey";

/// Load every readable `*.agkey` file in `dir`, sorted by file name
pub fn load_peer_entries(dir: &Path) -> std::io::Result<Vec<PeerEntry>> {
	let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
		.filter_map(|entry| entry.ok().map(|e| e.path()))
		.filter(|p| {
			p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(KEY_FILE_EXTENSION)
		})
		.collect();
	paths.sort();

	let mut peers: Vec<PeerEntry> = Vec::new();
	for path in paths {
		let text = match fs::read_to_string(&path) {
			Ok(t) => t,
			Err(e) => {
				warn!("Cannot read key file {}: {}", path.display(), e);
				continue;
			}
		};
		match PeerEntry::parse(&text) {
			Some(peer) if peers.iter().any(|p| p.hostname == peer.hostname) => {
				warn!("Ignoring {}: duplicate server {}", path.display(), peer.hostname);
			}
			Some(peer) => {
				debug!("Found key file {} for {}", path.display(), peer.hostname);
				peers.push(peer);
			}
			None => warn!("Ignoring malformed key file {}", path.display()),
		}
	}
	Ok(peers)
}


// vim: ts=4
