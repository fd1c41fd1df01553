//! Server tags in file names
//!
//! When several servers list a file with the same name in one directory,
//! each copy is presented as `name{:server:}`. The tag can then be given
//! back in a path to address that server's copy directly.

use std::collections::BTreeMap;

use crate::logging::*;
use crate::protocol::types::{neg, DirEntry, FileStat, OpResult};

pub const BEGIN_TAG: &str = "{:";
pub const END_TAG: &str = ":}";

/// Append the tag for `server` to `name`
pub fn tag(name: &str, server: &str) -> String {
	format!("{}{}{}{}", name, BEGIN_TAG, server, END_TAG)
}

/// Split a path into `(server, untagged_path)`
///
/// Only the last path segment is searched, and the last complete tag in it
/// wins. The tag is cut out wherever it sits in that segment, so
/// `dir/file{:a:}.bin` gives `("a", "dir/file.bin")` and `x{:y:}{:s:}` gives
/// `("s", "x{:y:}")`. Without a complete tag the server is empty and the
/// path is unchanged.
pub fn ambiguate(path: &str) -> (String, String) {
	let segment_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
	let segment = &path[segment_start..];

	let end = match segment.rfind(END_TAG) {
		Some(i) => i,
		None => return (String::new(), path.to_string()),
	};
	let begin = match segment[..end].rfind(BEGIN_TAG) {
		Some(i) => i,
		None => return (String::new(), path.to_string()),
	};

	let server = segment[begin + BEGIN_TAG.len()..end].to_string();
	let mut untagged = String::with_capacity(path.len());
	untagged.push_str(&path[..segment_start]);
	untagged.push_str(&segment[..begin]);
	untagged.push_str(&segment[end + END_TAG.len()..]);
	(server, untagged)
}

/// Working map for merging the listings of one directory
///
/// Directories keep their bare name. A file whose name is also a directory
/// on some server is always tagged, so the bare name stays the directory.
/// So is a file whose own name contains a tag opener, so that the tag it
/// gets is the one read back.
#[derive(Debug, Default)]
pub struct Disambiguator {
	files: BTreeMap<String, Vec<(String, FileStat)>>,
	dirs: BTreeMap<String, (Vec<String>, FileStat)>,
}

impl Disambiguator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record that `server` lists `name`; the same pair twice is `-EEXIST`
	pub fn add_filepath(&mut self, name: &str, server: &str, stat: FileStat) -> OpResult<()> {
		if stat.is_dir() {
			let (servers, _) =
				self.dirs.entry(name.to_string()).or_insert_with(|| (Vec::new(), stat));
			if servers.iter().any(|s| s == server) {
				return Err(neg(libc::EEXIST));
			}
			servers.push(server.to_string());
		} else {
			let owners = self.files.entry(name.to_string()).or_default();
			if owners.iter().any(|(s, _)| s == server) {
				return Err(neg(libc::EEXIST));
			}
			owners.push((server.to_string(), stat));
		}
		Ok(())
	}

	/// Record a whole listing; duplicates are skipped and counted
	pub fn add_entries(&mut self, entries: &[DirEntry], server: &str) -> usize {
		let mut skipped = 0;
		for entry in entries {
			if self.add_filepath(&entry.name, server, entry.stat).is_err() {
				warn!("{} listed {} twice, keeping the first", server, entry.name);
				skipped += 1;
			}
		}
		skipped
	}

	/// Merged listing, sorted by name
	pub fn disambiguated(&self) -> Vec<DirEntry> {
		let mut merged = Vec::new();
		for (name, (_, stat)) in &self.dirs {
			merged.push(DirEntry { name: name.clone(), stat: *stat });
		}
		for (name, owners) in &self.files {
			if owners.len() == 1 && !self.dirs.contains_key(name) && !name.contains(BEGIN_TAG) {
				merged.push(DirEntry { name: name.clone(), stat: owners[0].1 });
			} else {
				for (server, stat) in owners {
					merged.push(DirEntry { name: tag(name, server), stat: *stat });
				}
			}
		}
		merged.sort_by(|a, b| a.name.cmp(&b.name));
		merged
	}

	pub fn clear(&mut self) {
		self.files.clear();
		self.dirs.clear();
	}

	pub fn is_empty(&self) -> bool {
		self.files.is_empty() && self.dirs.is_empty()
	}
}


// vim: ts=4
