//! Confinement of client paths to a session's mount root
//!
//! Client paths are interpreted relative to the mount root, whether or not
//! they start with `/`. A path is rejected when it contains a `..` component,
//! and, after symlinks are resolved, when it lands outside the root.

use std::path::{Component, Path, PathBuf};

use crate::protocol::types::{errno_from_io, neg, OpResult};

/// Check if a path is safe (no parent directory references)
pub fn is_path_safe(path: &Path) -> bool {
	!path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Turn a client path into a relative path with no `.`/`..`/root components
pub fn relative_path(remote: &str) -> OpResult<PathBuf> {
	let path = Path::new(remote);
	if !is_path_safe(path) {
		return Err(neg(libc::EACCES));
	}
	let mut rel = PathBuf::new();
	for component in path.components() {
		match component {
			Component::Normal(part) => rel.push(part),
			Component::RootDir | Component::CurDir => {}
			Component::ParentDir | Component::Prefix(_) => return Err(neg(libc::EACCES)),
		}
	}
	Ok(rel)
}

/// Check if path is within a root directory
pub fn is_path_within_root(path: &Path, root: &Path) -> bool {
	path.starts_with(root)
}

/// Resolve `remote` under `root` (which must already be canonical)
///
/// Symlinks are followed; a target outside the root is refused with
/// `-EACCES`. A missing path yields the OS error (typically `-ENOENT`).
pub async fn confine(root: &Path, remote: &str) -> OpResult<PathBuf> {
	let rel = relative_path(remote)?;
	let joined = root.join(&rel);
	let resolved = tokio::fs::canonicalize(&joined).await.map_err(|e| errno_from_io(&e))?;
	if !is_path_within_root(&resolved, root) {
		return Err(neg(libc::EACCES));
	}
	Ok(resolved)
}


// vim: ts=4
