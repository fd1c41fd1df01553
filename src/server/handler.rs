//! Server-side request handler
//!
//! A `RequestHandler` belongs to one authenticated session. It owns the
//! session's canonical mount root and bound user, and executes each
//! filesystem operation against a path confined to that root. Every
//! operation ends in a protocol-level reply; OS failures travel back as
//! negated errno values and never end the session.

use std::fs::Metadata;
use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tokio::fs as afs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::path::confine;
use crate::protocol::codec;
use crate::protocol::error::ProtocolResult;
use crate::protocol::types::*;
use crate::users::LocalUser;

const R_OK: u32 = libc::R_OK as u32;
const W_OK: u32 = libc::W_OK as u32;

/// Executes filesystem operations for one session
#[derive(Debug, Clone)]
pub struct RequestHandler {
	root: PathBuf,
	user: LocalUser,
	max_path_len: u64,
	max_io_size: u64,
}

impl RequestHandler {
	/// `root` must be canonical; it is the boundary every path is checked against
	pub fn new(root: PathBuf, user: LocalUser, max_path_len: u64, max_io_size: u64) -> Self {
		Self { root, user, max_path_len, max_io_size }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn user(&self) -> &LocalUser {
		&self.user
	}

	fn authorize(&self, meta: &Metadata, mask: u32) -> OpResult<()> {
		if self.user.permits(meta.mode(), meta.uid(), meta.gid(), mask) {
			Ok(())
		} else {
			Err(neg(libc::EACCES))
		}
	}

	async fn resolve(&self, path: &str) -> OpResult<(PathBuf, Metadata)> {
		let local = confine(&self.root, path).await?;
		let meta = afs::metadata(&local).await.map_err(|e| errno_from_io(&e))?;
		Ok((local, meta))
	}

	// === Filesystem operations ===

	pub async fn getattr(&self, path: &str) -> OpResult<FileStat> {
		let (_, meta) = self.resolve(path).await?;
		Ok(FileStat::from(&meta))
	}

	pub async fn access(&self, path: &str, mask: MaskValue) -> OpResult<()> {
		let (_, meta) = self.resolve(path).await?;
		self.authorize(&meta, mask)
	}

	/// List a directory, sorted by name; children with non-UTF-8 names are skipped
	pub async fn readdir(&self, path: &str) -> OpResult<Vec<DirEntry>> {
		let (local, meta) = self.resolve(path).await?;
		if !meta.is_dir() {
			return Err(neg(libc::ENOTDIR));
		}
		self.authorize(&meta, R_OK)?;

		let mut dir = afs::read_dir(&local).await.map_err(|e| errno_from_io(&e))?;
		let mut entries = Vec::new();
		while let Some(entry) = dir.next_entry().await.map_err(|e| errno_from_io(&e))? {
			let name = match entry.file_name().into_string() {
				Ok(name) => name,
				Err(raw) => {
					warn!("Skipping non UTF-8 name {:?} in {}", raw, local.display());
					continue;
				}
			};
			match afs::symlink_metadata(entry.path()).await {
				Ok(child) => entries.push(DirEntry { name, stat: FileStat::from(&child) }),
				Err(e) => debug!("Cannot stat {}: {}", entry.path().display(), e),
			}
		}
		entries.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(entries)
	}

	/// Read up to `size` bytes at `offset`; short only at end of file
	pub async fn read(&self, path: &str, size: SizeValue, offset: SizeValue) -> OpResult<Vec<u8>> {
		if size > self.max_io_size {
			return Err(neg(libc::EINVAL));
		}
		let (local, meta) = self.resolve(path).await?;
		if meta.is_dir() {
			return Err(neg(libc::EISDIR));
		}
		self.authorize(&meta, R_OK)?;

		let mut file = afs::File::open(&local).await.map_err(|e| errno_from_io(&e))?;
		file.seek(SeekFrom::Start(offset)).await.map_err(|e| errno_from_io(&e))?;
		let mut buf = vec![0u8; size as usize];
		let mut filled = 0;
		while filled < buf.len() {
			let n = file.read(&mut buf[filled..]).await.map_err(|e| errno_from_io(&e))?;
			if n == 0 {
				break;
			}
			filled += n;
		}
		buf.truncate(filled);
		Ok(buf)
	}

	/// First half of WRITE: can the target be opened for `size` bytes?
	pub async fn open_for_write(&self, path: &str, size: SizeValue) -> OpResult<afs::File> {
		if size > self.max_io_size {
			return Err(neg(libc::EFBIG));
		}
		let (local, meta) = self.resolve(path).await?;
		if meta.is_dir() {
			return Err(neg(libc::EISDIR));
		}
		self.authorize(&meta, W_OK)?;
		afs::OpenOptions::new().write(true).open(&local).await.map_err(|e| errno_from_io(&e))
	}

	/// Second half of WRITE: put `data` at `offset`
	pub async fn write_at(file: &mut afs::File, offset: SizeValue, data: &[u8]) -> OpResult<SizeValue> {
		file.seek(SeekFrom::Start(offset)).await.map_err(|e| errno_from_io(&e))?;
		file.write_all(data).await.map_err(|e| errno_from_io(&e))?;
		file.flush().await.map_err(|e| errno_from_io(&e))?;
		Ok(data.len() as SizeValue)
	}

	/// Validate that `path` can be opened with `flags`; nothing stays open
	///
	/// Creation and truncation flags are ignored so the check has no side effects.
	pub async fn open(&self, path: &str, flags: MaskValue) -> OpResult<()> {
		let (local, meta) = self.resolve(path).await?;
		let flags = flags as i32;
		let (read, write, mask) = match flags & libc::O_ACCMODE {
			libc::O_WRONLY => (false, true, W_OK),
			libc::O_RDWR => (true, true, R_OK | W_OK),
			_ => (true, false, R_OK),
		};
		if write && meta.is_dir() {
			return Err(neg(libc::EISDIR));
		}
		self.authorize(&meta, mask)?;
		let extra = flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC);
		let file = afs::OpenOptions::new()
			.read(read)
			.write(write)
			.custom_flags(extra)
			.open(&local)
			.await
			.map_err(|e| errno_from_io(&e))?;
		drop(file);
		Ok(())
	}

	// === Wire dispatch ===

	/// Read a path argument; non-UTF-8 bytes become `-EILSEQ` for the reply
	async fn read_path<S>(&self, stream: &mut S) -> ProtocolResult<OpResult<String>>
	where
		S: AsyncRead + Unpin,
	{
		let len = codec::read_size(stream).await?;
		let bytes = codec::read_bounded(stream, len, self.max_path_len).await?;
		Ok(String::from_utf8(bytes).map_err(|_| neg(libc::EILSEQ)))
	}

	/// Read the arguments of `cmd`, run it and write the full reply
	///
	/// Only transport problems and oversized length fields are returned as
	/// errors; the session must close on those.
	pub async fn dispatch<S>(&self, cmd: Command, stream: &mut S) -> ProtocolResult<()>
	where
		S: AsyncRead + AsyncWrite + Unpin,
	{
		match cmd {
			Command::GetAttr => {
				let path = self.read_path(stream).await?;
				let result = match path {
					Ok(p) => self.getattr(&p).await,
					Err(e) => Err(e),
				};
				match result {
					Ok(stat) => {
						codec::write_error(stream, 0).await?;
						codec::write_stat(stream, &stat).await?;
					}
					Err(e) => {
						codec::write_error(stream, e).await?;
					}
				}
			}
			Command::Access => {
				let path = self.read_path(stream).await?;
				let mask = codec::read_mask(stream).await?;
				let result = match path {
					Ok(p) => self.access(&p, mask).await,
					Err(e) => Err(e),
				};
				codec::write_error(stream, result.err().unwrap_or(0)).await?;
			}
			Command::ReadDir => {
				let path = self.read_path(stream).await?;
				let result = match path {
					Ok(p) => self.readdir(&p).await,
					Err(e) => Err(e),
				};
				match result {
					Ok(entries) => {
						codec::write_error(stream, 0).await?;
						codec::write_size(stream, entries.len() as SizeValue).await?;
						for entry in &entries {
							codec::write_string(stream, &entry.name).await?;
							codec::write_stat(stream, &entry.stat).await?;
						}
					}
					Err(e) => {
						codec::write_error(stream, e).await?;
					}
				}
			}
			Command::Read => {
				let path = self.read_path(stream).await?;
				let size = codec::read_size(stream).await?;
				let offset = codec::read_size(stream).await?;
				let result = match path {
					Ok(p) => self.read(&p, size, offset).await,
					Err(e) => Err(e),
				};
				match result {
					Ok(data) => {
						codec::write_error(stream, data.len() as ErrorCode).await?;
						codec::write_size(stream, data.len() as SizeValue).await?;
						stream.write_all(&data).await?;
					}
					Err(e) => {
						codec::write_error(stream, e).await?;
					}
				}
			}
			Command::Write => {
				let path = self.read_path(stream).await?;
				let size = codec::read_size(stream).await?;
				let offset = codec::read_size(stream).await?;
				let opened = match path {
					Ok(p) => self.open_for_write(&p, size).await,
					Err(e) => Err(e),
				};
				let mut file = match opened {
					Ok(file) => file,
					Err(e) => {
						codec::write_error(stream, e).await?;
						stream.flush().await?;
						return Ok(());
					}
				};
				codec::write_error(stream, 0).await?;
				stream.flush().await?;

				let data = codec::read_bounded(stream, size, self.max_io_size).await?;
				match Self::write_at(&mut file, offset, &data).await {
					Ok(written) => {
						codec::write_error(stream, 0).await?;
						codec::write_size(stream, written).await?;
					}
					Err(e) => {
						codec::write_error(stream, e).await?;
					}
				}
			}
			Command::Open => {
				let path = self.read_path(stream).await?;
				let flags = codec::read_mask(stream).await?;
				let result = match path {
					Ok(p) => self.open(&p, flags).await,
					Err(e) => Err(e),
				};
				codec::write_error(stream, result.err().unwrap_or(0)).await?;
			}
			other => {
				warn!("Command {} is not a filesystem operation, ignoring", other);
				return Ok(());
			}
		}
		stream.flush().await?;
		Ok(())
	}
}


// vim: ts=4
