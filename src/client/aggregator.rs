//! One namespace over many servers
//!
//! Paths carrying a server tag go to that server alone. Untagged paths fan
//! out to every connected server: lookups take the first success in server
//! name order, listings are merged through a `Disambiguator`.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::connection::ServerConnection;
use super::disambiguate::{ambiguate, Disambiguator};
use super::peer::RemotePeer;
use crate::config::ClientConfig;
use crate::error::AgfsError;
use crate::keys::{load_peer_entries, PeerEntry};
use crate::logging::*;
use crate::protocol::types::*;

/// Server that accepted an OPEN; later READ/WRITE calls go there directly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
	pub server: String,
}

enum Route<'a> {
	/// Explicit tag naming a known server
	Tagged(&'a Arc<dyn RemotePeer>, String),
	/// Tag naming no known server
	Unknown(String),
	Untagged(String),
}

pub struct Aggregator {
	peers: BTreeMap<String, Arc<dyn RemotePeer>>,
	keepalive: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Aggregator {
	fn default() -> Self {
		Self::new()
	}
}

impl Aggregator {
	pub fn new() -> Self {
		Self { peers: BTreeMap::new(), keepalive: Mutex::new(Vec::new()) }
	}

	/// Register a peer under its name; a name already present is kept
	pub fn add_peer(&mut self, peer: Arc<dyn RemotePeer>) -> bool {
		let name = peer.name().to_string();
		if self.peers.contains_key(&name) {
			warn!("Server {} already registered, ignoring duplicate", name);
			return false;
		}
		self.peers.insert(name, peer);
		true
	}

	/// Connect to every entry concurrently and start their keepalive loops
	///
	/// Servers that cannot be reached now stay registered; their keepalive
	/// loop keeps trying.
	pub async fn from_peer_entries(entries: Vec<PeerEntry>, config: &ClientConfig) -> Self {
		let mut aggregator = Self::new();
		let mut connections: Vec<Arc<ServerConnection>> = Vec::new();
		for entry in entries {
			if connections.iter().any(|c| c.entry().hostname == entry.hostname) {
				warn!("Server {} listed twice, keeping the first entry", entry.hostname);
				continue;
			}
			connections.push(Arc::new(ServerConnection::new(entry, config.clone())));
		}

		let results = join_all(connections.iter().map(|c| c.connect())).await;
		let handles = aggregator.keepalive.get_mut();
		for (conn, result) in connections.into_iter().zip(results) {
			if let Err(e) = result {
				warn!("{}", e);
			}
			handles.push(conn.spawn_keepalive());
			aggregator.peers.insert(conn.entry().hostname.clone(), conn);
		}
		aggregator
	}

	/// Load `*.agkey` files from the configured key directory and connect
	pub async fn load(config: &ClientConfig) -> Result<Self, AgfsError> {
		let entries = load_peer_entries(&config.key_dir).map_err(|e| AgfsError::Config {
			message: format!("Cannot read key directory {}: {}", config.key_dir.display(), e),
		})?;
		if entries.is_empty() {
			warn!("No server keys found in {}", config.key_dir.display());
		}
		Ok(Self::from_peer_entries(entries, config).await)
	}

	pub fn server_names(&self) -> Vec<&str> {
		self.peers.keys().map(|k| k.as_str()).collect()
	}

	pub fn peer(&self, name: &str) -> Option<&Arc<dyn RemotePeer>> {
		self.peers.get(name)
	}

	fn connected(&self) -> Vec<(&str, &Arc<dyn RemotePeer>)> {
		self.peers
			.iter()
			.filter(|(_, p)| p.is_connected())
			.map(|(name, p)| (name.as_str(), p))
			.collect()
	}

	fn route(&self, path: &str) -> Route<'_> {
		let (server, untagged) = ambiguate(path);
		if server.is_empty() {
			return Route::Untagged(untagged);
		}
		match self.peers.get(&server) {
			Some(peer) => Route::Tagged(peer, untagged),
			None => Route::Unknown(server),
		}
	}

	/// Ask every connected peer at once; first success in name order wins
	async fn first_success<'a, T, F, Fut>(&'a self, op: F) -> OpResult<(String, T)>
	where
		F: Fn(&'a Arc<dyn RemotePeer>) -> Fut,
		Fut: Future<Output = OpResult<T>>,
	{
		let targets = self.connected();
		let results = join_all(targets.iter().map(|(_, peer)| op(*peer))).await;
		let mut last = neg(libc::ENOENT);
		for ((name, _), result) in targets.iter().zip(results) {
			match result {
				Ok(value) => return Ok((name.to_string(), value)),
				Err(e) => last = e,
			}
		}
		Err(last)
	}

	pub async fn getattr(&self, path: &str) -> OpResult<FileStat> {
		match self.route(path) {
			Route::Tagged(peer, p) => peer.getattr(&p).await,
			Route::Unknown(server) => unknown_server(&server),
			Route::Untagged(p) => self.first_success(|peer| peer.getattr(&p)).await.map(|(_, s)| s),
		}
	}

	pub async fn access(&self, path: &str, mask: MaskValue) -> OpResult<()> {
		match self.route(path) {
			Route::Tagged(peer, p) => peer.access(&p, mask).await,
			Route::Unknown(server) => unknown_server(&server),
			Route::Untagged(p) => {
				self.first_success(|peer| peer.access(&p, mask)).await.map(|_| ())
			}
		}
	}

	/// Validate an open and remember which server accepted it
	pub async fn open(&self, path: &str, flags: MaskValue) -> OpResult<FileHandle> {
		match self.route(path) {
			Route::Tagged(peer, p) => {
				peer.open(&p, flags).await?;
				Ok(FileHandle { server: peer.name().to_string() })
			}
			Route::Unknown(server) => unknown_server(&server),
			Route::Untagged(p) => {
				let (server, _) = self.first_success(|peer| peer.open(&p, flags)).await?;
				Ok(FileHandle { server })
			}
		}
	}

	pub async fn read(
		&self,
		path: &str,
		size: SizeValue,
		offset: SizeValue,
		handle: Option<&FileHandle>,
	) -> OpResult<Vec<u8>> {
		match self.route(path) {
			Route::Tagged(peer, p) => peer.read(&p, size, offset).await,
			Route::Unknown(server) => unknown_server(&server),
			Route::Untagged(p) => match handle.and_then(|h| self.peers.get(&h.server)) {
				Some(peer) => peer.read(&p, size, offset).await,
				None => {
					self.first_success(|peer| peer.read(&p, size, offset)).await.map(|(_, d)| d)
				}
			},
		}
	}

	/// Untagged writes try servers one after another and stop at the first
	/// that accepts, so the data lands on exactly one server
	pub async fn write(
		&self,
		path: &str,
		data: &[u8],
		offset: SizeValue,
		handle: Option<&FileHandle>,
	) -> OpResult<SizeValue> {
		match self.route(path) {
			Route::Tagged(peer, p) => peer.write(&p, data, offset).await,
			Route::Unknown(server) => unknown_server(&server),
			Route::Untagged(p) => {
				if let Some(peer) = handle.and_then(|h| self.peers.get(&h.server)) {
					return peer.write(&p, data, offset).await;
				}
				let mut last = neg(libc::ENOENT);
				for (_, peer) in self.connected() {
					match peer.write(&p, data, offset).await {
						Ok(written) => return Ok(written),
						Err(e) => last = e,
					}
				}
				Err(last)
			}
		}
	}

	/// Overwrite an existing file with `data`, starting at offset zero
	///
	/// There is no truncate on the wire, so a remote file longer than `data`
	/// is refused with `-ENOTSUP` rather than left with a stale tail.
	/// Returns the server that took the data and the bytes written.
	pub async fn replace(&self, path: &str, data: &[u8]) -> OpResult<(String, SizeValue)> {
		let handle = self.open(path, libc::O_WRONLY as u32).await?;
		let (_, untagged) = ambiguate(path);
		let peer = self.peers.get(&handle.server).ok_or_else(|| neg(libc::ENOTCONN))?;
		let current = peer.getattr(&untagged).await?;
		if current.size > data.len() as u64 {
			debug!(
				"{} on {} is {} bytes, refusing to write {}",
				untagged,
				handle.server,
				current.size,
				data.len()
			);
			return Err(neg(libc::ENOTSUP));
		}
		let written = peer.write(&untagged, data, 0).await?;
		Ok((handle.server, written))
	}

	/// Merged listing of one directory across servers
	///
	/// Succeeds if any server could list the directory; otherwise the last
	/// error is returned.
	pub async fn readdir(&self, path: &str) -> OpResult<Vec<DirEntry>> {
		let untagged = match self.route(path) {
			Route::Tagged(peer, p) => return peer.readdir(&p).await,
			Route::Unknown(server) => return unknown_server(&server),
			Route::Untagged(p) => p,
		};

		let targets = self.connected();
		let results = join_all(targets.iter().map(|(_, peer)| peer.readdir(&untagged))).await;

		let mut merged = Disambiguator::new();
		let mut listed = false;
		let mut last = neg(libc::ENOENT);
		for ((name, _), result) in targets.iter().zip(results) {
			match result {
				Ok(entries) => {
					listed = true;
					let skipped = merged.add_entries(&entries, name);
					if skipped > 0 {
						warn!("Listing of {} from {} had {} duplicates", untagged, name, skipped);
					}
				}
				Err(e) => {
					debug!("READDIR {} on {} failed: {}", untagged, name, e);
					last = e;
				}
			}
		}
		if !listed {
			return Err(last);
		}
		let entries = merged.disambiguated();
		merged.clear();
		Ok(entries)
	}

	/// Names of the connected servers on which `path` exists
	pub async fn locate(&self, path: &str) -> Vec<String> {
		let (_, untagged) = ambiguate(path);
		let targets = self.connected();
		let probes = targets.iter().map(|(_, peer)| peer.access(&untagged, libc::F_OK as u32));
		let results = join_all(probes).await;
		targets
			.iter()
			.zip(results)
			.filter(|(_, r)| r.is_ok())
			.map(|((name, _), _)| name.to_string())
			.collect()
	}

	/// Stop every connection, then wait for the keepalive loops
	///
	/// Returns true when every connection closed cleanly.
	pub async fn shutdown(&self) -> bool {
		let stops = join_all(self.peers.values().map(|peer| peer.stop())).await;
		let clean = stops.iter().all(|ok| *ok);

		let handles: Vec<JoinHandle<()>> = self.keepalive.lock().await.drain(..).collect();
		for result in join_all(handles).await {
			if let Err(e) = result {
				error!("Keepalive task failed: {}", e);
			}
		}
		info!("Disconnected from {} servers", self.peers.len());
		clean
	}
}

fn unknown_server<T>(server: &str) -> OpResult<T> {
	debug!("No server named {}", server);
	Err(neg(libc::ENOENT))
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	use std::sync::Mutex as StdMutex;

	/// In-memory server holding flat files and directory listings
	struct MockPeer {
		name: String,
		connected: AtomicBool,
		files: StdMutex<BTreeMap<String, Vec<u8>>>,
		listings: BTreeMap<String, Vec<DirEntry>>,
		writes: AtomicUsize,
	}

	fn file_stat(size: usize) -> FileStat {
		FileStat { mode: libc::S_IFREG as u32 | 0o644, size: size as u64, ..FileStat::default() }
	}

	fn dir_stat() -> FileStat {
		FileStat { mode: libc::S_IFDIR as u32 | 0o755, ..FileStat::default() }
	}

	impl MockPeer {
		fn new(name: &str, files: &[(&str, &[u8])]) -> Arc<MockPeer> {
			let mut map = BTreeMap::new();
			let mut root = Vec::new();
			for (path, data) in files {
				map.insert(path.to_string(), data.to_vec());
				root.push(DirEntry {
					name: path.trim_start_matches('/').to_string(),
					stat: file_stat(data.len()),
				});
			}
			root.push(DirEntry { name: "shared".to_string(), stat: dir_stat() });
			let mut listings = BTreeMap::new();
			listings.insert("/".to_string(), root);
			Arc::new(MockPeer {
				name: name.to_string(),
				connected: AtomicBool::new(true),
				files: StdMutex::new(map),
				listings,
				writes: AtomicUsize::new(0),
			})
		}
	}

	#[async_trait]
	impl RemotePeer for MockPeer {
		fn name(&self) -> &str {
			&self.name
		}

		fn is_connected(&self) -> bool {
			self.connected.load(Ordering::SeqCst)
		}

		async fn getattr(&self, path: &str) -> OpResult<FileStat> {
			match self.files.lock().unwrap().get(path) {
				Some(data) => Ok(file_stat(data.len())),
				None => Err(neg(libc::ENOENT)),
			}
		}

		async fn access(&self, path: &str, _mask: MaskValue) -> OpResult<()> {
			self.getattr(path).await.map(|_| ())
		}

		async fn readdir(&self, path: &str) -> OpResult<Vec<DirEntry>> {
			self.listings.get(path).cloned().ok_or(neg(libc::ENOENT))
		}

		async fn read(&self, path: &str, size: SizeValue, offset: SizeValue) -> OpResult<Vec<u8>> {
			let files = self.files.lock().unwrap();
			let data = files.get(path).ok_or(neg(libc::ENOENT))?;
			let start = std::cmp::min(offset as usize, data.len());
			let end = std::cmp::min(start + size as usize, data.len());
			Ok(data[start..end].to_vec())
		}

		async fn write(&self, path: &str, data: &[u8], _offset: SizeValue) -> OpResult<SizeValue> {
			self.writes.fetch_add(1, Ordering::SeqCst);
			let mut files = self.files.lock().unwrap();
			let target = files.get_mut(path).ok_or(neg(libc::ENOENT))?;
			*target = data.to_vec();
			Ok(data.len() as SizeValue)
		}

		async fn open(&self, path: &str, _flags: MaskValue) -> OpResult<()> {
			self.access(path, 0).await
		}

		async fn heartbeat(&self) -> bool {
			self.is_connected()
		}

		async fn stop(&self) -> bool {
			self.connected.store(false, Ordering::SeqCst);
			true
		}
	}

	fn aggregator(peers: Vec<Arc<MockPeer>>) -> Aggregator {
		let mut agg = Aggregator::new();
		for peer in peers {
			agg.add_peer(peer);
		}
		agg
	}

	#[tokio::test]
	async fn test_getattr_takes_any_success() {
		let a = MockPeer::new("serverA", &[]);
		let b = MockPeer::new("serverB", &[("/only-b", b"12345")]);
		let agg = aggregator(vec![a, b]);
		assert_eq!(agg.getattr("/only-b").await.unwrap().size, 5);
		assert_eq!(agg.getattr("/nowhere").await, Err(neg(libc::ENOENT)));
	}

	#[tokio::test]
	async fn test_no_connected_peers_is_enoent() {
		let a = MockPeer::new("serverA", &[("/f", b"x")]);
		a.connected.store(false, Ordering::SeqCst);
		let agg = aggregator(vec![a]);
		assert_eq!(agg.getattr("/f").await, Err(neg(libc::ENOENT)));
		assert_eq!(agg.readdir("/").await, Err(neg(libc::ENOENT)));
	}

	#[tokio::test]
	async fn test_readdir_disambiguates_colliding_files() {
		let a = MockPeer::new("serverA", &[("/a.txt", b"A"), ("/b.txt", b"B")]);
		let b = MockPeer::new("serverB", &[("/a.txt", b"AA")]);
		let agg = aggregator(vec![a, b]);
		let names: Vec<String> = agg.readdir("/").await.unwrap().into_iter().map(|e| e.name).collect();
		assert_eq!(names, vec!["a.txt{:serverA:}", "a.txt{:serverB:}", "b.txt", "shared"]);
	}

	#[tokio::test]
	async fn test_readdir_is_not_cumulative() {
		let a = MockPeer::new("serverA", &[("/a.txt", b"A")]);
		let agg = aggregator(vec![a]);
		let first = agg.readdir("/").await.unwrap();
		let second = agg.readdir("/").await.unwrap();
		assert_eq!(first, second);
	}

	#[tokio::test]
	async fn test_tagged_path_goes_to_named_server() {
		let a = MockPeer::new("serverA", &[("/a.txt", b"from-a")]);
		let b = MockPeer::new("serverB", &[("/a.txt", b"from-b")]);
		let agg = aggregator(vec![a, b]);
		assert_eq!(agg.read("/a.txt{:serverB:}", 64, 0, None).await.unwrap(), b"from-b".to_vec());
		assert_eq!(agg.read("/a.txt", 64, 0, None).await.unwrap(), b"from-a".to_vec());
		assert_eq!(agg.getattr("/a.txt{:serverC:}").await, Err(neg(libc::ENOENT)));
	}

	#[tokio::test]
	async fn test_open_handle_routes_read() {
		let a = MockPeer::new("serverA", &[]);
		let b = MockPeer::new("serverB", &[("/doc", b"bbb")]);
		let agg = aggregator(vec![a, b]);
		let handle = agg.open("/doc", libc::O_RDONLY as u32).await.unwrap();
		assert_eq!(handle, FileHandle { server: "serverB".to_string() });
		assert_eq!(agg.read("/doc", 2, 1, Some(&handle)).await.unwrap(), b"bb".to_vec());
	}

	#[tokio::test]
	async fn test_untagged_write_lands_on_one_server() {
		let a = MockPeer::new("serverA", &[("/f", b"old")]);
		let b = MockPeer::new("serverB", &[("/f", b"old")]);
		let agg = aggregator(vec![a.clone(), b.clone()]);
		assert_eq!(agg.write("/f", b"new", 0, None).await, Ok(3));
		assert_eq!(a.read("/f", 8, 0).await.unwrap(), b"new".to_vec());
		assert_eq!(b.read("/f", 8, 0).await.unwrap(), b"old".to_vec());
		assert_eq!(b.writes.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_locate_lists_holders() {
		let a = MockPeer::new("serverA", &[("/f", b"1")]);
		let b = MockPeer::new("serverB", &[]);
		let c = MockPeer::new("serverC", &[("/f", b"2")]);
		let agg = aggregator(vec![a, b, c]);
		assert_eq!(agg.locate("/f").await, vec!["serverA".to_string(), "serverC".to_string()]);
	}

	#[tokio::test]
	async fn test_duplicate_peer_name_rejected_and_shutdown_stops_all() {
		let a = MockPeer::new("serverA", &[]);
		let mut agg = aggregator(vec![a.clone()]);
		assert!(!agg.add_peer(MockPeer::new("serverA", &[])));
		assert_eq!(agg.server_names(), vec!["serverA"]);
		assert!(agg.shutdown().await);
		assert!(!a.is_connected());
	}

	#[tokio::test]
	async fn test_readdir_keeps_entries_after_a_duplicate() {
		let a = MockPeer::new("serverA", &[("/a", b"1"), ("/a", b"1"), ("/z", b"2")]);
		let b = MockPeer::new("serverB", &[("/z", b"3")]);
		let agg = aggregator(vec![a, b]);
		let names: Vec<String> = agg.readdir("/").await.unwrap().into_iter().map(|e| e.name).collect();
		assert_eq!(names, vec!["a", "shared", "z{:serverA:}", "z{:serverB:}"]);
	}

	#[tokio::test]
	async fn test_replace_refuses_to_leave_a_stale_tail() {
		let a = MockPeer::new("serverA", &[("/f", b"0123456789")]);
		let agg = aggregator(vec![a.clone()]);
		assert_eq!(agg.replace("/f", b"short").await, Err(-(libc::ENOTSUP as i64)));
		assert_eq!(a.writes.load(Ordering::SeqCst), 0);

		let (server, written) = agg.replace("/f", b"abcdefghijkl").await.unwrap();
		assert_eq!(server, "serverA");
		assert_eq!(written, 12);
		assert_eq!(agg.read("/f", 64, 0, None).await.unwrap(), b"abcdefghijkl".to_vec());
		assert_eq!(agg.replace("/missing", b"x").await, Err(-(libc::ENOENT as i64)));
	}
}

// vim: ts=4
