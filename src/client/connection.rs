//! Client connection to one AgFS server
//!
//! A `ServerConnection` is a monitor around one TCP session: every operation
//! holds the connection mutex for its whole request/response exchange, so
//! callers sharing a connection take turns while different connections run
//! in parallel. Transport failures drop the socket and surface as negative
//! error codes; the keepalive task brings the session back later.

use async_trait::async_trait;
use std::cmp::min;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::peer::RemotePeer;
use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::keys::PeerEntry;
use crate::logging::*;
use crate::protocol::codec;
use crate::protocol::error::{LengthKind, ProtocolError, ProtocolResult};
use crate::protocol::session::{client_handshake, HandshakeOutcome};
use crate::protocol::types::*;

type Stream = BufStream<TcpStream>;

/// Peer object for one remote server
pub struct ServerConnection {
	entry: PeerEntry,
	config: ClientConfig,
	stream: Mutex<Option<Stream>>,
	connected: AtomicBool,
	stopped: AtomicBool,
	stop_signal: watch::Sender<bool>,
}

impl ServerConnection {
	pub fn new(entry: PeerEntry, config: ClientConfig) -> Self {
		let (stop_signal, _) = watch::channel(false);
		Self {
			entry,
			config,
			stream: Mutex::new(None),
			connected: AtomicBool::new(false),
			stopped: AtomicBool::new(false),
			stop_signal,
		}
	}

	pub fn entry(&self) -> &PeerEntry {
		&self.entry
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	/// Open a fresh TCP session and authenticate, replacing any previous one
	pub async fn connect(&self) -> Result<(), ConnectionError> {
		if self.is_stopped() {
			return Err(ConnectionError::Stopped);
		}
		let address = self.entry.address();
		let io_timeout = self.config.io_timeout();

		let socket = timeout(io_timeout, TcpStream::connect(&address))
			.await
			.map_err(|_| ConnectionError::Timeout)?
			.map_err(|source| ConnectionError::Connect { address: address.clone(), source })?;
		if let Err(e) = socket.set_nodelay(true) {
			debug!("Cannot set TCP_NODELAY for {}: {}", address, e);
		}
		let mut stream = BufStream::new(socket);

		let outcome = timeout(io_timeout, client_handshake(&mut stream, &self.entry.key))
			.await
			.map_err(|_| ConnectionError::Timeout)??;
		match outcome {
			HandshakeOutcome::Accepted => {
				let mut guard = self.stream.lock().await;
				if self.is_stopped() {
					drop(guard);
					let _ = stream.shutdown().await;
					return Err(ConnectionError::Stopped);
				}
				*guard = Some(stream);
				self.connected.store(true, Ordering::SeqCst);
				info!("Connected to {}", address);
				Ok(())
			}
			HandshakeOutcome::Rejected(reason) => {
				let _ = stream.shutdown().await;
				Err(ConnectionError::Handshake { server: self.entry.hostname.clone(), reason })
			}
		}
	}

	fn check_path(&self, path: &str) -> OpResult<()> {
		if path.len() as u64 > self.config.max_path_len {
			Err(neg(libc::ENAMETOOLONG))
		} else {
			Ok(())
		}
	}

	/// Resolve the outcome of one exchange; a transport failure drops the socket
	fn settle<T>(
		&self,
		slot: &mut Option<Stream>,
		result: Result<ProtocolResult<OpResult<T>>, tokio::time::error::Elapsed>,
	) -> OpResult<T> {
		let err = match result {
			Ok(Ok(reply)) => return reply,
			Ok(Err(e)) => e,
			Err(elapsed) => ProtocolError::from(elapsed),
		};
		warn!("Connection to {} lost: {}", self.entry.hostname, err);
		*slot = None;
		self.connected.store(false, Ordering::SeqCst);
		Err(err.errno())
	}

	/// Spawn the heartbeat/reconnect loop; it ends once `stop` is called
	pub fn spawn_keepalive(self: &Arc<Self>) -> JoinHandle<()> {
		let conn = Arc::clone(self);
		let mut stop_rx = self.stop_signal.subscribe();
		tokio::spawn(async move {
			loop {
				let pause = if conn.is_connected() {
					conn.config.heartbeat_interval()
				} else {
					conn.config.reconnect_interval()
				};
				tokio::select! {
					_ = sleep(pause) => {}
					_ = stop_rx.changed() => {}
				}
				if conn.is_stopped() {
					break;
				}
				if conn.is_connected() {
					if !conn.heartbeat().await {
						warn!("Heartbeat to {} failed", conn.entry.hostname);
					}
				} else if let Err(e) = conn.connect().await {
					debug!("Reconnect to {} failed: {}", conn.entry.hostname, e);
				}
			}
			debug!("Keepalive for {} stopped", conn.entry.hostname);
		})
	}
}

#[async_trait]
impl RemotePeer for ServerConnection {
	fn name(&self) -> &str {
		&self.entry.hostname
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	async fn getattr(&self, path: &str) -> OpResult<FileStat> {
		self.check_path(path)?;
		let mut guard = self.stream.lock().await;
		let stream = guard.as_mut().ok_or_else(|| neg(libc::ENOTCONN))?;
		let result = timeout(self.config.io_timeout(), request_getattr(stream, path)).await;
		self.settle(&mut guard, result)
	}

	async fn access(&self, path: &str, mask: MaskValue) -> OpResult<()> {
		self.check_path(path)?;
		let mut guard = self.stream.lock().await;
		let stream = guard.as_mut().ok_or_else(|| neg(libc::ENOTCONN))?;
		let result = timeout(self.config.io_timeout(), request_access(stream, path, mask)).await;
		self.settle(&mut guard, result)
	}

	async fn readdir(&self, path: &str) -> OpResult<Vec<DirEntry>> {
		self.check_path(path)?;
		let mut guard = self.stream.lock().await;
		let stream = guard.as_mut().ok_or_else(|| neg(libc::ENOTCONN))?;
		let request = request_readdir(stream, path, &self.config);
		let result = timeout(self.config.io_timeout(), request).await;
		self.settle(&mut guard, result)
	}

	/// Requests above `maxIoSize` are split into several exchanges
	///
	/// At least one exchange is made, so a zero-sized read still reports
	/// a missing or forbidden path.
	async fn read(&self, path: &str, size: SizeValue, offset: SizeValue) -> OpResult<Vec<u8>> {
		self.check_path(path)?;
		let mut guard = self.stream.lock().await;
		let mut data = Vec::new();
		loop {
			let stream = guard.as_mut().ok_or_else(|| neg(libc::ENOTCONN))?;
			let want = min(size - data.len() as u64, self.config.max_io_size);
			let at = match offset.checked_add(data.len() as u64) {
				Some(at) => at,
				None => break,
			};
			let result = timeout(self.config.io_timeout(), request_read(stream, path, want, at)).await;
			match self.settle(&mut guard, result) {
				Ok(chunk) => {
					let short = (chunk.len() as u64) < want;
					data.extend_from_slice(&chunk);
					if short || data.len() as u64 >= size {
						break;
					}
				}
				Err(e) if data.is_empty() => return Err(e),
				Err(_) => break,
			}
		}
		Ok(data)
	}

	/// Writes above `maxIoSize` are split into several exchanges
	async fn write(&self, path: &str, data: &[u8], offset: SizeValue) -> OpResult<SizeValue> {
		self.check_path(path)?;
		let mut guard = self.stream.lock().await;
		let mut written: u64 = 0;
		loop {
			let stream = guard.as_mut().ok_or_else(|| neg(libc::ENOTCONN))?;
			let start = written as usize;
			let end = min(data.len(), start + self.config.max_io_size as usize);
			let chunk = &data[start..end];
			let at = match offset.checked_add(written) {
				Some(at) => at,
				None => break,
			};
			let result = timeout(self.config.io_timeout(), request_write(stream, path, chunk, at)).await;
			match self.settle(&mut guard, result) {
				Ok(n) => {
					let n = min(n, chunk.len() as u64);
					written += n;
					if n < chunk.len() as u64 || written as usize >= data.len() {
						break;
					}
				}
				Err(e) if written == 0 => return Err(e),
				Err(_) => break,
			}
		}
		Ok(written)
	}

	async fn open(&self, path: &str, flags: MaskValue) -> OpResult<()> {
		self.check_path(path)?;
		let mut guard = self.stream.lock().await;
		let stream = guard.as_mut().ok_or_else(|| neg(libc::ENOTCONN))?;
		let result = timeout(self.config.io_timeout(), request_open(stream, path, flags)).await;
		self.settle(&mut guard, result)
	}

	async fn heartbeat(&self) -> bool {
		let mut guard = self.stream.lock().await;
		let stream = match guard.as_mut() {
			Some(s) => s,
			None => return false,
		};
		let result = timeout(self.config.io_timeout(), request_heartbeat(stream)).await;
		self.settle(&mut guard, result).is_ok()
	}

	async fn stop(&self) -> bool {
		self.stopped.store(true, Ordering::SeqCst);
		let _ = self.stop_signal.send(true);
		let mut guard = self.stream.lock().await;
		self.connected.store(false, Ordering::SeqCst);
		let mut stream = match guard.take() {
			Some(s) => s,
			None => return true,
		};
		let closed = timeout(self.config.io_timeout(), async {
			codec::write_command(&mut stream, Command::Stop).await?;
			stream.flush().await?;
			stream.shutdown().await?;
			Ok::<(), ProtocolError>(())
		})
		.await;
		match closed {
			Ok(Ok(())) => {
				info!("Disconnected from {}", self.entry.hostname);
				true
			}
			Ok(Err(e)) => {
				warn!("Closing {} failed: {}", self.entry.hostname, e);
				false
			}
			Err(_) => {
				warn!("Closing {} timed out", self.entry.hostname);
				false
			}
		}
	}
}

// === Wire exchanges ===
//
// Each returns `Ok(Err(code))` for a server-side error reply and `Err(_)`
// only when the stream can no longer be trusted.

async fn finish_request<S>(stream: &mut S) -> ProtocolResult<ErrorCode>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	stream.flush().await?;
	codec::read_error(stream).await
}

pub(crate) async fn request_getattr<S>(stream: &mut S, path: &str) -> ProtocolResult<OpResult<FileStat>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	codec::write_command(stream, Command::GetAttr).await?;
	codec::write_string(stream, path).await?;
	let err = finish_request(stream).await?;
	if err < 0 {
		return Ok(Err(err));
	}
	Ok(Ok(codec::read_stat(stream).await?))
}

pub(crate) async fn request_access<S>(
	stream: &mut S,
	path: &str,
	mask: MaskValue,
) -> ProtocolResult<OpResult<()>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	codec::write_command(stream, Command::Access).await?;
	codec::write_string(stream, path).await?;
	codec::write_mask(stream, mask).await?;
	let err = finish_request(stream).await?;
	Ok(if err < 0 { Err(err) } else { Ok(()) })
}

pub(crate) async fn request_readdir<S>(
	stream: &mut S,
	path: &str,
	config: &ClientConfig,
) -> ProtocolResult<OpResult<Vec<DirEntry>>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	codec::write_command(stream, Command::ReadDir).await?;
	codec::write_string(stream, path).await?;
	let err = finish_request(stream).await?;
	if err < 0 {
		return Ok(Err(err));
	}
	let count = codec::read_size(stream).await?;
	if count > config.max_dir_entries {
		return Err(ProtocolError::LengthExceeded {
			kind: LengthKind::Payload,
			len: count,
			max: config.max_dir_entries,
		});
	}
	let mut entries = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let name = codec::read_string(stream, config.max_path_len).await?;
		let stat = codec::read_stat(stream).await?;
		entries.push(DirEntry { name, stat });
	}
	Ok(Ok(entries))
}

pub(crate) async fn request_read<S>(
	stream: &mut S,
	path: &str,
	size: SizeValue,
	offset: SizeValue,
) -> ProtocolResult<OpResult<Vec<u8>>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	codec::write_command(stream, Command::Read).await?;
	codec::write_string(stream, path).await?;
	codec::write_size(stream, size).await?;
	codec::write_size(stream, offset).await?;
	let err = finish_request(stream).await?;
	if err < 0 {
		return Ok(Err(err));
	}
	let count = codec::read_size(stream).await?;
	Ok(Ok(codec::read_bounded(stream, count, size).await?))
}

pub(crate) async fn request_write<S>(
	stream: &mut S,
	path: &str,
	data: &[u8],
	offset: SizeValue,
) -> ProtocolResult<OpResult<SizeValue>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	codec::write_command(stream, Command::Write).await?;
	codec::write_string(stream, path).await?;
	codec::write_size(stream, data.len() as SizeValue).await?;
	codec::write_size(stream, offset).await?;
	let err = finish_request(stream).await?;
	if err < 0 {
		return Ok(Err(err));
	}
	stream.write_all(data).await?;
	let err = finish_request(stream).await?;
	if err < 0 {
		return Ok(Err(err));
	}
	Ok(Ok(codec::read_size(stream).await?))
}

pub(crate) async fn request_open<S>(
	stream: &mut S,
	path: &str,
	flags: MaskValue,
) -> ProtocolResult<OpResult<()>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	codec::write_command(stream, Command::Open).await?;
	codec::write_string(stream, path).await?;
	codec::write_mask(stream, flags).await?;
	let err = finish_request(stream).await?;
	Ok(if err < 0 { Err(err) } else { Ok(()) })
}

pub(crate) async fn request_heartbeat<S>(stream: &mut S) -> ProtocolResult<OpResult<()>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	codec::write_command(stream, Command::Heartbeat).await?;
	stream.flush().await?;
	match codec::read_command(stream).await? {
		Command::Heartbeat => Ok(Ok(())),
		other => Err(ProtocolError::ProtocolViolation(format!("expected HEARTBEAT, got {}", other))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tokio::io::{duplex, AsyncReadExt};
	use tokio::net::TcpListener;

	fn entry(port: u16) -> PeerEntry {
		PeerEntry { hostname: "127.0.0.1".to_string(), port, key: "K".to_string() }
	}

	#[tokio::test]
	async fn test_operations_fail_with_enotconn_when_disconnected() {
		let conn = ServerConnection::new(entry(1), ClientConfig::default());
		assert!(!conn.is_connected());
		assert_eq!(conn.getattr("/x").await, Err(-(libc::ENOTCONN as i64)));
		assert_eq!(conn.read("/x", 10, 0).await, Err(-(libc::ENOTCONN as i64)));
		assert!(!conn.heartbeat().await);
		assert!(conn.stop().await);
		assert!(matches!(conn.connect().await, Err(ConnectionError::Stopped)));
	}

	#[tokio::test]
	async fn test_long_path_refused_locally() {
		let config = ClientConfig { max_path_len: 8, ..ClientConfig::default() };
		let conn = ServerConnection::new(entry(1), config);
		assert_eq!(conn.getattr("/much/too/long").await, Err(-(libc::ENAMETOOLONG as i64)));
	}

	#[tokio::test]
	async fn test_connect_refused_reports_address() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);
		let conn = ServerConnection::new(entry(port), ClientConfig::default());
		match conn.connect().await {
			Err(ConnectionError::Connect { address, .. }) => assert!(address.ends_with(&port.to_string())),
			other => panic!("unexpected {:?}", other.err()),
		}
	}

	#[tokio::test]
	async fn test_rejected_handshake() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			let _ = codec::read_key(&mut socket).await;
			let _ = codec::write_command(&mut socket, Command::InvalidKey).await;
		});
		let conn = ServerConnection::new(entry(port), ClientConfig::default());
		match conn.connect().await {
			Err(ConnectionError::Handshake { reason, .. }) => {
				assert_eq!(reason, crate::error::HandshakeFailure::InvalidKey)
			}
			other => panic!("unexpected {:?}", other.err()),
		}
		assert!(!conn.is_connected());
	}

	#[tokio::test]
	async fn test_request_read_against_scripted_server() {
		let (mut client, mut server) = duplex(4096);
		let script = tokio::spawn(async move {
			assert_eq!(codec::read_command(&mut server).await.unwrap(), Command::Read);
			assert_eq!(codec::read_string(&mut server, 64).await.unwrap(), "/f");
			assert_eq!(codec::read_size(&mut server).await.unwrap(), 8);
			assert_eq!(codec::read_size(&mut server).await.unwrap(), 100);
			codec::write_error(&mut server, 3).await.unwrap();
			codec::write_size(&mut server, 3).await.unwrap();
			server.write_all(b"abc").await.unwrap();
		});
		let data = request_read(&mut client, "/f", 8, 100).await.unwrap();
		assert_eq!(data, Ok(b"abc".to_vec()));
		script.await.unwrap();
	}

	#[tokio::test]
	async fn test_request_read_rejects_oversized_reply() {
		let (mut client, mut server) = duplex(4096);
		tokio::spawn(async move {
			let mut request = [0u8; 2 + 8 + 2 + 8 + 8];
			server.read_exact(&mut request).await.unwrap();
			codec::write_error(&mut server, 0).await.unwrap();
			codec::write_size(&mut server, 1 << 40).await.unwrap();
		});
		assert!(request_read(&mut client, "/f", 8, 0).await.is_err());
	}

	#[tokio::test]
	async fn test_request_write_stops_after_first_error() {
		let (mut client, mut server) = duplex(4096);
		let script = tokio::spawn(async move {
			let _ = codec::read_command(&mut server).await;
			let _ = codec::read_string(&mut server, 64).await;
			let _ = codec::read_size(&mut server).await;
			let _ = codec::read_size(&mut server).await;
			codec::write_error(&mut server, -(libc::EACCES as i64)).await.unwrap();
			// Anything further from the client would be a protocol error
			let mut rest = Vec::new();
			server.read_to_end(&mut rest).await.unwrap();
			assert!(rest.is_empty());
		});
		let result = request_write(&mut client, "/f", b"data", 0).await.unwrap();
		assert_eq!(result, Err(-(libc::EACCES as i64)));
		drop(client);
		script.await.unwrap();
	}

	#[tokio::test]
	async fn test_keepalive_exits_on_stop() {
		let config = ClientConfig {
			heartbeat_interval_ms: 10,
			reconnect_interval_ms: 10,
			..ClientConfig::default()
		};
		let conn = Arc::new(ServerConnection::new(entry(1), config));
		let task = conn.spawn_keepalive();
		sleep(Duration::from_millis(30)).await;
		assert!(conn.stop().await);
		timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn test_stop_during_handshake_closes_the_new_socket() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		let server = tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			codec::read_key(&mut socket).await.unwrap();
			sleep(Duration::from_millis(200)).await;
			let _ = codec::write_command(&mut socket, Command::Accept).await;
			let mut rest = Vec::new();
			let _ = socket.read_to_end(&mut rest).await;
		});
		let conn = Arc::new(ServerConnection::new(entry(port), ClientConfig::default()));
		let connecting = {
			let conn = Arc::clone(&conn);
			tokio::spawn(async move { conn.connect().await })
		};
		sleep(Duration::from_millis(50)).await;
		assert!(conn.stop().await);

		assert!(matches!(connecting.await.unwrap(), Err(ConnectionError::Stopped)));
		assert!(!conn.is_connected());
		assert!(conn.stream.lock().await.is_none());
		timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn test_zero_sized_read_still_asks_the_server() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			codec::read_key(&mut socket).await.unwrap();
			codec::write_command(&mut socket, Command::Accept).await.unwrap();
			assert_eq!(codec::read_command(&mut socket).await.unwrap(), Command::Read);
			assert_eq!(codec::read_string(&mut socket, 64).await.unwrap(), "/missing");
			assert_eq!(codec::read_size(&mut socket).await.unwrap(), 0);
			assert_eq!(codec::read_size(&mut socket).await.unwrap(), 0);
			codec::write_error(&mut socket, -(libc::ENOENT as i64)).await.unwrap();
			let mut rest = Vec::new();
			let _ = socket.read_to_end(&mut rest).await;
		});
		let conn = ServerConnection::new(entry(port), ClientConfig::default());
		conn.connect().await.unwrap();
		assert_eq!(conn.read("/missing", 0, 0).await, Err(-(libc::ENOENT as i64)));
		assert!(conn.is_connected());
	}

	#[tokio::test]
	async fn test_write_stops_at_the_end_of_the_offset_range() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			codec::read_key(&mut socket).await.unwrap();
			codec::write_command(&mut socket, Command::Accept).await.unwrap();
			assert_eq!(codec::read_command(&mut socket).await.unwrap(), Command::Write);
			codec::read_string(&mut socket, 64).await.unwrap();
			assert_eq!(codec::read_size(&mut socket).await.unwrap(), 2);
			assert_eq!(codec::read_size(&mut socket).await.unwrap(), u64::MAX - 1);
			codec::write_error(&mut socket, 0).await.unwrap();
			let mut chunk = [0u8; 2];
			socket.read_exact(&mut chunk).await.unwrap();
			codec::write_error(&mut socket, 0).await.unwrap();
			codec::write_size(&mut socket, 2).await.unwrap();
			let mut rest = Vec::new();
			let _ = socket.read_to_end(&mut rest).await;
		});
		let config = ClientConfig { max_io_size: 2, ..ClientConfig::default() };
		let conn = ServerConnection::new(entry(port), config);
		conn.connect().await.unwrap();
		assert_eq!(conn.write("/f", b"abcd", u64::MAX - 1).await, Ok(2));
		assert!(conn.is_connected());
	}
}

// vim: ts=4
