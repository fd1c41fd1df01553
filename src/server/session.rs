//! Per-connection driver: handshake, then the active command loop

use std::sync::Arc;
use tokio::fs as afs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::time::timeout;
use uuid::Uuid;

use super::handler::RequestHandler;
use crate::config::ServerConfig;
use crate::error::HandshakeFailure;
use crate::keys::AuthorizedKeys;
use crate::logging::*;
use crate::protocol::codec;
use crate::protocol::error::ProtocolResult;
use crate::protocol::session::{send_handshake_reply, HeartbeatMonitor, SessionState};
use crate::protocol::types::Command;
use crate::users::UserDirectory;

/// One accepted connection, owned by the task that drives it
pub struct Session<S> {
	id: Uuid,
	stream: BufStream<S>,
	config: Arc<ServerConfig>,
	state: SessionState,
	heartbeat: HeartbeatMonitor,
}

impl<S> Session<S>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	pub fn new(stream: S, config: Arc<ServerConfig>) -> Self {
		Self {
			id: Uuid::new_v4(),
			stream: BufStream::new(stream),
			config,
			state: SessionState::Connecting,
			heartbeat: HeartbeatMonitor::default(),
		}
	}

	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	/// Drive the session to completion and return its final state
	pub async fn run(mut self, keys: &AuthorizedKeys, users: &dyn UserDirectory) -> SessionState {
		self.state = SessionState::Authenticating;
		let handler = match self.authenticate(keys, users).await {
			Ok(Ok(handler)) => handler,
			Ok(Err(failure)) => {
				info!("[{}] Handshake refused: {}", self.id, failure);
				return self.close().await;
			}
			Err(e) => {
				debug!("[{}] Handshake aborted: {}", self.id, e);
				return self.close().await;
			}
		};

		self.state = SessionState::Active;
		info!("[{}] Session active for {} at {}", self.id, handler.user(), handler.root().display());
		if let Err(e) = self.serve(&handler).await {
			warn!("[{}] Closing session: {}", self.id, e);
		}
		self.close().await
	}

	async fn close(&mut self) -> SessionState {
		let _ = self.stream.shutdown().await;
		self.state = SessionState::Closed;
		debug!("[{}] Session closed", self.id);
		self.state
	}

	/// Read the key token and answer it with exactly one handshake reply
	async fn authenticate(
		&mut self,
		keys: &AuthorizedKeys,
		users: &dyn UserDirectory,
	) -> ProtocolResult<Result<RequestHandler, HandshakeFailure>> {
		let key = timeout(self.config.read_timeout(), codec::read_key(&mut self.stream)).await??;

		let decision = match keys.find(&key) {
			None => Err(HandshakeFailure::InvalidKey),
			Some(entry) => match users.lookup(&entry.user) {
				None => Err(HandshakeFailure::UserNotFound),
				Some(user) => match afs::canonicalize(&entry.mount_root).await {
					Ok(root) if root.is_dir() => Ok(RequestHandler::new(
						root,
						user,
						self.config.max_path_len,
						self.config.max_io_size,
					)),
					_ => Err(HandshakeFailure::MountNotFound),
				},
			},
		};

		let reply = match &decision {
			Ok(_) => Command::Accept,
			Err(failure) => failure.reply(),
		};
		send_handshake_reply(&mut self.stream, reply).await?;
		Ok(decision)
	}

	/// Active loop; returns `Ok` on STOP, EOF or heartbeat expiry
	async fn serve(&mut self, handler: &RequestHandler) -> ProtocolResult<()> {
		let read_timeout = self.config.read_timeout();
		let io_timeout = self.config.io_timeout();

		loop {
			// Wait for the next command without consuming it, so a timeout
			// never splits a command in half.
			match timeout(read_timeout, self.stream.fill_buf()).await {
				Err(_) => {
					if self.heartbeat.record_miss() {
						warn!(
							"[{}] {} heartbeats missed, closing",
							self.id,
							self.heartbeat.missed()
						);
						return Ok(());
					}
					debug!("[{}] Heartbeat missed ({})", self.id, self.heartbeat.missed());
					continue;
				}
				Ok(Err(e)) => return Err(e.into()),
				Ok(Ok(buf)) if buf.is_empty() => {
					info!("[{}] Client disconnected", self.id);
					return Ok(());
				}
				Ok(Ok(_)) => {}
			}

			let cmd = match timeout(io_timeout, codec::read_command(&mut self.stream)).await? {
				Ok(cmd) => cmd,
				Err(e) if !e.is_fatal() => {
					warn!("[{}] Ignoring request: {}", self.id, e);
					continue;
				}
				Err(e) => return Err(e),
			};

			match cmd {
				Command::Heartbeat => {
					self.heartbeat.record_beat();
					codec::write_command(&mut self.stream, Command::Heartbeat).await?;
					self.stream.flush().await?;
				}
				Command::Stop => {
					info!("[{}] Client requested stop", self.id);
					return Ok(());
				}
				Command::GetAttr
				| Command::Access
				| Command::ReadDir
				| Command::Read
				| Command::Write
				| Command::Open => {
					trace!("[{}] {}", self.id, cmd);
					timeout(io_timeout, handler.dispatch(cmd, &mut self.stream)).await??;
				}
				other => {
					warn!("[{}] Ignoring {} outside handshake", self.id, other);
				}
			}
		}
	}
}


// vim: ts=4
