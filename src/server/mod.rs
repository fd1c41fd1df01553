//! AgFS server
//!
//! Listens on TCP and spawns one task per accepted connection. Sessions do
//! not share mutable state; the key list, user directory and settings are
//! read-only and shared through `Arc`.

pub mod handler;
pub mod path;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::AgfsError;
use crate::keys::AuthorizedKeys;
use crate::logging::*;
use crate::users::UserDirectory;

pub use handler::RequestHandler;
pub use session::Session;

pub struct Server {
	listener: TcpListener,
	config: Arc<ServerConfig>,
	keys: Arc<AuthorizedKeys>,
	users: Arc<dyn UserDirectory>,
}

impl Server {
	/// Bind the listening socket named by `config.bind`
	pub async fn bind(
		config: ServerConfig,
		keys: AuthorizedKeys,
		users: Arc<dyn UserDirectory>,
	) -> Result<Server, AgfsError> {
		let listener = TcpListener::bind(&config.bind).await.map_err(|e| AgfsError::Other {
			message: format!("Cannot listen on {}: {}", config.bind, e),
		})?;
		if keys.is_empty() {
			warn!("Authorized key list is empty; every handshake will be refused");
		}
		Ok(Server { listener, config: Arc::new(config), keys: Arc::new(keys), users })
	}

	pub fn local_addr(&self) -> Result<SocketAddr, AgfsError> {
		Ok(self.listener.local_addr()?)
	}

	/// Accept connections forever
	pub async fn run(self) -> Result<(), AgfsError> {
		info!("Listening on {}", self.local_addr()?);
		loop {
			let (socket, peer) = match self.listener.accept().await {
				Ok(accepted) => accepted,
				Err(e) => {
					error!("Accept failed: {}", e);
					continue;
				}
			};
			if let Err(e) = socket.set_nodelay(true) {
				debug!("Cannot set TCP_NODELAY for {}: {}", peer, e);
			}

			let session = Session::new(socket, Arc::clone(&self.config));
			let keys = Arc::clone(&self.keys);
			let users = Arc::clone(&self.users);
			info!("[{}] Connection from {}", session.id(), peer);
			tokio::spawn(async move {
				session.run(&keys, users.as_ref()).await;
			});
		}
	}
}

// vim: ts=4
