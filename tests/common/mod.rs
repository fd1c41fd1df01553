//! Shared fixtures for the loopback tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

use agfs::config::{ClientConfig, ServerConfig};
use agfs::keys::{AuthorizedKey, AuthorizedKeys, PeerEntry};
use agfs::server::Server;
use agfs::users::{LocalUser, UserDirectory};

/// Resolves "tester" to the account running the tests
pub struct TestUsers;

impl UserDirectory for TestUsers {
	fn lookup(&self, name: &str) -> Option<LocalUser> {
		if name != "tester" {
			return None;
		}
		Some(LocalUser {
			name: name.to_string(),
			uid: nix::unistd::geteuid().as_raw(),
			gid: nix::unistd::getegid().as_raw(),
		})
	}
}

pub fn key(root: &Path, user: &str, key: &str) -> AuthorizedKey {
	AuthorizedKey { mount_root: root.to_path_buf(), user: user.to_string(), key: key.to_string() }
}

pub fn server_config(read_timeout_ms: u64) -> ServerConfig {
	ServerConfig { bind: "127.0.0.1:0".to_string(), read_timeout_ms, ..ServerConfig::default() }
}

/// Start a server on an ephemeral loopback port
pub async fn start_server(
	config: ServerConfig,
	keys: Vec<AuthorizedKey>,
) -> (SocketAddr, JoinHandle<()>) {
	let server = Server::bind(config, AuthorizedKeys::new(keys), Arc::new(TestUsers)).await.unwrap();
	let addr = server.local_addr().unwrap();
	let task = tokio::spawn(async move {
		let _ = server.run().await;
	});
	(addr, task)
}

pub fn peer(hostname: &str, addr: SocketAddr, key: &str) -> PeerEntry {
	PeerEntry { hostname: hostname.to_string(), port: addr.port(), key: key.to_string() }
}

/// Keepalive slow enough to stay out of the way
pub fn client_config() -> ClientConfig {
	ClientConfig {
		heartbeat_interval_ms: 60_000,
		reconnect_interval_ms: 60_000,
		io_timeout_ms: 2_000,
		..ClientConfig::default()
	}
}

// vim: ts=4
