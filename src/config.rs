//! Configuration for the AgFS server and client
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (TOML, or JSON5 when the extension is `.json`/`.json5`)
//! 3. CLI flags (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::error::AgfsError;
use crate::protocol::types::{
	DEFAULT_MAX_DIR_ENTRIES, DEFAULT_MAX_IO_SIZE, DEFAULT_MAX_PATH_LEN, DEFAULT_PORT,
};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	pub server: ServerConfig,
	pub client: ClientConfig,
}

/// Server side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
	/// Address to listen on
	pub bind: String,

	/// Authorized-key list (`mountRoot user key` per line)
	pub key_list: PathBuf,

	/// Window for one heartbeat; an idle window counts as one miss
	pub read_timeout_ms: u64,

	/// Timeout for reading the rest of a request once its command arrived
	pub io_timeout_ms: u64,

	/// Largest accepted path string
	pub max_path_len: u64,

	/// Largest accepted READ/WRITE payload
	pub max_io_size: u64,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			bind: format!("0.0.0.0:{}", DEFAULT_PORT),
			key_list: PathBuf::from("/var/lib/agfs/keylist.keys"),
			read_timeout_ms: 5_000,
			io_timeout_ms: 10_000,
			max_path_len: DEFAULT_MAX_PATH_LEN,
			max_io_size: DEFAULT_MAX_IO_SIZE,
		}
	}
}

impl ServerConfig {
	pub fn read_timeout(&self) -> Duration {
		Duration::from_millis(self.read_timeout_ms)
	}

	pub fn io_timeout(&self) -> Duration {
		Duration::from_millis(self.io_timeout_ms)
	}
}

/// Client side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
	/// Directory holding `*.agkey` peer files
	pub key_dir: PathBuf,

	/// Pause between heartbeats while connected
	pub heartbeat_interval_ms: u64,

	/// Pause between reconnect attempts while disconnected
	pub reconnect_interval_ms: u64,

	/// Bound on connecting and on each request/response exchange
	pub io_timeout_ms: u64,

	/// Largest path string sent or accepted
	pub max_path_len: u64,

	/// Largest READ/WRITE payload per exchange; bigger requests are split
	pub max_io_size: u64,

	/// Largest number of entries accepted in one READDIR reply
	pub max_dir_entries: u64,
}

impl Default for ClientConfig {
	fn default() -> Self {
		ClientConfig {
			key_dir: default_key_dir(),
			heartbeat_interval_ms: 5_000,
			reconnect_interval_ms: 30_000,
			io_timeout_ms: 10_000,
			max_path_len: DEFAULT_MAX_PATH_LEN,
			max_io_size: DEFAULT_MAX_IO_SIZE,
			max_dir_entries: DEFAULT_MAX_DIR_ENTRIES,
		}
	}
}

impl ClientConfig {
	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_millis(self.heartbeat_interval_ms)
	}

	pub fn reconnect_interval(&self) -> Duration {
		Duration::from_millis(self.reconnect_interval_ms)
	}

	pub fn io_timeout(&self) -> Duration {
		Duration::from_millis(self.io_timeout_ms)
	}
}

fn default_key_dir() -> PathBuf {
	match env::var("HOME") {
		Ok(home) => PathBuf::from(home).join(".agfs"),
		Err(_) => PathBuf::from(".agfs"),
	}
}

impl Config {
	/// Load configuration from a file, picking the format from its extension
	pub fn load(path: &Path) -> Result<Config, AgfsError> {
		let text = fs::read_to_string(path).map_err(|e| AgfsError::Config {
			message: format!("Cannot read {}: {}", path.display(), e),
		})?;
		let config = match path.extension().and_then(|e| e.to_str()) {
			Some("json") | Some("json5") => Self::from_json5(&text)?,
			_ => Self::from_toml(&text)?,
		};
		config.validate()?;
		Ok(config)
	}

	pub fn from_toml(text: &str) -> Result<Config, AgfsError> {
		toml::from_str(text).map_err(|e| AgfsError::Config { message: e.to_string() })
	}

	pub fn from_json5(text: &str) -> Result<Config, AgfsError> {
		json5::from_str(text).map_err(|e| AgfsError::Config { message: e.to_string() })
	}

	/// Reject settings that would make a session unusable
	pub fn validate(&self) -> Result<(), AgfsError> {
		let checks: [(&str, u64); 9] = [
			("server.readTimeoutMs", self.server.read_timeout_ms),
			("server.ioTimeoutMs", self.server.io_timeout_ms),
			("server.maxPathLen", self.server.max_path_len),
			("server.maxIoSize", self.server.max_io_size),
			("client.heartbeatIntervalMs", self.client.heartbeat_interval_ms),
			("client.reconnectIntervalMs", self.client.reconnect_interval_ms),
			("client.ioTimeoutMs", self.client.io_timeout_ms),
			("client.maxPathLen", self.client.max_path_len),
			("client.maxIoSize", self.client.max_io_size),
		];
		for (name, value) in checks.iter() {
			if *value == 0 {
				return Err(AgfsError::Config { message: format!("{} must be positive", name) });
			}
		}
		if self.server.bind.is_empty() {
			return Err(AgfsError::Config { message: "server.bind is empty".to_string() });
		}
		Ok(())
	}
}


// vim: ts=4
