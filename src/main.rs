use clap::{Arg, ArgAction, ArgMatches, Command};
use std::convert::TryFrom;
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs as afs;

use agfs::client::Aggregator;
use agfs::config::Config;
use agfs::keys::AuthorizedKeys;
use agfs::logging::*;
use agfs::protocol::ErrorCode;
use agfs::server::Server;
use agfs::users::SystemUserDirectory;

///////////////////////
// Utility functions //
///////////////////////

fn errno_message(path: &str, code: ErrorCode) -> String {
	let errno = code.checked_neg().and_then(|c| i32::try_from(c).ok()).unwrap_or(libc::EIO);
	format!("{}: {}", path, io::Error::from_raw_os_error(errno))
}

fn load_config(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
	let mut config = match matches.get_one::<String>("config") {
		Some(path) => Config::load(&PathBuf::from(path))?,
		None => Config::default(),
	};
	if let Some(dir) = matches.get_one::<String>("key-dir") {
		config.client.key_dir = PathBuf::from(dir);
	}
	Ok(config)
}

async fn serve(mut config: Config, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	if let Some(bind) = matches.get_one::<String>("bind") {
		config.server.bind = bind.clone();
	}
	if let Some(keys) = matches.get_one::<String>("keys") {
		config.server.key_list = PathBuf::from(keys);
	}
	config.validate()?;

	let keys = AuthorizedKeys::load(&config.server.key_list).map_err(|e| {
		format!("Cannot read key list {}: {}", config.server.key_list.display(), e)
	})?;
	let server = Server::bind(config.server, keys, Arc::new(SystemUserDirectory)).await?;

	tokio::select! {
		result = server.run() => result?,
		_ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
	}
	Ok(())
}

async fn client_command(
	config: Config,
	name: &str,
	matches: &ArgMatches,
) -> Result<(), Box<dyn Error>> {
	let fs = Aggregator::load(&config.client).await?;
	let result = run_client_command(&fs, &config, name, matches).await;
	if !fs.shutdown().await {
		warn!("Some servers did not close cleanly");
	}
	result
}

async fn run_client_command(
	fs: &Aggregator,
	config: &Config,
	name: &str,
	matches: &ArgMatches,
) -> Result<(), Box<dyn Error>> {
	let path = matches.get_one::<String>("path").ok_or("path argument required")?;
	let json = matches.try_get_one::<bool>("json").ok().flatten().copied().unwrap_or(false);
	let mut out = io::stdout();

	match name {
		"stat" => {
			let stat = fs.getattr(path).await.map_err(|e| errno_message(path, e))?;
			if json {
				writeln!(out, "{}", serde_json::to_string_pretty(&stat)?)?;
			} else {
				writeln!(
					out,
					"mode {:o}  size {}  mtime {}  dev {}",
					stat.mode, stat.size, stat.mtime, stat.dev
				)?;
				let holders = fs.locate(path).await;
				writeln!(out, "servers: {}", holders.join(", "))?;
			}
		}
		"ls" => {
			let entries = fs.readdir(path).await.map_err(|e| errno_message(path, e))?;
			if json {
				writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
			} else {
				for entry in &entries {
					let kind = if entry.stat.is_dir() { 'd' } else { '-' };
					writeln!(out, "{} {:>12} {}", kind, entry.stat.size, entry.name)?;
				}
			}
		}
		"cat" => {
			let handle = fs
				.open(path, libc::O_RDONLY as u32)
				.await
				.map_err(|e| errno_message(path, e))?;
			let mut offset = 0u64;
			loop {
				let chunk = fs
					.read(path, config.client.max_io_size, offset, Some(&handle))
					.await
					.map_err(|e| errno_message(path, e))?;
				if chunk.is_empty() {
					break;
				}
				out.write_all(&chunk)?;
				offset += chunk.len() as u64;
			}
			out.flush()?;
		}
		"put" => {
			let local = matches.get_one::<String>("local").ok_or("local file argument required")?;
			let data = afs::read(local).await.map_err(|e| format!("{}: {}", local, e))?;
			let (server, written) =
				fs.replace(path, &data).await.map_err(|e| errno_message(path, e))?;
			info!("Wrote {} of {} bytes to {} on {}", written, data.len(), path, server);
			if (written as usize) < data.len() {
				return Err(format!("{}: short write ({} of {})", path, written, data.len()).into());
			}
		}
		other => return Err(format!("Unknown command {}", other).into()),
	}
	Ok(())
}

fn path_arg() -> Arg {
	Arg::new("path").required(true).help("Path in the aggregated tree")
}

fn json_arg() -> Arg {
	Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print JSON")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("AgFS")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Aggregating network filesystem")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("CONFIG")
				.help("Configuration file (TOML or JSON5)"),
		)
		.arg(
			Arg::new("key-dir")
				.short('k')
				.long("key-dir")
				.value_name("DIR")
				.help("Directory with *.agkey server files"),
		)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::SetTrue)
				.help("Debug logging"),
		)
		.subcommand(
			Command::new("serve")
				.about("Export directories listed in the key list")
				.arg(Arg::new("bind").long("bind").value_name("ADDR").help("Listen address"))
				.arg(Arg::new("keys").long("keys").value_name("FILE").help("Authorized key list")),
		)
		.subcommand(
			Command::new("stat").about("Show file attributes").arg(path_arg()).arg(json_arg()),
		)
		.subcommand(Command::new("ls").about("List a directory").arg(path_arg()).arg(json_arg()))
		.subcommand(Command::new("cat").about("Print a file").arg(path_arg()))
		.subcommand(
			Command::new("put")
				.about("Overwrite an existing remote file with a local one")
				.arg(Arg::new("local").required(true).help("Local file"))
				.arg(path_arg()),
		)
		.get_matches();

	init_tracing(if matches.get_flag("verbose") { "debug" } else { "info" });
	let config = load_config(&matches)?;

	match matches.subcommand() {
		Some(("serve", sub)) => serve(config, sub).await,
		Some((name, sub)) => client_command(config, name, sub).await,
		None => Ok(()),
	}
}


// vim: ts=4
