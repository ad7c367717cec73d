// Client and server settings, loadable from JSON
//
// ```json
// {
//     "client": { "timeout_ms": 5000, "retransmission_mode": "fixed" },
//     "server": { "portmapper": "127.0.0.1:111", "register_with_portmapper": false }
// }
// ```
//
// Every key is optional; missing keys take the defaults below.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rpc::record::{DEFAULT_MAX_FRAGMENT_SIZE, DEFAULT_MAX_RECORD_SIZE};
use crate::rpc::udp_clients::RetransmissionMode;

pub const DEFAULT_TIMEOUT_MS:u64 = 30_000;
pub const DEFAULT_TRANSMISSION_TIMEOUT_MS:u64 = 30_000;
pub const DEFAULT_RETRANSMISSION_TIMEOUT_MS:u64 = 3_000;
pub const DEFAULT_UDP_BUFFER_SIZE:usize = 8192;
pub const DEFAULT_PORTMAPPER:&str = "127.0.0.1:111";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("cannot read config file: {0}")]
	Io(#[from] io::Error),

	#[error("invalid config: {0}")]
	Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	// Overall time to wait for a reply; zero turns TCP calls into batched calls
	pub timeout_ms: u64,
	// TCP: time allowed for the rest of a record once its first fragment header arrived
	pub transmission_timeout_ms: u64,
	// UDP: time to wait before resending a call
	pub retransmission_timeout_ms: u64,
	pub retransmission_mode: RetransmissionMode,
	pub max_fragment_size: usize,
	pub max_record_size: usize,
	pub buffer_size: usize,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self{
			timeout_ms: DEFAULT_TIMEOUT_MS,
			transmission_timeout_ms: DEFAULT_TRANSMISSION_TIMEOUT_MS,
			retransmission_timeout_ms: DEFAULT_RETRANSMISSION_TIMEOUT_MS,
			retransmission_mode: RetransmissionMode::Exponential,
			max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
			max_record_size: DEFAULT_MAX_RECORD_SIZE,
			buffer_size: DEFAULT_UDP_BUFFER_SIZE,
		}
	}
}

impl ClientConfig {
	pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
	pub fn transmission_timeout(&self) -> Duration { Duration::from_millis(self.transmission_timeout_ms) }
	pub fn retransmission_timeout(&self) -> Duration { Duration::from_millis(self.retransmission_timeout_ms) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	// Time allowed for the rest of a request once it started arriving; idle connections never time out
	pub transmission_timeout_ms: u64,
	pub max_fragment_size: usize,
	pub max_record_size: usize,
	pub buffer_size: usize,
	pub portmapper: SocketAddr,
	pub register_with_portmapper: bool,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self{
			transmission_timeout_ms: DEFAULT_TRANSMISSION_TIMEOUT_MS,
			max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
			max_record_size: DEFAULT_MAX_RECORD_SIZE,
			buffer_size: DEFAULT_UDP_BUFFER_SIZE,
			portmapper: SocketAddr::from(([127, 0, 0, 1], 111)),
			register_with_portmapper: true,
		}
	}
}

impl ServerConfig {
	pub fn transmission_timeout(&self) -> Duration { Duration::from_millis(self.transmission_timeout_ms) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub client: ClientConfig,
	pub server: ServerConfig,
}

impl Config {
	pub fn from_json_str(s:&str) -> Result<Self, ConfigError> {
		Ok(serde_json::from_str(s)?)
	}

	pub fn from_file<P: AsRef<Path>>(path:P) -> Result<Self, ConfigError> {
		let text = fs::read_to_string(path)?;
		Self::from_json_str(&text)
	}
}
