//! Contains type and functions related to the silo configuration file
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

/// Represent the whole configuration
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
	/// Directory under which object devices are mounted
	pub devices: PathBuf,

	/// Address and port to bind for the object server API
	pub bind_addr: SocketAddr,

	/// Require each device to be an actual mount point
	#[serde(default)]
	pub mount_check: bool,

	/// Seconds a replication peer may stay silent before a read is
	/// abandoned
	#[serde(default = "default_client_timeout")]
	pub client_timeout: f64,

	/// Largest chunk read from the network in one piece
	#[serde(default = "default_network_chunk_size")]
	pub network_chunk_size: usize,

	/// Number of replication requests served concurrently by this
	/// process
	#[serde(default = "default_replication_concurrency")]
	pub replication_concurrency: usize,

	/// Number of replication requests served concurrently per device
	/// (0 means no limit)
	#[serde(default = "default_replication_concurrency_per_device")]
	pub replication_concurrency_per_device: usize,

	/// Seconds to wait for a partition replication lock
	#[serde(default = "default_replication_lock_timeout")]
	pub replication_lock_timeout: f64,

	/// Number of failed sub-operations tolerated before a replication
	/// session considers aborting
	#[serde(default = "default_replication_failure_threshold")]
	pub replication_failure_threshold: u64,

	/// Failures-to-successes ratio beyond which a replication session
	/// aborts (once the threshold is reached)
	#[serde(default = "default_replication_failure_ratio")]
	pub replication_failure_ratio: f64,

	/// Storage policies served by this node
	#[serde(default = "default_policies")]
	pub policies: Vec<PolicyConfig>,
}

/// Configuration of one storage policy
#[derive(Deserialize, Debug, Clone)]
pub struct PolicyConfig {
	/// Policy index, as carried in `X-Backend-Storage-Policy-Index`
	pub index: u32,
	/// Human-readable policy name
	pub name: String,
	/// Policy kind. Supported values:
	/// - replicated -> whole-object copies, always durable on disk
	/// - erasure_coded -> fragment archives with explicit durable markers
	#[serde(default)]
	pub kind: PolicyKind,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
	#[default]
	Replicated,
	ErasureCoded,
}

fn default_client_timeout() -> f64 {
	60.0
}
fn default_network_chunk_size() -> usize {
	65536
}
fn default_replication_concurrency() -> usize {
	4
}
fn default_replication_concurrency_per_device() -> usize {
	1
}
fn default_replication_lock_timeout() -> f64 {
	15.0
}
fn default_replication_failure_threshold() -> u64 {
	100
}
fn default_replication_failure_ratio() -> f64 {
	1.0
}
fn default_policies() -> Vec<PolicyConfig> {
	vec![PolicyConfig {
		index: 0,
		name: "default".to_string(),
		kind: PolicyKind::Replicated,
	}]
}

/// Read and parse configuration
pub fn read_config(config_file: PathBuf) -> Result<Config, Error> {
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.open(config_file.as_path())?;

	let mut config = String::new();
	file.read_to_string(&mut config)?;

	Ok(toml::from_str(&config)?)
}
