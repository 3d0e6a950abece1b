use std::path::{Path, PathBuf};

use figment::{
	Figment,
	providers::{Env, Format, Toml},
};
use serde::Deserialize;

use crate::Result;

/// All configuration for the sync engine. Loaded once at startup from an
/// optional TOML file with `LUGE_*` environment overrides layered on top.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	/// Path under which the engine keeps its own durable state (connections,
	/// positions, stream states, metadata cache).
	#[serde(default = "default_database_path")]
	pub database_path: PathBuf,

	/// Block-cache capacity for the storage engine, in megabytes.
	#[serde(default = "default_db_cache_capacity_mb")]
	pub db_cache_capacity_mb: f64,

	/// Long-poll timeout applied when the request carries none, milliseconds.
	#[serde(default = "default_client_sync_timeout_default")]
	pub client_sync_timeout_default: u64,

	/// Lower clamp for the request-supplied long-poll timeout, milliseconds.
	#[serde(default = "default_client_sync_timeout_min")]
	pub client_sync_timeout_min: u64,

	/// Upper clamp for the request-supplied long-poll timeout, milliseconds.
	#[serde(default = "default_client_sync_timeout_max")]
	pub client_sync_timeout_max: u64,

	/// Seconds of inactivity before a sync connection and all its dependent
	/// rows are aged out.
	#[serde(default = "default_sync_connection_ttl")]
	pub sync_connection_ttl: u64,

	/// Interval between ageing sweeps, seconds.
	#[serde(default = "default_sync_connection_sweep_interval")]
	pub sync_connection_sweep_interval: u64,

	/// To-device events returned per sync when the extension names no limit.
	#[serde(default = "default_to_device_limit")]
	pub to_device_limit: usize,

	/// Upper clamp on any requested per-room timeline limit.
	#[serde(default = "default_timeline_limit_max")]
	pub timeline_limit_max: usize,

	/// Worker tasks recalculating room-metadata rows.
	#[serde(default = "default_metadata_workers")]
	pub metadata_workers: usize,

	/// Bound of the metadata work channel.
	#[serde(default = "default_metadata_queue_depth")]
	pub metadata_queue_depth: usize,

	/// Delay before a failed metadata recalculation is retried, milliseconds.
	#[serde(default = "default_metadata_retry_delay")]
	pub metadata_retry_delay: u64,
}

impl Config {
	/// Layer the TOML file (when given) under `LUGE_*` environment variables.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let mut figment = Figment::new();
		if let Some(path) = path {
			figment = figment.merge(Toml::file(path));
		}

		let config = figment
			.merge(Env::prefixed("LUGE_").split("__"))
			.extract::<Self>()?;

		config.check()?;
		Ok(config)
	}

	fn check(&self) -> Result {
		use crate::Err;

		if self.client_sync_timeout_min > self.client_sync_timeout_max {
			return Err!(Config(
				"client_sync_timeout_min must not exceed client_sync_timeout_max"
			));
		}

		if self.metadata_workers == 0 {
			return Err!(Config("metadata_workers must be nonzero"));
		}

		Ok(())
	}
}

impl Default for Config {
	fn default() -> Self {
		Self::load(None).expect("default configuration must extract")
	}
}

fn default_database_path() -> PathBuf { PathBuf::from("luge.db") }

fn default_db_cache_capacity_mb() -> f64 { 64.0 }

fn default_client_sync_timeout_default() -> u64 { 30_000 }

fn default_client_sync_timeout_min() -> u64 { 0 }

fn default_client_sync_timeout_max() -> u64 { 300_000 }

fn default_sync_connection_ttl() -> u64 { 30 * 24 * 60 * 60 }

fn default_sync_connection_sweep_interval() -> u64 { 60 * 60 }

fn default_to_device_limit() -> usize { 100 }

fn default_timeline_limit_max() -> usize { 100 }

fn default_metadata_workers() -> usize { 2 }

fn default_metadata_queue_depth() -> usize { 256 }

fn default_metadata_retry_delay() -> u64 { 5_000 }
