use std::sync::Arc;

use luge_core::{Result, Server, debug, err, info};
use rocksdb::{
	BoundColumnFamily, Cache, DBCompressionType, DBWithThreadMode, MultiThreaded, Options,
	WriteBatch,
};

use crate::maps::MAPS;

/// Storage-engine handle. All column families are opened up front; handles
/// are re-fetched per operation so maps never self-reference the engine.
pub struct Engine {
	db: DBWithThreadMode<MultiThreaded>,

	_row_cache: Cache,
}

impl Engine {
	pub(crate) fn open(server: &Arc<Server>) -> Result<Arc<Self>> {
		let config = &server.config;
		let cache_bytes = (config.db_cache_capacity_mb * 1024.0 * 1024.0) as usize;
		let row_cache = Cache::new_lru_cache(cache_bytes);

		let mut opts = Options::default();
		opts.create_if_missing(true);
		opts.create_missing_column_families(true);
		opts.set_row_cache(&row_cache);
		opts.set_compression_type(DBCompressionType::Lz4);

		debug!(
			path = ?config.database_path,
			cache_mb = config.db_cache_capacity_mb,
			columns = MAPS.len(),
			"opening database",
		);

		let db = DBWithThreadMode::<MultiThreaded>::open_cf(
			&opts,
			&config.database_path,
			MAPS.iter().copied(),
		)
		.map_err(|e| err!(Database("failed to open database: {e}")))?;

		info!(path = ?config.database_path, "database opened");

		Ok(Arc::new(Self { db, _row_cache: row_cache }))
	}

	pub(crate) fn cf(&self, name: &str) -> Arc<BoundColumnFamily<'_>> {
		self.db
			.cf_handle(name)
			.expect("column family is declared in maps::MAPS")
	}

	pub(crate) fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
		self.db
			.get_cf(&self.cf(cf_name), key)
			.map_err(|e| err!(Database("get failed: {e}")))
	}

	pub(crate) fn put(&self, cf_name: &str, key: &[u8], val: &[u8]) -> Result {
		self.db
			.put_cf(&self.cf(cf_name), key, val)
			.map_err(|e| err!(Database("put failed: {e}")))
	}

	pub(crate) fn delete(&self, cf_name: &str, key: &[u8]) -> Result {
		self.db
			.delete_cf(&self.cf(cf_name), key)
			.map_err(|e| err!(Database("delete failed: {e}")))
	}

	pub(crate) fn write(&self, batch: WriteBatch) -> Result {
		self.db
			.write(batch)
			.map_err(|e| err!(Database("batch write failed: {e}")))
	}

	pub(crate) fn raw(&self) -> &DBWithThreadMode<MultiThreaded> { &self.db }
}
