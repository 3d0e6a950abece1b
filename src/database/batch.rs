use std::sync::Arc;

use luge_core::Result;
use rocksdb::WriteBatch;

use crate::{engine::Engine, map::Map};

/// Atomic write spanning any number of maps. Puts and deletes accumulate
/// into one storage-engine commit.
pub struct Batch {
	db: Arc<Engine>,
	batch: WriteBatch,
}

impl Batch {
	pub(crate) fn new(db: &Arc<Engine>) -> Self {
		Self {
			db: db.clone(),
			batch: WriteBatch::default(),
		}
	}

	pub fn put<K, V>(&mut self, map: &Arc<Map>, key: K, val: V)
	where
		K: AsRef<[u8]>,
		V: AsRef<[u8]>,
	{
		self.batch
			.put_cf(&self.db.cf(map.name()), key.as_ref(), val.as_ref());
	}

	pub fn delete<K>(&mut self, map: &Arc<Map>, key: K)
	where
		K: AsRef<[u8]>,
	{
		self.batch
			.delete_cf(&self.db.cf(map.name()), key.as_ref());
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool { self.batch.is_empty() }

	#[tracing::instrument(skip_all, fields(ops = self.batch.len()), level = "trace")]
	pub fn commit(self) -> Result { self.db.write(self.batch) }
}
