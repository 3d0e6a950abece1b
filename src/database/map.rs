use std::{fmt, sync::Arc};

use luge_core::Result;
use rocksdb::{Direction, IteratorMode};

use crate::engine::Engine;

/// Handle to one column family.
pub struct Map {
	db: Arc<Engine>,
	name: &'static str,
}

impl Map {
	pub(crate) fn new(db: &Arc<Engine>, name: &'static str) -> Arc<Self> {
		Arc::new(Self { db: db.clone(), name })
	}

	#[inline]
	#[must_use]
	pub fn name(&self) -> &'static str { self.name }

	#[tracing::instrument(skip_all, fields(%self), level = "trace")]
	pub fn get<K>(&self, key: &K) -> Result<Option<Vec<u8>>>
	where
		K: AsRef<[u8]> + ?Sized,
	{
		self.db.get(self.name, key.as_ref())
	}

	#[tracing::instrument(skip_all, fields(%self), level = "trace")]
	pub fn insert<K, V>(&self, key: &K, val: V) -> Result
	where
		K: AsRef<[u8]> + ?Sized,
		V: AsRef<[u8]>,
	{
		self.db.put(self.name, key.as_ref(), val.as_ref())
	}

	#[tracing::instrument(skip_all, fields(%self), level = "trace")]
	pub fn remove<K>(&self, key: &K) -> Result
	where
		K: AsRef<[u8]> + ?Sized,
	{
		self.db.delete(self.name, key.as_ref())
	}

	/// All `(key, value)` pairs whose key starts with the prefix, in key
	/// order.
	#[tracing::instrument(skip_all, fields(%self), level = "trace")]
	pub fn raw_prefix<'a>(
		&'a self,
		prefix: &'a [u8],
	) -> impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + 'a {
		self.db
			.raw()
			.iterator_cf(
				&self.db.cf(self.name),
				IteratorMode::From(prefix, Direction::Forward),
			)
			.map(|item| item.map_err(|e| luge_core::err!(Database("iteration failed: {e}"))))
			.take_while(move |item| match item {
				| Ok((key, _)) => key.starts_with(prefix),
				| Err(_) => true,
			})
	}
}

impl fmt::Display for Map {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.name) }
}
