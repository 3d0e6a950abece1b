mod batch;
mod engine;
mod keyval;
mod map;
mod maps;

use std::{collections::BTreeMap, ops::Index, sync::Arc};

use luge_core::{Result, Server, err};

pub use self::{
	batch::Batch,
	keyval::{SEPARATOR, split_parts, u64_from_bytes},
	map::Map,
};
use self::{engine::Engine, maps::MAPS};

/// The engine's durable store: one column family per table, addressed by
/// name through the index operator.
pub struct Database {
	pub db: Arc<Engine>,
	maps: BTreeMap<&'static str, Arc<Map>>,
}

impl Database {
	/// Open the database at the configured path, creating all column
	/// families on first run.
	pub fn open(server: &Arc<Server>) -> Result<Arc<Self>> {
		let db = Engine::open(server)?;
		let maps = MAPS
			.iter()
			.map(|&name| (name, Map::new(&db, name)))
			.collect();

		Ok(Arc::new(Self { db, maps }))
	}

	/// Start an atomic cross-map write; all puts and deletes land in one
	/// storage-engine commit.
	#[must_use]
	pub fn batch(&self) -> Batch { Batch::new(&self.db) }

	pub fn get(&self, name: &str) -> Result<&Arc<Map>> {
		self.maps
			.get(name)
			.ok_or_else(|| err!("column family {name:?} not known"))
	}
}

impl Index<&str> for Database {
	type Output = Arc<Map>;

	fn index(&self, name: &str) -> &Arc<Map> {
		self.maps
			.get(name)
			.expect("column family is declared in maps::MAPS")
	}
}
