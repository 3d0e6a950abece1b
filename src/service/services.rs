use std::sync::Arc;

use luge_core::{Result, Server, debug, info};
use luge_database::Database;
use tokio::sync::Mutex;

use crate::{
	events::EventStore,
	manager::Manager,
	metadata, notify,
	rooms::RoomServer,
	service::{Args, Service},
	sync,
	typing::TypingCache,
	users::UserService,
};

/// The external collaborators the engine is wired to at startup.
pub struct Sources {
	pub events: Arc<dyn EventStore>,
	pub users: Arc<dyn UserService>,
	pub rooms: Arc<dyn RoomServer>,
	pub typing: Arc<dyn TypingCache>,
}

pub struct Services {
	pub events: Arc<dyn EventStore>,
	pub users: Arc<dyn UserService>,
	pub rooms: Arc<dyn RoomServer>,
	pub typing: Arc<dyn TypingCache>,

	pub metadata: Arc<metadata::Service>,
	pub notify: Arc<notify::Service>,
	pub sync: Arc<sync::Service>,

	manager: Mutex<Option<Arc<Manager>>>,
	pub server: Arc<Server>,
	pub db: Arc<Database>,
}

impl Services {
	/// Open the database and construct every engine-owned service.
	pub fn build(server: Arc<Server>, sources: Sources) -> Result<Arc<Self>> {
		let db = Database::open(&server)?;

		macro_rules! build {
			($tyname:ty) => {
				<$tyname>::build(Args {
					server: &server,
					db: &db,
					sources: &sources,
				})?
			};
		}

		let metadata = build!(metadata::Service);
		let notify = build!(notify::Service);
		let sync = build!(sync::Service);

		Ok(Arc::new(Self {
			events: sources.events,
			users: sources.users,
			rooms: sources.rooms,
			typing: sources.typing,
			metadata,
			notify,
			sync,
			manager: Mutex::new(None),
			server,
			db,
		}))
	}

	pub(crate) fn services(&self) -> impl Iterator<Item = Arc<dyn Service>> + Send {
		macro_rules! cast {
			($s:expr) => {{
				let service: Arc<dyn Service> = $s.clone();
				service
			}};
		}

		[cast!(self.metadata), cast!(self.notify), cast!(self.sync)].into_iter()
	}

	/// Spawn the service workers.
	pub async fn start(self: &Arc<Self>) -> Result<Arc<Self>> {
		debug!("Starting services...");

		let manager = Manager::new();
		manager.start(self).await?;
		*self.manager.lock().await = Some(manager);

		debug!("Services startup complete.");
		Ok(Arc::clone(self))
	}

	/// Signal shutdown and join the workers.
	pub async fn stop(&self) {
		info!("Shutting down services...");

		self.server.shutdown();
		for service in self.services() {
			service.interrupt().await;
		}

		if let Some(manager) = self.manager.lock().await.as_ref() {
			manager.stop().await;
		}

		debug!("Services shutdown complete.");
	}
}
