use std::sync::Arc;

use luge_core::{Result, debug, error};
use tokio::{sync::Mutex, task::JoinSet};

use crate::{service::Service, services::Services};

/// Spawns and joins the service worker tasks.
pub(crate) struct Manager {
	workers: Mutex<JoinSet<Result>>,
}

impl Manager {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self { workers: Mutex::new(JoinSet::new()) })
	}

	pub(crate) async fn start(self: &Arc<Self>, services: &Arc<Services>) -> Result {
		let mut workers = self.workers.lock().await;
		for service in services.services() {
			debug!("Starting {}", service.name());
			workers.spawn(service.worker());
		}

		Ok(())
	}

	/// Join all workers; the server's shutdown signal makes them return.
	pub(crate) async fn stop(&self) {
		let mut workers = self.workers.lock().await;
		while let Some(result) = workers.join_next().await {
			match result {
				| Ok(Ok(())) => {},
				| Ok(Err(e)) => error!("Service worker failed: {e}"),
				| Err(e) => error!("Service worker panicked: {e}"),
			}
		}
	}
}
