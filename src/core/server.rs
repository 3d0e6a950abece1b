use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use tokio::sync::watch;

use crate::Config;

/// Process-wide handle shared by every service: configuration plus the
/// cooperative-shutdown signal all long-poll waits and worker loops observe.
pub struct Server {
	pub config: Config,

	stopping: AtomicBool,
	shutdown: watch::Sender<bool>,
}

impl Server {
	#[must_use]
	pub fn new(config: Config) -> Arc<Self> {
		let (shutdown, _) = watch::channel(false);
		Arc::new(Self {
			config,
			stopping: AtomicBool::new(false),
			shutdown,
		})
	}

	/// Signal shutdown. Idempotent; wakes every `until_shutdown()` waiter.
	pub fn shutdown(&self) {
		self.stopping.store(true, Ordering::SeqCst);
		self.shutdown.send_replace(true);
	}

	#[inline]
	#[must_use]
	pub fn running(&self) -> bool { !self.stopping.load(Ordering::SeqCst) }

	/// Resolves when shutdown is signalled; immediately if it already was.
	pub async fn until_shutdown(&self) {
		let mut rx = self.shutdown.subscribe();
		while !*rx.borrow_and_update() {
			if rx.changed().await.is_err() {
				return;
			}
		}
	}
}
