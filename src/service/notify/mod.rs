//! Process-wide stream-position notifier. Writers of every substream report
//! position advances here; long-poll requests wait until the current
//! position crosses their threshold. This is the engine's only global
//! mutable state.

use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex, RwLock},
};

use luge_core::{Result, StreamKind, StreamToken, trace};
use ruma::{OwnedUserId, UserId};
use tokio::sync::watch::{Sender, channel};

use crate::service;

pub struct Service {
	current: RwLock<StreamToken>,

	watchers: Mutex<BTreeMap<OwnedUserId, Sender<()>>>,

	/// Wakes every listener; used by advances with no user scope.
	global: Sender<()>,
}

impl crate::Service for Service {
	fn build(_args: crate::Args<'_>) -> Result<Arc<Self>> {
		Ok(Arc::new(Self {
			current: RwLock::new(StreamToken::default()),
			watchers: Mutex::new(BTreeMap::new()),
			global: channel(()).0,
		}))
	}

	fn name(&self) -> &str { service::make_name(std::module_path!()) }
}

impl Service {
	/// Snapshot of the current positions across all substreams; the upper
	/// bound of everything a response contains.
	#[must_use]
	pub fn current(&self) -> StreamToken { *self.current.read().expect("locked") }

	/// Restore positions at startup; positions never move backwards.
	pub fn seed(&self, token: StreamToken) {
		let mut current = self.current.write().expect("locked");
		let kinds = [
			StreamKind::Pdu,
			StreamKind::Invite,
			StreamKind::Receipt,
			StreamKind::AccountData,
			StreamKind::Typing,
			StreamKind::DeviceList,
			StreamKind::ToDevice,
			StreamKind::Notification,
			StreamKind::UnPartialStated,
		];

		for kind in kinds {
			current.advance(kind, token.get(kind));
		}
	}

	/// Report a substream advance, waking the named users' listeners; an
	/// empty user slice wakes everyone.
	#[tracing::instrument(skip(self), level = "trace")]
	pub fn advance(&self, kind: StreamKind, position: u64, users: &[OwnedUserId]) {
		self.current
			.write()
			.expect("locked")
			.advance(kind, position);

		if users.is_empty() {
			let _count = self.global.send(());
			return;
		}

		let mut watchers = self.watchers.lock().expect("locked");
		for user_id in users {
			if let Some(tx) = watchers.get(user_id) {
				if tx.send(()).is_err() {
					watchers.remove(user_id);
				}
			}
		}
	}

	/// Wait until any substream moves past `since`. Returns immediately
	/// when it already has; re-arm by calling again with a newer threshold.
	#[tracing::instrument(skip(self), level = "trace", fields(%user_id))]
	pub async fn wait(&self, user_id: &UserId, since: StreamToken) {
		let mut user_rx = {
			let mut watchers = self.watchers.lock().expect("locked");
			watchers
				.entry(user_id.to_owned())
				.or_insert_with(|| channel(()).0)
				.subscribe()
		};

		let mut global_rx = self.global.subscribe();

		loop {
			if self.current().any_after(&since) {
				trace!(%user_id, "woken past threshold");
				return;
			}

			tokio::select! {
				result = user_rx.changed() => {
					if result.is_err() {
						return;
					}
				},
				result = global_rx.changed() => {
					if result.is_err() {
						return;
					}
				},
			}
		}
	}
}
