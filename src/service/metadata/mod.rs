//! Cached room decoration rows for list building, fed by a durable
//! recalculation queue and a bounded worker pool. The cache is an
//! optimisation: a miss computes the row on the spot from the event store.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use luge_core::{Result, Server, debug, trace, warn};
use luge_database::{Map, SEPARATOR};
use ruma::{OwnedRoomId, RoomId, UserId, events::room::member::MembershipState};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::{
	events::EventStore,
	service,
};

/// Decoration of one room for list selection and filtering.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RoomMeta {
	/// Highest PDU-stream position in the room.
	pub position: u64,

	/// Stream position of the most recent bump event.
	pub bump_stamp: u64,

	pub room_type: Option<String>,

	pub name: Option<String>,

	pub is_encrypted: bool,

	pub tombstone_successor: Option<OwnedRoomId>,

	/// False when no local state is known, e.g. a federated invite whose
	/// room was never joined here.
	pub has_known_state: bool,
}

/// Per `(room, user)` row: the room decoration as of the user's membership,
/// for rooms the user is not joined to.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MembershipSnapshot {
	pub membership: String,

	pub sender: String,

	#[serde(flatten)]
	pub meta: RoomMeta,
}

pub struct Service {
	db: Data,
	server: Arc<Server>,
	events: Arc<dyn EventStore>,
	queue: (
		async_channel::Sender<OwnedRoomId>,
		async_channel::Receiver<OwnedRoomId>,
	),
}

struct Data {
	joined_rooms: Arc<Map>,
	membership_snapshots: Arc<Map>,
	rooms_to_recalculate: Arc<Map>,
}

#[async_trait]
impl crate::Service for Service {
	fn build(args: crate::Args<'_>) -> Result<Arc<Self>> {
		let queue = async_channel::bounded(args.server.config.metadata_queue_depth);
		Ok(Arc::new(Self {
			db: Data {
				joined_rooms: args.db["joined_rooms"].clone(),
				membership_snapshots: args.db["membership_snapshots"].clone(),
				rooms_to_recalculate: args.db["rooms_to_recalculate"].clone(),
			},
			server: args.server.clone(),
			events: args.sources.events.clone(),
			queue,
		}))
	}

	async fn worker(self: Arc<Self>) -> Result {
		self.drain_backlog()?;

		let mut pool = JoinSet::new();
		for _ in 0..self.server.config.metadata_workers {
			pool.spawn(self.clone().work_loop());
		}

		while let Some(result) = pool.join_next().await {
			if let Err(e) = result {
				warn!("metadata worker exited abnormally: {e}");
			}
		}

		Ok(())
	}

	fn name(&self) -> &str { service::make_name(std::module_path!()) }
}

impl Service {
	/// Cached decoration of a joined room, computing on miss.
	pub async fn room_meta(&self, room_id: &RoomId) -> Result<RoomMeta> {
		if let Some(row) = self.db.joined_rooms.get(room_id.as_bytes())? {
			if let Ok(meta) = serde_json::from_slice::<RoomMeta>(&row) {
				return Ok(meta);
			}
		}

		self.recalculate(room_id).await
	}

	/// Cached decoration of a room through the lens of one user's
	/// membership, for rooms the user is not joined to.
	pub async fn snapshot_meta(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		membership: &MembershipState,
		sender: &UserId,
	) -> Result<RoomMeta> {
		let mut row_key = room_id.as_bytes().to_vec();
		row_key.push(SEPARATOR);
		row_key.extend_from_slice(user_id.as_bytes());

		if let Some(row) = self.db.membership_snapshots.get(&row_key)? {
			if let Ok(snapshot) = serde_json::from_slice::<MembershipSnapshot>(&row) {
				return Ok(snapshot.meta);
			}
		}

		let meta = self.compute(room_id).await?;
		let snapshot = MembershipSnapshot {
			membership: membership.to_string(),
			sender: sender.to_string(),
			meta: meta.clone(),
		};

		self.db
			.membership_snapshots
			.insert(&row_key, serde_json::to_vec(&snapshot)?)?;

		Ok(meta)
	}

	/// Mark a room dirty: durable queue row plus a nudge to the workers.
	pub fn invalidate(&self, room_id: &RoomId) {
		if let Err(e) = self
			.db
			.rooms_to_recalculate
			.insert(room_id.as_bytes(), b"")
		{
			warn!(%room_id, "failed to enqueue metadata recalculation: {e}");
			return;
		}

		// a full channel is fine: the durable row is drained later
		let _sent = self.queue.0.try_send(room_id.to_owned());
	}

	async fn recalculate(&self, room_id: &RoomId) -> Result<RoomMeta> {
		let meta = self.compute(room_id).await?;

		self.db
			.joined_rooms
			.insert(room_id.as_bytes(), serde_json::to_vec(&meta)?)?;
		self.db
			.rooms_to_recalculate
			.remove(room_id.as_bytes())?;

		trace!(%room_id, "recalculated room metadata");
		Ok(meta)
	}

	async fn compute(&self, room_id: &RoomId) -> Result<RoomMeta> {
		use luge_core::matrix::event::{
			BUMP_TYPES, CreateContent, EncryptionContent, NameContent, TombstoneContent,
		};

		let position = self.events.room_position(room_id).await?;
		let bump_stamp = self
			.events
			.bump_position(room_id, BUMP_TYPES)
			.await?
			.unwrap_or(0);

		let create = self
			.events
			.state_event(room_id, "m.room.create", "")
			.await?;

		let room_type = create
			.as_ref()
			.and_then(|event| event.get_content::<CreateContent>().ok())
			.and_then(|content| content.room_type);

		let name = self
			.events
			.state_event(room_id, "m.room.name", "")
			.await?
			.and_then(|event| event.get_content::<NameContent>().ok())
			.and_then(|content| content.name);

		let is_encrypted = self
			.events
			.state_event(room_id, "m.room.encryption", "")
			.await?
			.and_then(|event| event.get_content::<EncryptionContent>().ok())
			.is_some();

		let tombstone_successor = self
			.events
			.state_event(room_id, "m.room.tombstone", "")
			.await?
			.and_then(|event| event.get_content::<TombstoneContent>().ok())
			.and_then(|content| content.replacement_room);

		Ok(RoomMeta {
			position,
			bump_stamp,
			room_type,
			name,
			is_encrypted,
			tombstone_successor,
			has_known_state: create.is_some(),
		})
	}

	/// Re-enqueue durable backlog rows at startup.
	fn drain_backlog(&self) -> Result {
		let rooms: Vec<OwnedRoomId> = self
			.db
			.rooms_to_recalculate
			.raw_prefix(b"")
			.filter_map(|item| {
				let (row, _) = item.ok()?;
				OwnedRoomId::try_from(String::from_utf8_lossy(&row).into_owned()).ok()
			})
			.collect();

		debug!(backlog = rooms.len(), "draining metadata recalculation backlog");
		for room_id in rooms {
			let _sent = self.queue.0.try_send(room_id);
		}

		Ok(())
	}

	async fn work_loop(self: Arc<Self>) {
		let retry = Duration::from_millis(self.server.config.metadata_retry_delay);
		loop {
			let room_id = tokio::select! {
				() = self.server.until_shutdown() => break,
				room_id = self.queue.1.recv() => match room_id {
					Ok(room_id) => room_id,
					Err(_) => break,
				},
			};

			if let Err(e) = self.recalculate(&room_id).await {
				warn!(%room_id, "metadata recalculation failed, will retry: {e}");
				tokio::time::sleep(retry).await;
				let _sent = self.queue.0.try_send(room_id);
			}
		}
	}
}
