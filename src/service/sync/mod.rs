//! Per-connection sync state.
//!
//! Two layers live here. The durable layer tracks, for every
//! `(user, device, conn_id)` connection, the positions minted for each
//! response and per `(position, room, stream)` what was last sent, so the
//! next response transmits only what changed. The in-memory layer remembers
//! sticky request parameters so sparse incremental requests are filled back
//! in before processing.

mod cache;
mod persist;
mod store;
#[cfg(test)]
mod tests;

use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex as StdMutex},
	time::Duration,
};

use async_trait::async_trait;
use luge_core::{Result, Server, debug, info, warn};
use luge_database::{Database, Map};
use ruma::OwnedRoomId;

use crate::service;

pub use self::{
	cache::{ConnectionKey, into_connection_key},
	persist::{PersistUpdate, ReceiptPersist, RoomPersist},
};

/// Stream name under which room timeline delivery is tracked.
pub const STREAM_EVENTS: &str = "events";

pub struct Service {
	db: Data,
	server: Arc<Server>,
	counters: StdMutex<Counters>,
	connections: Connections,
}

struct Data {
	userdeviceconnid_connkey: Arc<Map>,
	connkey_meta: Arc<Map>,
	connkey_positions: Arc<Map>,
	connpos_connkey: Arc<Map>,
	posroomstream_state: Arc<Map>,
	posroom_config: Arc<Map>,
	connreqstate_id: Arc<Map>,
	connid_reqstate: Arc<Map>,
	connlist_rooms: Arc<Map>,
	connroomtypeuser_receipt: Arc<Map>,
	counters: Arc<Map>,
	db: Arc<Database>,
}

#[derive(Clone, Copy, Debug, Default)]
struct Counters {
	connection: u64,
	position: u64,
	required_state: u64,
}

type Connections = StdMutex<BTreeMap<ConnectionKey, Arc<StdMutex<cache::StickyCache>>>>;

/// Delivery status of a room on a connection at one position.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoomStatus {
	/// In the response at this position.
	Live,

	/// Sent at some earlier position but not at this one.
	Previously,
}

/// One stream-state row: status plus the stream token in effect when the
/// room was last in a response.
#[derive(Clone, Debug)]
pub struct RoomState {
	pub status: RoomStatus,
	pub last_token: String,
}

/// One room-config row; detects timeline expansion across responses.
#[derive(Clone, Copy, Debug)]
pub struct RoomConfig {
	pub timeline_limit: u64,
	pub required_state_id: u64,
}

/// Durable working state of one connection, loaded at the presented
/// position after validation and cascade.
#[derive(Debug, Default)]
pub struct Connection {
	pub key: u64,

	/// The validated presented position; `None` on an initial sync.
	pub position: Option<u64>,

	/// Stream-state rows at the presented position: room → stream → state.
	pub rooms: BTreeMap<OwnedRoomId, BTreeMap<String, RoomState>>,

	/// Room-config rows at the presented position.
	pub configs: BTreeMap<OwnedRoomId, RoomConfig>,
}

impl Connection {
	/// The room's event-stream state, if any was ever recorded.
	#[must_use]
	pub fn room_state(&self, room_id: &OwnedRoomId) -> Option<&RoomState> {
		self.rooms.get(room_id)?.get(STREAM_EVENTS)
	}
}

#[async_trait]
impl crate::Service for Service {
	fn build(args: crate::Args<'_>) -> Result<Arc<Self>> { Self::open(args.server, args.db) }

	/// Ageing sweep: connections idle past their TTL are deleted together
	/// with all dependent rows.
	async fn worker(self: Arc<Self>) -> Result {
		let interval = Duration::from_secs(self.server.config.sync_connection_sweep_interval);
		loop {
			tokio::select! {
				() = self.server.until_shutdown() => break,
				() = tokio::time::sleep(interval) => {},
			}

			match self.age_out() {
				| Ok(0) => debug!("connection sweep: nothing to age out"),
				| Ok(aged) => info!(aged, "aged out idle sync connections"),
				| Err(e) => warn!("connection sweep failed: {e}"),
			}
		}

		Ok(())
	}

	fn name(&self) -> &str { service::make_name(std::module_path!()) }
}

impl Service {
	pub(crate) fn open(server: &Arc<Server>, db: &Arc<Database>) -> Result<Arc<Self>> {
		let data = Data {
			userdeviceconnid_connkey: db["userdeviceconnid_connkey"].clone(),
			connkey_meta: db["connkey_meta"].clone(),
			connkey_positions: db["connkey_positions"].clone(),
			connpos_connkey: db["connpos_connkey"].clone(),
			posroomstream_state: db["posroomstream_state"].clone(),
			posroom_config: db["posroom_config"].clone(),
			connreqstate_id: db["connreqstate_id"].clone(),
			connid_reqstate: db["connid_reqstate"].clone(),
			connlist_rooms: db["connlist_rooms"].clone(),
			connroomtypeuser_receipt: db["connroomtypeuser_receipt"].clone(),
			counters: db["counters"].clone(),
			db: db.clone(),
		};

		let counters = Counters {
			connection: store::stored_counter(&data.counters, store::COUNTER_CONNECTION)?,
			position: store::stored_counter(&data.counters, store::COUNTER_POSITION)?,
			required_state: store::stored_counter(&data.counters, store::COUNTER_REQUIRED_STATE)?,
		};

		Ok(Arc::new(Self {
			db: data,
			server: server.clone(),
			counters: StdMutex::new(counters),
			connections: StdMutex::new(BTreeMap::new()),
		}))
	}
}
