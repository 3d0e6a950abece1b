//! Durable operations of the connection store.

use std::{collections::BTreeMap, sync::Arc};

use luge_core::{Err, Result, debug, err, utils::now_millis};
use luge_database::{Map, SEPARATOR, split_parts, u64_from_bytes};
use ruma::{DeviceId, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId, UserId};

use super::{Connection, RoomConfig, RoomState, RoomStatus, Service, cache::into_connection_key};

pub(super) const COUNTER_CONNECTION: &[u8] = b"connection";
pub(super) const COUNTER_POSITION: &[u8] = b"position";
pub(super) const COUNTER_REQUIRED_STATE: &[u8] = b"required_state";

const STATUS_LIVE: u8 = b'L';
const STATUS_PREVIOUSLY: u8 = b'P';

pub(super) fn stored_counter(map: &Arc<Map>, name: &[u8]) -> Result<u64> {
	map.get(name)?
		.map(|v| u64_from_bytes(&v))
		.transpose()
		.map(Option::unwrap_or_default)
}

/// `{u64be}{0xFF}` prefix for composite keys led by a connection key or a
/// position.
pub(super) fn u64_prefix(val: u64) -> Vec<u8> {
	let mut buf = val.to_be_bytes().to_vec();
	buf.push(SEPARATOR);
	buf
}

pub(super) fn status_byte(status: RoomStatus) -> u8 {
	match status {
		| RoomStatus::Live => STATUS_LIVE,
		| RoomStatus::Previously => STATUS_PREVIOUSLY,
	}
}

fn status_from_byte(byte: u8) -> Result<RoomStatus> {
	match byte {
		| STATUS_LIVE => Ok(RoomStatus::Live),
		| STATUS_PREVIOUSLY => Ok(RoomStatus::Previously),
		| other => Err!(Database("unknown room status byte {other:#x}")),
	}
}

impl Service {
	/// Establish the durable working state for a request. Creates the
	/// connection on first contact; validates ownership of a presented
	/// position and deletes every other position of the connection.
	#[tracing::instrument(skip(self), level = "debug")]
	pub fn open_connection(
		&self,
		user_id: &UserId,
		device_id: &DeviceId,
		conn_id: &str,
		position: Option<u64>,
	) -> Result<Connection> {
		let key = self.connection_key(user_id, device_id, conn_id)?;
		self.db
			.connkey_meta
			.insert(&key.to_be_bytes(), now_millis().to_be_bytes())?;

		let Some(position) = position else {
			// initial sync: any earlier positions are forgotten outright
			self.cascade_positions(key, None)?;
			return Ok(Connection { key, ..Default::default() });
		};

		match self.db.connpos_connkey.get(&position.to_be_bytes())? {
			| Some(owner) if u64_from_bytes(&owner)? == key => {},
			| _ => {
				return Err!(UnknownPos(
					"Connection position {position} is not known to this connection."
				));
			},
		}

		self.cascade_positions(key, Some(position))?;
		let (rooms, configs) = self.load_position(position)?;

		Ok(Connection {
			key,
			position: Some(position),
			rooms,
			configs,
		})
	}

	fn connection_key(&self, user_id: &UserId, device_id: &DeviceId, conn_id: &str) -> Result<u64> {
		let row = conn_row_key(user_id, device_id, conn_id);
		if let Some(val) = self.db.userdeviceconnid_connkey.get(&row)? {
			return u64_from_bytes(&val);
		}

		let key = self.next_counter(|c| &mut c.connection)?;
		self.db
			.counters
			.insert(COUNTER_CONNECTION, key.to_be_bytes())?;
		self.db
			.userdeviceconnid_connkey
			.insert(&row, key.to_be_bytes())?;

		debug!(%user_id, %device_id, conn_id, key, "created sync connection");
		Ok(key)
	}

	pub(super) fn next_counter<F>(&self, field: F) -> Result<u64>
	where
		F: FnOnce(&mut super::Counters) -> &mut u64,
	{
		let mut counters = self.counters.lock().expect("locked");
		let slot = field(&mut counters);
		let prev = *slot;
		*slot = luge_core::checked!(prev + 1)?;
		Ok(*slot)
	}

	/// Delete every position of the connection except the keeper, with all
	/// rows hanging off each deleted position.
	pub(super) fn cascade_positions(&self, key: u64, keeper: Option<u64>) -> Result {
		let prefix = u64_prefix(key);
		let rows: Vec<(Vec<u8>, u64)> = self
			.db
			.connkey_positions
			.raw_prefix(&prefix)
			.map(|item| {
				let (row, _) = item?;
				let position = u64_from_bytes(&row[prefix.len()..])?;
				Ok((row.to_vec(), position))
			})
			.collect::<Result<_>>()?;

		for (row, position) in rows {
			if Some(position) == keeper {
				continue;
			}

			self.delete_position_rows(position)?;
			self.db.connkey_positions.remove(&row)?;
		}

		Ok(())
	}

	fn delete_position_rows(&self, position: u64) -> Result {
		let prefix = u64_prefix(position);
		delete_prefix(&self.db.posroomstream_state, &prefix)?;
		delete_prefix(&self.db.posroom_config, &prefix)?;
		self.db
			.connpos_connkey
			.remove(&position.to_be_bytes())?;

		Ok(())
	}

	/// All stream-state and room-config rows at one position.
	#[allow(clippy::type_complexity)]
	pub(super) fn load_position(
		&self,
		position: u64,
	) -> Result<(
		BTreeMap<OwnedRoomId, BTreeMap<String, RoomState>>,
		BTreeMap<OwnedRoomId, RoomConfig>,
	)> {
		let prefix = u64_prefix(position);

		let mut rooms: BTreeMap<OwnedRoomId, BTreeMap<String, RoomState>> = BTreeMap::new();
		for item in self.db.posroomstream_state.raw_prefix(&prefix) {
			let (row, val) = item?;
			let mut parts = split_parts(&row[prefix.len()..]);
			let room_id = room_from_part(parts.next())?;
			let stream = str_from_part(parts.next())?;

			let (&status, token) = val
				.split_first()
				.ok_or_else(|| err!(Database("empty stream-state row")))?;

			rooms.entry(room_id).or_default().insert(
				stream.to_owned(),
				RoomState {
					status: status_from_byte(status)?,
					last_token: String::from_utf8_lossy(token).into_owned(),
				},
			);
		}

		let mut configs = BTreeMap::new();
		for item in self.db.posroom_config.raw_prefix(&prefix) {
			let (row, val) = item?;
			let room_id = room_from_part(Some(&row[prefix.len()..]))?;
			if val.len() != 16 {
				return Err!(Database("malformed room-config row"));
			}

			configs.insert(room_id, RoomConfig {
				timeline_limit: u64_from_bytes(&val[..8])?,
				required_state_id: u64_from_bytes(&val[8..])?,
			});
		}

		Ok((rooms, configs))
	}

	/// The room-id ordering last persisted for a list.
	pub fn list_ordering(&self, key: u64, list: &str) -> Result<Option<Vec<OwnedRoomId>>> {
		let mut row = u64_prefix(key);
		row.extend_from_slice(list.as_bytes());

		self.db
			.connlist_rooms
			.get(&row)?
			.map(|val| serde_json::from_slice(&val).map_err(Into::into))
			.transpose()
	}

	/// Event ids last delivered per `(receipt type, user)` for a room on
	/// this connection.
	pub fn delivered_receipts(
		&self,
		key: u64,
		room_id: &RoomId,
	) -> Result<BTreeMap<(String, OwnedUserId), OwnedEventId>> {
		let mut prefix = u64_prefix(key);
		prefix.extend_from_slice(room_id.as_bytes());
		prefix.push(SEPARATOR);

		let mut delivered = BTreeMap::new();
		for item in self.db.connroomtypeuser_receipt.raw_prefix(&prefix) {
			let (row, val) = item?;
			let mut parts = split_parts(&row[prefix.len()..]);
			let receipt_type = str_from_part(parts.next())?.to_owned();
			let user_id = user_from_part(parts.next())?;

			if val.len() < 9 {
				return Err!(Database("malformed receipt row"));
			}

			let event_id = OwnedEventId::try_from(String::from_utf8_lossy(&val[9..]).into_owned())
				.map_err(|e| err!(Database("receipt row event id invalid: {e}")))?;

			delivered.insert((receipt_type, user_id), event_id);
		}

		Ok(delivered)
	}

	/// Delete connections idle past the configured TTL; returns how many
	/// were swept.
	pub fn age_out(&self) -> Result<usize> {
		let ttl_millis = self
			.server
			.config
			.sync_connection_ttl
			.saturating_mul(1_000);

		let now = now_millis();

		let rows: Vec<(Vec<u8>, u64)> = self
			.db
			.userdeviceconnid_connkey
			.raw_prefix(b"")
			.map(|item| {
				let (row, val) = item?;
				Ok((row.to_vec(), u64_from_bytes(&val)?))
			})
			.collect::<Result<_>>()?;

		let mut aged = 0_usize;
		for (row, key) in rows {
			let last_seen = self
				.db
				.connkey_meta
				.get(&key.to_be_bytes())?
				.map(|v| u64_from_bytes(&v))
				.transpose()?
				.unwrap_or(0);

			if now.saturating_sub(last_seen) <= ttl_millis {
				continue;
			}

			self.delete_connection(key, &row)?;
			aged = aged.saturating_add(1);
		}

		Ok(aged)
	}

	fn delete_connection(&self, key: u64, triple_row: &[u8]) -> Result {
		self.cascade_positions(key, None)?;

		let prefix = u64_prefix(key);
		delete_prefix(&self.db.connreqstate_id, &prefix)?;
		delete_prefix(&self.db.connid_reqstate, &prefix)?;
		delete_prefix(&self.db.connlist_rooms, &prefix)?;
		delete_prefix(&self.db.connroomtypeuser_receipt, &prefix)?;
		self.db.connkey_meta.remove(&key.to_be_bytes())?;
		self.db.userdeviceconnid_connkey.remove(triple_row)?;

		// the sticky cache entry dies with the durable rows
		let mut parts = split_parts(triple_row);
		let user_id = user_from_part(parts.next());
		let device_id = str_from_part(parts.next());
		let conn_id = str_from_part(parts.next());
		if let (Ok(user_id), Ok(device_id), Ok(conn_id)) = (user_id, device_id, conn_id) {
			let cache_key = into_connection_key(user_id, device_id, conn_id);
			self.forget_connection(&cache_key);
		}

		Ok(())
	}
}

fn conn_row_key(user_id: &UserId, device_id: &DeviceId, conn_id: &str) -> Vec<u8> {
	let mut row = user_id.as_bytes().to_vec();
	row.push(SEPARATOR);
	row.extend_from_slice(device_id.as_bytes());
	row.push(SEPARATOR);
	row.extend_from_slice(conn_id.as_bytes());
	row
}

fn delete_prefix(map: &Arc<Map>, prefix: &[u8]) -> Result {
	let rows: Vec<Box<[u8]>> = map
		.raw_prefix(prefix)
		.map(|item| item.map(|(row, _)| row))
		.collect::<Result<_>>()?;

	for row in rows {
		map.remove(&row)?;
	}

	Ok(())
}

fn room_from_part(part: Option<&[u8]>) -> Result<OwnedRoomId> {
	let part = part.ok_or_else(|| err!(Database("key lacks a room segment")))?;
	OwnedRoomId::try_from(String::from_utf8_lossy(part).into_owned())
		.map_err(|e| err!(Database("room id in key invalid: {e}")))
}

fn user_from_part(part: Option<&[u8]>) -> Result<OwnedUserId> {
	let part = part.ok_or_else(|| err!(Database("key lacks a user segment")))?;
	OwnedUserId::try_from(String::from_utf8_lossy(part).into_owned())
		.map_err(|e| err!(Database("user id in key invalid: {e}")))
}

fn str_from_part(part: Option<&[u8]>) -> Result<&str> {
	let part = part.ok_or_else(|| err!(Database("key lacks a segment")))?;
	std::str::from_utf8(part).map_err(|e| err!(Database("key segment not utf-8: {e}")))
}
