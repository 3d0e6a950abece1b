//! The post-commit persister: everything a response changes in the
//! connection store lands in one atomic batch.

use std::collections::{BTreeMap, BTreeSet};

use luge_core::{RequiredState, Result, StreamToken, trace, utils::now_millis};
use luge_database::{Batch, SEPARATOR, u64_from_bytes};
use ruma::{OwnedEventId, OwnedRoomId, OwnedUserId};

use super::{
	Connection, STREAM_EVENTS, RoomStatus, Service,
	store::{COUNTER_POSITION, COUNTER_REQUIRED_STATE, status_byte, u64_prefix},
};

/// One room emitted in the response.
#[derive(Clone, Debug)]
pub struct RoomPersist {
	pub room_id: OwnedRoomId,

	/// The effective timeline limit the room was built with.
	pub timeline_limit: u64,

	/// The effective required-state config; deduplicated into the
	/// per-connection dictionary.
	pub required_state: RequiredState,
}

/// One receipt delivered by the receipts extension.
#[derive(Clone, Debug)]
pub struct ReceiptPersist {
	pub room_id: OwnedRoomId,
	pub receipt_type: String,
	pub user_id: OwnedUserId,
	pub event_id: OwnedEventId,
	pub ts: u64,
}

/// Everything the persister writes after a response is assembled.
#[derive(Clone, Debug, Default)]
pub struct PersistUpdate {
	/// The stream positions the response was built against; becomes the
	/// last-token of every emitted room.
	pub streams: StreamToken,

	pub rooms: Vec<RoomPersist>,

	/// Lists that emitted operations, with their new orderings.
	pub lists: Vec<(String, Vec<OwnedRoomId>)>,

	pub receipts: Vec<ReceiptPersist>,
}

impl Service {
	/// Mint the next connection position and commit the response's state in
	/// one batch: stream-states for emitted rooms, copy-forward for rooms
	/// the change filter dropped, room configs, list orderings, delivered
	/// receipts, and the cascade of every superseded position.
	#[tracing::instrument(
		skip_all,
		level = "debug",
		fields(
			conn = conn.key,
			rooms = update.rooms.len(),
			lists = update.lists.len(),
			receipts = update.receipts.len(),
		)
	)]
	pub fn persist(&self, conn: &Connection, update: &PersistUpdate) -> Result<u64> {
		let mut batch = self.db.db.batch();

		let position = self.next_counter(|c| &mut c.position)?;
		batch.put(&self.db.counters, COUNTER_POSITION, position.to_be_bytes());
		batch.put(
			&self.db.connpos_connkey,
			position.to_be_bytes(),
			conn.key.to_be_bytes(),
		);

		let mut positions_row = u64_prefix(conn.key);
		positions_row.extend_from_slice(&position.to_be_bytes());
		batch.put(&self.db.connkey_positions, positions_row, b"");
		batch.put(
			&self.db.connkey_meta,
			conn.key.to_be_bytes(),
			now_millis().to_be_bytes(),
		);

		let token = update.streams.to_string();
		let position_prefix = u64_prefix(position);
		let mut emitted: BTreeSet<&OwnedRoomId> = BTreeSet::new();
		let mut minted: BTreeMap<String, u64> = BTreeMap::new();

		for room in &update.rooms {
			emitted.insert(&room.room_id);

			let canonical = room.required_state.canonical()?;
			let required_state_id =
				self.required_state_id(&mut batch, conn.key, &canonical, &mut minted)?;

			let mut state_row = position_prefix.clone();
			state_row.extend_from_slice(room.room_id.as_bytes());
			state_row.push(SEPARATOR);
			state_row.extend_from_slice(STREAM_EVENTS.as_bytes());

			let mut state_val = vec![status_byte(RoomStatus::Live)];
			state_val.extend_from_slice(token.as_bytes());
			batch.put(&self.db.posroomstream_state, state_row, state_val);

			let mut config_row = position_prefix.clone();
			config_row.extend_from_slice(room.room_id.as_bytes());

			let mut config_val = room.timeline_limit.to_be_bytes().to_vec();
			config_val.extend_from_slice(&required_state_id.to_be_bytes());
			batch.put(&self.db.posroom_config, config_row, config_val);
		}

		// Copy-forward: rooms previously recorded but not in this response
		// keep their standing at the new position, otherwise the cascade of
		// the old positions would reclassify them as never-sent.
		for (room_id, streams) in &conn.rooms {
			for (stream, state) in streams {
				if stream == STREAM_EVENTS && emitted.contains(room_id) {
					continue;
				}

				let mut state_row = position_prefix.clone();
				state_row.extend_from_slice(room_id.as_bytes());
				state_row.push(SEPARATOR);
				state_row.extend_from_slice(stream.as_bytes());

				let mut state_val = vec![status_byte(state.status)];
				state_val.extend_from_slice(state.last_token.as_bytes());
				batch.put(&self.db.posroomstream_state, state_row, state_val);
			}
		}

		for (room_id, config) in &conn.configs {
			if emitted.contains(room_id) {
				continue;
			}

			let mut config_row = position_prefix.clone();
			config_row.extend_from_slice(room_id.as_bytes());

			let mut config_val = config.timeline_limit.to_be_bytes().to_vec();
			config_val.extend_from_slice(&config.required_state_id.to_be_bytes());
			batch.put(&self.db.posroom_config, config_row, config_val);
		}

		for (list, ordering) in &update.lists {
			let mut list_row = u64_prefix(conn.key);
			list_row.extend_from_slice(list.as_bytes());
			batch.put(&self.db.connlist_rooms, list_row, serde_json::to_vec(ordering)?);
		}

		for receipt in &update.receipts {
			let mut receipt_row = u64_prefix(conn.key);
			receipt_row.extend_from_slice(receipt.room_id.as_bytes());
			receipt_row.push(SEPARATOR);
			receipt_row.extend_from_slice(receipt.receipt_type.as_bytes());
			receipt_row.push(SEPARATOR);
			receipt_row.extend_from_slice(receipt.user_id.as_bytes());

			let mut receipt_val = receipt.ts.to_be_bytes().to_vec();
			receipt_val.push(SEPARATOR);
			receipt_val.extend_from_slice(receipt.event_id.as_bytes());
			batch.put(&self.db.connroomtypeuser_receipt, receipt_row, receipt_val);
		}

		// Cascade: the new position supersedes every other, the presented
		// one included.
		let conn_prefix = u64_prefix(conn.key);
		let old_rows: Vec<(Vec<u8>, u64)> = self
			.db
			.connkey_positions
			.raw_prefix(&conn_prefix)
			.map(|item| {
				let (row, _) = item?;
				let old = u64_from_bytes(&row[conn_prefix.len()..])?;
				Ok((row.to_vec(), old))
			})
			.collect::<Result<_>>()?;

		for (row, old) in old_rows {
			if old == position {
				continue;
			}

			let old_prefix = u64_prefix(old);
			for item in self.db.posroomstream_state.raw_prefix(&old_prefix) {
				batch.delete(&self.db.posroomstream_state, item?.0);
			}

			for item in self.db.posroom_config.raw_prefix(&old_prefix) {
				batch.delete(&self.db.posroom_config, item?.0);
			}

			batch.delete(&self.db.connpos_connkey, old.to_be_bytes());
			batch.delete(&self.db.connkey_positions, row);
		}

		batch.commit()?;
		trace!(conn = conn.key, position, "persisted response state");

		Ok(position)
	}

	/// Dictionary lookup of a canonical required-state config, minting a
	/// fresh id into the batch when the content is new.
	fn required_state_id(
		&self,
		batch: &mut Batch,
		key: u64,
		canonical: &str,
		minted: &mut BTreeMap<String, u64>,
	) -> Result<u64> {
		if let Some(&id) = minted.get(canonical) {
			return Ok(id);
		}

		let mut content_row = u64_prefix(key);
		content_row.extend_from_slice(canonical.as_bytes());

		let id = match self.db.connreqstate_id.get(&content_row)? {
			| Some(val) => u64_from_bytes(&val)?,
			| None => {
				let id = self.next_counter(|c| &mut c.required_state)?;
				batch.put(&self.db.counters, COUNTER_REQUIRED_STATE, id.to_be_bytes());
				batch.put(&self.db.connreqstate_id, &content_row, id.to_be_bytes());

				let mut id_row = u64_prefix(key);
				id_row.extend_from_slice(&id.to_be_bytes());
				batch.put(&self.db.connid_reqstate, id_row, canonical.as_bytes());

				id
			},
		};

		minted.insert(canonical.to_owned(), id);
		Ok(id)
	}
}
