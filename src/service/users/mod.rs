//! Narrow interface onto the user/identity service: end-to-end key
//! bookkeeping, device lists, account-data contents, to-device queues and
//! ignore lists.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use luge_core::Result;
use ruma::{DeviceId, OwnedUserId, RoomId, UserId};
use serde_json::value::RawValue as RawJsonValue;

/// Device-list catch-up between two device-list stream positions.
#[derive(Clone, Debug, Default)]
pub struct DeviceListChanges {
	pub changed: BTreeSet<OwnedUserId>,

	pub left: BTreeSet<OwnedUserId>,
}

#[async_trait]
pub trait UserService: Send + Sync {
	/// Unclaimed one-time keys per algorithm for the device.
	async fn one_time_key_counts(
		&self,
		user_id: &UserId,
		device_id: &DeviceId,
	) -> Result<BTreeMap<String, u64>>;

	/// Algorithms with an uploaded, unused fallback key.
	async fn unused_fallback_key_types(
		&self,
		user_id: &UserId,
		device_id: &DeviceId,
	) -> Result<Vec<String>>;

	/// Users whose device lists changed or left the user's view within
	/// `(from, to]` of the device-list stream.
	async fn device_list_changes(
		&self,
		user_id: &UserId,
		from: u64,
		to: u64,
	) -> Result<DeviceListChanges>;

	/// Content of one account-data event; `None` room means global.
	async fn account_data(
		&self,
		user_id: &UserId,
		room_id: Option<&RoomId>,
		kind: &str,
	) -> Result<Option<Box<RawJsonValue>>>;

	/// Acknowledge delivery of the device's to-device events at or below
	/// the position, releasing them for deletion.
	async fn ack_to_device(&self, user_id: &UserId, device_id: &DeviceId, upto: u64) -> Result;

	/// To-device events with `from < position <= to`, truncated to `limit`;
	/// returns the events and the position of the last one returned, or
	/// `from` when none qualified.
	async fn to_device_events(
		&self,
		user_id: &UserId,
		device_id: &DeviceId,
		from: u64,
		to: u64,
		limit: usize,
	) -> Result<(Vec<Box<RawJsonValue>>, u64)>;

	async fn ignored_users(&self, user_id: &UserId) -> Result<BTreeSet<OwnedUserId>>;

	/// Tag names the user has put on the room.
	async fn room_tags(&self, user_id: &UserId, room_id: &RoomId) -> Result<Vec<String>>;
}
