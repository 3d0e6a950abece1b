//! Wire shapes of the sliding-sync endpoint.
//!
//! Request fields are sticky per connection: absent fields mean "unchanged
//! since the last request" and are filled back in from the connection cache.

use std::collections::BTreeMap;

use ruma::{OwnedMxcUri, OwnedRoomId, OwnedUserId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue as RawJsonValue;

use super::{event::{ClientEvent, StrippedEvent}, required_state::RequiredState};

/// A window into a list: inclusive `[start, end]`. Parsed leniently; a
/// malformed range behaves as "no window".
pub type ListRange = (i64, i64);

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Request {
	#[serde(default)]
	pub conn_id: Option<String>,

	#[serde(default)]
	pub pos: Option<String>,

	/// Long-poll bound, milliseconds.
	#[serde(default)]
	pub timeout: Option<u64>,

	#[serde(default)]
	pub set_presence: Option<String>,

	#[serde(default)]
	pub lists: BTreeMap<String, ListConfig>,

	#[serde(default)]
	pub room_subscriptions: BTreeMap<OwnedRoomId, RoomSubscription>,

	#[serde(default)]
	pub extensions: ExtensionsConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListConfig {
	#[serde(default)]
	pub timeline_limit: Option<usize>,

	#[serde(default)]
	pub required_state: Option<RequiredState>,

	#[serde(default, deserialize_with = "lenient_range")]
	pub range: Option<ListRange>,

	/// Legacy plural shape; the first range is used.
	#[serde(default, deserialize_with = "lenient_ranges")]
	pub ranges: Vec<ListRange>,

	#[serde(default)]
	pub filters: Option<Filters>,
}

impl ListConfig {
	/// The effective window, preferring the modern singular field.
	#[must_use]
	pub fn window(&self) -> Option<ListRange> {
		self.range.or_else(|| self.ranges.first().copied())
	}
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RoomSubscription {
	#[serde(default)]
	pub timeline_limit: Option<usize>,

	#[serde(default)]
	pub required_state: Option<RequiredState>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Filters {
	#[serde(default)]
	pub is_dm: Option<bool>,

	#[serde(default)]
	pub is_encrypted: Option<bool>,

	#[serde(default)]
	pub is_invite: Option<bool>,

	/// Case-insensitive substring match against the room's display name.
	#[serde(default)]
	pub room_name_like: Option<String>,

	/// Creation types to include; a `null` entry admits untyped rooms.
	#[serde(default)]
	pub room_types: Vec<Option<String>>,

	#[serde(default)]
	pub not_room_types: Vec<Option<String>>,

	#[serde(default)]
	pub tags: Vec<String>,

	#[serde(default)]
	pub not_tags: Vec<String>,

	/// Unsupported; a request naming spaces is rejected outright.
	#[serde(default)]
	pub spaces: Vec<String>,
}

//
// Extension configs. `lists`/`rooms` scope which of the response's rooms an
// extension covers: absent means all, empty means none, `"*"` means all.
//

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExtensionsConfig {
	#[serde(default)]
	pub to_device: ToDeviceConfig,

	#[serde(default)]
	pub e2ee: E2eeConfig,

	#[serde(default)]
	pub account_data: AccountDataConfig,

	#[serde(default)]
	pub receipts: ReceiptsConfig,

	#[serde(default)]
	pub typing: TypingConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ToDeviceConfig {
	#[serde(default)]
	pub enabled: Option<bool>,

	/// Cursor private to this extension; not the main sync token.
	#[serde(default)]
	pub since: Option<String>,

	#[serde(default)]
	pub limit: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct E2eeConfig {
	#[serde(default)]
	pub enabled: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountDataConfig {
	#[serde(default)]
	pub enabled: Option<bool>,

	#[serde(default)]
	pub lists: Option<Vec<String>>,

	#[serde(default)]
	pub rooms: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReceiptsConfig {
	#[serde(default)]
	pub enabled: Option<bool>,

	#[serde(default)]
	pub lists: Option<Vec<String>>,

	#[serde(default)]
	pub rooms: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TypingConfig {
	#[serde(default)]
	pub enabled: Option<bool>,

	#[serde(default)]
	pub lists: Option<Vec<String>>,

	#[serde(default)]
	pub rooms: Option<Vec<String>>,
}

//
// Response
//

#[derive(Clone, Debug, Default, Serialize)]
pub struct Response {
	pub pos: String,

	pub lists: BTreeMap<String, ResponseList>,

	pub rooms: BTreeMap<OwnedRoomId, RoomData>,

	pub extensions: Extensions,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ResponseList {
	/// Total matching rooms before windowing.
	pub count: u64,

	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub ops: Vec<SyncOp>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
	Sync,
	Insert,
	Delete,
	Invalidate,
}

#[derive(Clone, Debug, Serialize)]
pub struct SyncOp {
	pub op: OpKind,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub range: Option<(u64, u64)>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub index: Option<u64>,

	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub room_ids: Vec<OwnedRoomId>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RoomData {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub avatar_url: Option<OwnedMxcUri>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub topic: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub heroes: Option<Vec<Hero>>,

	/// True when the room is being sent on this connection for the first
	/// time, or again after a membership transition into join.
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub initial: bool,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_dm: Option<bool>,

	/// Stripped preview for invites; emitted under both spellings for
	/// client compatibility.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub invite_state: Vec<StrippedEvent>,

	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub stripped_state: Vec<StrippedEvent>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeline: Option<Vec<ClientEvent>>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub required_state: Option<Vec<ClientEvent>>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub prev_batch: Option<String>,

	pub limited: bool,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub joined_count: Option<u64>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub invited_count: Option<u64>,

	/// Count of timeline events strictly newer than the request's cursor.
	/// Always present.
	pub num_live: u64,

	/// Stream position of the room's most recent bump event.
	pub bump_stamp: u64,

	/// Server-side computation is impossible for encrypted rooms; clients
	/// derive both counts themselves.
	pub notification_count: u64,

	pub highlight_count: u64,

	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub expanded_timeline: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Hero {
	pub user_id: OwnedUserId,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub displayname: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub avatar_url: Option<OwnedMxcUri>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Extensions {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub to_device: Option<ToDevice>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub e2ee: Option<E2ee>,

	#[serde(skip_serializing_if = "AccountData::is_empty")]
	pub account_data: AccountData,

	#[serde(skip_serializing_if = "Receipts::is_empty")]
	pub receipts: Receipts,

	#[serde(skip_serializing_if = "Typing::is_empty")]
	pub typing: Typing,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ToDevice {
	pub next_batch: String,

	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub events: Vec<Box<RawJsonValue>>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct E2ee {
	/// Always present; `signed_curve25519` is guaranteed a value.
	pub device_one_time_keys_count: BTreeMap<String, u64>,

	pub device_unused_fallback_key_types: Vec<String>,

	/// Legacy spelling of the fallback key list, kept for older clients.
	#[serde(rename = "org.matrix.msc2732.device_unused_fallback_key_types")]
	pub unstable_device_unused_fallback_key_types: Vec<String>,

	/// Omitted entirely on initial sync and on incremental syncs where the
	/// device-list position did not move.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub device_lists: Option<DeviceLists>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceLists {
	pub changed: Vec<OwnedUserId>,

	pub left: Vec<OwnedUserId>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AccountData {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub global: Vec<Box<RawJsonValue>>,

	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub rooms: BTreeMap<OwnedRoomId, Vec<Box<RawJsonValue>>>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Receipts {
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub rooms: BTreeMap<OwnedRoomId, Box<RawJsonValue>>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Typing {
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub rooms: BTreeMap<OwnedRoomId, Box<RawJsonValue>>,
}

impl Response {
	/// Whether the response carries anything worth interrupting a long poll
	/// for: a list operation, room data, or any extension payload.
	#[must_use]
	pub fn has_updates(&self) -> bool {
		!self.rooms.is_empty()
			|| self
				.lists
				.values()
				.any(|list| !list.ops.is_empty())
			|| self.extensions.has_updates()
	}
}

impl Extensions {
	#[must_use]
	pub fn has_updates(&self) -> bool {
		self.to_device
			.as_ref()
			.is_some_and(|to_device| !to_device.events.is_empty())
			|| self
				.e2ee
				.as_ref()
				.is_some_and(|e2ee| {
					e2ee.device_lists.as_ref().is_some_and(|lists| {
						!lists.changed.is_empty() || !lists.left.is_empty()
					})
				})
			|| !self.account_data.is_empty()
			|| !self.receipts.is_empty()
			|| !self.typing.is_empty()
	}
}

impl AccountData {
	#[must_use]
	pub fn is_empty(&self) -> bool { self.global.is_empty() && self.rooms.is_empty() }
}

impl Receipts {
	#[must_use]
	pub fn is_empty(&self) -> bool { self.rooms.is_empty() }
}

impl Typing {
	#[must_use]
	pub fn is_empty(&self) -> bool { self.rooms.is_empty() }
}

fn lenient_range<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<ListRange>, D::Error> {
	let value = serde_json::Value::deserialize(deserializer)?;
	Ok(range_from_value(&value))
}

fn lenient_ranges<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ListRange>, D::Error> {
	let value = serde_json::Value::deserialize(deserializer)?;
	let Some(items) = value.as_array() else {
		return Ok(Vec::new());
	};

	Ok(items.iter().filter_map(range_from_value).collect())
}

fn range_from_value(value: &serde_json::Value) -> Option<ListRange> {
	let items = value.as_array()?;
	if items.len() != 2 {
		return None;
	}

	Some((items[0].as_i64()?, items[1].as_i64()?))
}

#[cfg(test)]
mod tests {
	use super::{ListConfig, Request};

	#[test]
	fn request_minimal() {
		let request: Request = serde_json::from_str("{}").unwrap();
		assert!(request.pos.is_none());
		assert!(request.lists.is_empty());
		assert!(request.extensions.to_device.enabled.is_none());
	}

	#[test]
	fn list_window_prefers_singular() {
		let list: ListConfig =
			serde_json::from_str(r#"{"range":[0,9],"ranges":[[5,6]]}"#).unwrap();
		assert_eq!(list.window(), Some((0, 9)));

		let legacy: ListConfig = serde_json::from_str(r#"{"ranges":[[5,6],[7,8]]}"#).unwrap();
		assert_eq!(legacy.window(), Some((5, 6)));
	}

	#[test]
	fn malformed_range_means_no_window() {
		let list: ListConfig = serde_json::from_str(r#"{"range":[0,"x"]}"#).unwrap();
		assert_eq!(list.window(), None);

		let list: ListConfig = serde_json::from_str(r#"{"range":[0,1,2]}"#).unwrap();
		assert_eq!(list.window(), None);

		let list: ListConfig = serde_json::from_str(r#"{"range":"whole"}"#).unwrap();
		assert_eq!(list.window(), None);
	}

	#[test]
	fn negative_range_survives_parsing() {
		let list: ListConfig = serde_json::from_str(r#"{"range":[-3,9]}"#).unwrap();
		assert_eq!(list.window(), Some((-3, 9)));
	}

	#[test]
	fn required_state_both_shapes_accepted() {
		let request: Request = serde_json::from_str(
			r#"{"lists":{
				"a":{"timeline_limit":5,"required_state":[["m.room.name",""]]},
				"b":{"required_state":{"include":[["*","*"]],"lazy_members":true}}
			}}"#,
		)
		.unwrap();

		let a = request.lists["a"].required_state.as_ref().unwrap();
		let b = request.lists["b"].required_state.as_ref().unwrap();
		assert_eq!(a.include.len(), 1);
		assert!(b.lazy_members);
	}
}
