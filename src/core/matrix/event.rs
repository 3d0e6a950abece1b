use ruma::{
	OwnedEventId, OwnedMxcUri, OwnedRoomId, OwnedUserId, UInt,
	events::{StateEventType, TimelineEventType, room::member::MembershipState},
};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue as RawJsonValue;

use super::state_key::StateKey;
use crate::Result;

/// Event types whose arrival raises a room in recency-ordered lists.
/// Membership changes, reactions, redactions and state edits do not bump.
pub const BUMP_TYPES: &[TimelineEventType; 7] = &[
	TimelineEventType::Beacon,
	TimelineEventType::CallInvite,
	TimelineEventType::PollStart,
	TimelineEventType::RoomCreate,
	TimelineEventType::RoomEncrypted,
	TimelineEventType::RoomMessage,
	TimelineEventType::Sticker,
];

/// An event as handed over by the event store. The sender is an unresolved
/// sender identifier; the room-server maps it to a user id before the event
/// leaves the engine.
#[derive(Clone, Debug)]
pub struct StreamEvent {
	pub event_id: OwnedEventId,

	pub sender: String,

	pub origin_server_ts: UInt,

	pub kind: TimelineEventType,

	pub state_key: Option<StateKey>,

	pub content: Box<RawJsonValue>,

	pub unsigned: Option<Box<RawJsonValue>>,

	/// Stream ordinal assigned by the event store.
	pub position: u64,
}

/// The client-facing projection of an event.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClientEvent {
	pub event_id: OwnedEventId,

	pub sender: OwnedUserId,

	pub origin_server_ts: UInt,

	#[serde(rename = "type")]
	pub kind: TimelineEventType,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub state_key: Option<StateKey>,

	pub content: Box<RawJsonValue>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unsigned: Option<Box<RawJsonValue>>,
}

/// Minimal, non-authoritative state preview element embedded in invites.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StrippedEvent {
	#[serde(rename = "type")]
	pub kind: StateEventType,

	pub state_key: StateKey,

	pub sender: OwnedUserId,

	pub content: Box<RawJsonValue>,
}

#[derive(Deserialize)]
struct StrippedUnsigned {
	#[serde(default)]
	invite_room_state: Option<Vec<StrippedEvent>>,
}

impl StreamEvent {
	#[inline]
	#[must_use]
	pub fn is_state(&self) -> bool { self.state_key.is_some() }

	#[inline]
	#[must_use]
	pub fn is_bump(&self) -> bool { BUMP_TYPES.contains(&self.kind) }

	/// Parse the typed content of the event.
	pub fn get_content<T>(&self) -> Result<T>
	where
		T: for<'de> Deserialize<'de>,
	{
		serde_json::from_str(self.content.get()).map_err(Into::into)
	}

	/// The embedded invite-state preview, when this is an invite membership
	/// event carrying one in its unsigned contents.
	#[must_use]
	pub fn invite_room_state(&self) -> Option<Vec<StrippedEvent>> {
		let unsigned = self.unsigned.as_deref()?;
		serde_json::from_str::<StrippedUnsigned>(unsigned.get())
			.ok()?
			.invite_room_state
	}

	/// Project into the client-facing form with a resolved sender. The
	/// unsigned contents travel along.
	#[must_use]
	pub fn to_client(&self, sender: OwnedUserId) -> ClientEvent {
		ClientEvent {
			event_id: self.event_id.clone(),
			sender,
			origin_server_ts: self.origin_server_ts,
			kind: self.kind.clone(),
			state_key: self.state_key.clone(),
			content: self.content.clone(),
			unsigned: self.unsigned.clone(),
		}
	}

	/// Project into a stripped preview element: type, state_key, sender and
	/// content only.
	#[must_use]
	pub fn to_stripped(&self, sender: OwnedUserId) -> StrippedEvent {
		StrippedEvent {
			kind: self.kind.to_string().as_str().into(),
			state_key: self.state_key.clone().unwrap_or_else(StateKey::new),
			sender,
			content: self.content.clone(),
		}
	}
}

//
// Typed state-event contents the engine inspects.
//

#[derive(Clone, Debug, Deserialize)]
pub struct MemberContent {
	pub membership: MembershipState,

	#[serde(default)]
	pub displayname: Option<String>,

	#[serde(default)]
	pub avatar_url: Option<OwnedMxcUri>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NameContent {
	#[serde(default)]
	pub name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AvatarContent {
	#[serde(default)]
	pub url: Option<OwnedMxcUri>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TopicContent {
	#[serde(default)]
	pub topic: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CreateContent {
	#[serde(default, rename = "type")]
	pub room_type: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EncryptionContent {
	#[serde(default)]
	pub algorithm: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TombstoneContent {
	#[serde(default)]
	pub replacement_room: Option<OwnedRoomId>,
}

/// Content of the global `m.direct` account-data event: peer to rooms.
pub type DirectContent = std::collections::BTreeMap<OwnedUserId, Vec<OwnedRoomId>>;

/// Content of a per-room `m.tag` account-data event.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TagContent {
	#[serde(default)]
	pub tags: std::collections::BTreeMap<String, serde_json::Value>,
}
