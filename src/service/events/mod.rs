//! Narrow interface onto the homeserver's durable event store. The engine
//! never touches the room DAG or the event tables directly; everything it
//! needs arrives through this trait, bounded by stream positions so one
//! logical snapshot serves a whole request.

use std::collections::BTreeSet;

use async_trait::async_trait;
use luge_core::{Result, StreamEvent, TopologyToken};
use ruma::{
	EventId, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId, UserId,
	events::{TimelineEventType, room::member::MembershipState},
};

/// One room the user has (or had) a membership in.
#[derive(Clone, Debug)]
pub struct MembershipEntry {
	pub room_id: OwnedRoomId,

	pub membership: MembershipState,

	/// Sender of the membership event; a leave sent by someone else is a
	/// kick.
	pub sender: OwnedUserId,
}

impl MembershipEntry {
	/// A leave authored by another user; self-leaves fail this and drop
	/// out of the default sets.
	#[must_use]
	pub fn is_kick(&self, user_id: &UserId) -> bool {
		self.membership == MembershipState::Leave && self.sender != user_id
	}
}

/// A bounded timeline fetch. Events are oldest-first; `limited` is the
/// store's own truncation verdict and is never recomputed by the engine.
#[derive(Clone, Debug, Default)]
pub struct TimelineChunk {
	pub events: Vec<StreamEvent>,

	pub limited: bool,
}

/// A row of the invite table.
#[derive(Clone, Debug)]
pub struct InviteEntry {
	pub room_id: OwnedRoomId,

	/// The invite membership event; federated invites embed a stripped
	/// state preview in its unsigned contents.
	pub event: StreamEvent,

	/// Invite-stream position of the row.
	pub position: u64,

	/// Retired invites no longer grant invite membership but still count as
	/// invite-stream changes.
	pub retired: bool,
}

/// Latest receipt of one `(type, user)` pair in a room.
#[derive(Clone, Debug)]
pub struct ReceiptEntry {
	pub receipt_type: String,

	pub user_id: OwnedUserId,

	pub event_id: OwnedEventId,

	pub ts: u64,

	pub position: u64,
}

/// One changed `(room, type)` pair of the account-data stream. A `None`
/// room is global account data.
#[derive(Clone, Debug)]
pub struct AccountDataChange {
	pub room_id: Option<OwnedRoomId>,

	pub kind: String,

	pub position: u64,
}

#[async_trait]
pub trait EventStore: Send + Sync {
	/// All rooms the user has any membership in, one entry per room.
	async fn memberships(&self, user_id: &UserId) -> Result<Vec<MembershipEntry>>;

	/// The user's membership in one room at a PDU-stream position, with
	/// the position of the membership event that established it; `None`
	/// position caps at the present. A missing membership resolves to
	/// `Ok(None)` and is treated as leave by callers.
	async fn membership_at(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		at: Option<u64>,
	) -> Result<Option<(MembershipState, u64)>>;

	/// `(joined, invited)` member counts at a PDU-stream position.
	async fn member_counts(&self, room_id: &RoomId, at: u64) -> Result<(u64, u64)>;

	/// Events with `from < position <= to`, keeping the newest `limit`,
	/// oldest-first.
	async fn events_in_range(
		&self,
		room_id: &RoomId,
		from: u64,
		to: u64,
		limit: usize,
	) -> Result<TimelineChunk>;

	/// Of `rooms`, the subset with at least one event in `(from, to]`. One
	/// store snapshot serves the whole slice.
	async fn rooms_with_events(
		&self,
		rooms: &[OwnedRoomId],
		from: u64,
		to: u64,
	) -> Result<BTreeSet<OwnedRoomId>>;

	/// Rooms with invite-table changes for the user in `(from, to]`,
	/// retired rows included.
	async fn rooms_with_invite_changes(
		&self,
		user_id: &UserId,
		from: u64,
		to: u64,
	) -> Result<BTreeSet<OwnedRoomId>>;

	/// Topological position of an event, for pagination handoff.
	async fn topology_position(
		&self,
		room_id: &RoomId,
		event_id: &EventId,
	) -> Result<Option<TopologyToken>>;

	/// One current-state event.
	async fn state_event(
		&self,
		room_id: &RoomId,
		event_type: &str,
		state_key: &str,
	) -> Result<Option<StreamEvent>>;

	/// The room's full current state.
	async fn full_state(&self, room_id: &RoomId) -> Result<Vec<StreamEvent>>;

	/// The room summary's hero members.
	async fn heroes(&self, room_id: &RoomId) -> Result<Vec<OwnedUserId>>;

	/// Highest PDU-stream position in the room.
	async fn room_position(&self, room_id: &RoomId) -> Result<u64>;

	/// Stream position of the room's most recent event of any given type.
	async fn bump_position(
		&self,
		room_id: &RoomId,
		types: &[TimelineEventType],
	) -> Result<Option<u64>>;

	/// The user's active (non-retired) invite in a room, considering rows
	/// at or below the invite-stream position.
	async fn invite(
		&self,
		user_id: &UserId,
		room_id: &RoomId,
		to: u64,
	) -> Result<Option<InviteEntry>>;

	/// All the user's active invites at or below the invite-stream
	/// position.
	async fn invites(&self, user_id: &UserId, to: u64) -> Result<Vec<InviteEntry>>;

	/// Latest receipt per `(type, user)` in the room at or below the
	/// receipt-stream position.
	async fn latest_receipts(&self, room_id: &RoomId, to: u64) -> Result<Vec<ReceiptEntry>>;

	/// Changed `(room, type)` pairs of the user's account data in
	/// `(from, to]`.
	async fn account_data_changes(
		&self,
		user_id: &UserId,
		from: u64,
		to: u64,
	) -> Result<Vec<AccountDataChange>>;
}
