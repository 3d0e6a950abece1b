//! In-memory collaborators and a harness driving the engine end-to-end.

#![allow(dead_code)]

use std::{
	collections::{BTreeMap, BTreeSet},
	path::PathBuf,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use async_trait::async_trait;
use luge_core::{
	Config, Result, Server, StreamEvent, StreamKind, TopologyToken,
	matrix::sliding::Request,
};
use luge_service::{
	EventStore, RoomServer, Services, Sources, TypingCache, UserService,
	events::{
		AccountDataChange, InviteEntry, MembershipEntry, ReceiptEntry, TimelineChunk,
	},
	users::DeviceListChanges,
};
use ruma::{
	DeviceId, EventId, OwnedDeviceId, OwnedRoomId, OwnedUserId, RoomId, UserId,
	events::{TimelineEventType, room::member::MembershipState},
};
use serde_json::value::RawValue as RawJsonValue;

static NONCE: AtomicUsize = AtomicUsize::new(0);

pub struct Harness {
	pub services: Arc<Services>,
	pub store: Arc<FakeStore>,
	pub users: Arc<FakeUsers>,
	pub rooms: Arc<FakeRooms>,
	pub typing: Arc<FakeTyping>,
	path: PathBuf,
}

impl Drop for Harness {
	fn drop(&mut self) {
		let _result = std::fs::remove_dir_all(&self.path);
	}
}

pub fn harness() -> Harness {
	let nonce = NONCE.fetch_add(1, Ordering::SeqCst);
	let path = std::env::temp_dir().join(format!(
		"luge-sliding-test-{}-{nonce}",
		std::process::id()
	));

	let mut config = Config::default();
	config.database_path = path.clone();

	let server = Server::new(config);
	let store = Arc::new(FakeStore::default());
	let users = Arc::new(FakeUsers::default());
	let rooms = Arc::new(FakeRooms::default());
	let typing = Arc::new(FakeTyping::default());

	let services = Services::build(server, Sources {
		events: store.clone(),
		users: users.clone(),
		rooms: rooms.clone(),
		typing: typing.clone(),
	})
	.expect("services build");

	Harness {
		services,
		store,
		users,
		rooms,
		typing,
		path,
	}
}

impl Harness {
	/// Record a join and advance the PDU stream.
	pub fn join(&self, room_id: &RoomId, user_id: &UserId, position: u64) {
		self.store
			.membership(room_id, user_id, user_id, MembershipState::Join, position);
		self.advance(StreamKind::Pdu, position);
	}

	pub fn kick(&self, room_id: &RoomId, user_id: &UserId, kicker: &UserId, position: u64) {
		self.store
			.membership(room_id, user_id, kicker, MembershipState::Leave, position);
		self.advance(StreamKind::Pdu, position);
	}

	pub fn leave(&self, room_id: &RoomId, user_id: &UserId, position: u64) {
		self.store
			.membership(room_id, user_id, user_id, MembershipState::Leave, position);
		self.advance(StreamKind::Pdu, position);
	}

	pub fn message(&self, room_id: &RoomId, sender: &UserId, body: &str, position: u64) {
		self.store.timeline_event(
			room_id,
			make_event(
				&format!("$m{position}:host"),
				sender.as_str(),
				TimelineEventType::RoomMessage,
				None,
				&format!(r#"{{"msgtype":"m.text","body":{}}}"#, json_str(body)),
				position,
			),
		);

		self.advance(StreamKind::Pdu, position);
	}

	/// A non-bump timeline event.
	pub fn reaction(&self, room_id: &RoomId, sender: &UserId, position: u64) {
		self.store.timeline_event(
			room_id,
			make_event(
				&format!("$a{position}:host"),
				sender.as_str(),
				TimelineEventType::Reaction,
				None,
				r#"{"m.relates_to":{"rel_type":"m.annotation","key":"x"}}"#,
				position,
			),
		);

		self.advance(StreamKind::Pdu, position);
	}

	pub fn set_name(&self, room_id: &RoomId, sender: &UserId, name: &str, position: u64) {
		self.store.state(
			room_id,
			make_event(
				&format!("$n{position}:host"),
				sender.as_str(),
				TimelineEventType::RoomName,
				Some(""),
				&format!(r#"{{"name":{}}}"#, json_str(name)),
				position,
			),
		);
	}

	pub fn set_member_profile(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		displayname: &str,
		position: u64,
	) {
		self.store.state(
			room_id,
			make_event(
				&format!("$mem{position}:host"),
				user_id.as_str(),
				TimelineEventType::RoomMember,
				Some(user_id.as_str()),
				&format!(
					r#"{{"membership":"join","displayname":{}}}"#,
					json_str(displayname)
				),
				position,
			),
		);
	}

	pub fn invite_remote(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		inviter: &str,
		position: u64,
		invite_room_state: &str,
	) {
		let unsigned = format!(r#"{{"invite_room_state":{invite_room_state}}}"#);
		let mut event = make_event(
			&format!("$i{position}:remote"),
			inviter,
			TimelineEventType::RoomMember,
			Some(user_id.as_str()),
			r#"{"membership":"invite"}"#,
			position,
		);

		event.unsigned = Some(raw(&unsigned));
		self.store.invite(user_id, InviteEntry {
			room_id: room_id.to_owned(),
			event,
			position,
			retired: false,
		});

		self.advance(StreamKind::Invite, position);
	}

	pub fn advance(&self, kind: StreamKind, position: u64) {
		self.services.notify.advance(kind, position, &[]);
	}

	pub async fn sync(
		&self,
		user_id: &UserId,
		device_id: &DeviceId,
		request: Request,
	) -> Result<luge_core::matrix::sliding::Response> {
		luge_api::client::sync::sync_events(&self.services, user_id, device_id, request).await
	}
}

pub fn request(value: serde_json::Value) -> Request {
	serde_json::from_value(value).expect("request shape parses")
}

pub fn make_event(
	event_id: &str,
	sender: &str,
	kind: TimelineEventType,
	state_key: Option<&str>,
	content: &str,
	position: u64,
) -> StreamEvent {
	StreamEvent {
		event_id: event_id.try_into().expect("valid event id"),
		sender: sender.to_owned(),
		origin_server_ts: u32::try_from(position)
			.expect("test positions fit")
			.into(),
		kind,
		state_key: state_key.map(Into::into),
		content: raw(content),
		unsigned: None,
		position,
	}
}

pub fn raw(json: &str) -> Box<RawJsonValue> {
	RawJsonValue::from_string(json.to_owned()).expect("valid raw json")
}

fn json_str(s: &str) -> String { serde_json::to_string(s).expect("string encodes") }

//
// Fake event store
//

#[derive(Default)]
pub struct FakeStore {
	inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
	rooms: BTreeMap<OwnedRoomId, FakeRoom>,
	invites: Vec<(OwnedUserId, InviteEntry)>,
	account_changes: Vec<(OwnedUserId, AccountDataChange)>,
	receipts: BTreeMap<OwnedRoomId, Vec<ReceiptEntry>>,
}

#[derive(Default)]
struct FakeRoom {
	timeline: Vec<StreamEvent>,
	state: Vec<StreamEvent>,
	memberships: BTreeMap<OwnedUserId, Vec<(u64, MembershipState, OwnedUserId)>>,
	heroes: Vec<OwnedUserId>,
}

impl FakeStore {
	fn membership(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		sender: &UserId,
		membership: MembershipState,
		position: u64,
	) {
		let mut inner = self.inner.lock().expect("locked");
		inner
			.rooms
			.entry(room_id.to_owned())
			.or_default()
			.memberships
			.entry(user_id.to_owned())
			.or_default()
			.push((position, membership, sender.to_owned()));
	}

	fn timeline_event(&self, room_id: &RoomId, event: StreamEvent) {
		let mut inner = self.inner.lock().expect("locked");
		inner
			.rooms
			.entry(room_id.to_owned())
			.or_default()
			.timeline
			.push(event);
	}

	fn state(&self, room_id: &RoomId, event: StreamEvent) {
		let mut inner = self.inner.lock().expect("locked");
		let room = inner.rooms.entry(room_id.to_owned()).or_default();
		let kind = event.kind.clone();
		let state_key = event.state_key.clone();
		room.state
			.retain(|existing| (existing.kind.clone(), existing.state_key.clone()) != (kind.clone(), state_key.clone()));
		room.state.push(event);
	}

	fn invite(&self, user_id: &UserId, invite: InviteEntry) {
		let mut inner = self.inner.lock().expect("locked");
		inner.invites.push((user_id.to_owned(), invite));
	}

	pub fn retire_invite(&self, user_id: &UserId, room_id: &RoomId, position: u64) {
		let mut inner = self.inner.lock().expect("locked");
		for (owner, invite) in &mut inner.invites {
			if owner == user_id && invite.room_id == room_id {
				invite.retired = true;
				invite.position = position;
			}
		}
	}

	pub fn set_heroes(&self, room_id: &RoomId, heroes: Vec<OwnedUserId>) {
		let mut inner = self.inner.lock().expect("locked");
		inner
			.rooms
			.entry(room_id.to_owned())
			.or_default()
			.heroes = heroes;
	}

	pub fn add_receipt(
		&self,
		room_id: &RoomId,
		receipt_type: &str,
		user_id: &UserId,
		event_id: &str,
		ts: u64,
		position: u64,
	) {
		let mut inner = self.inner.lock().expect("locked");
		inner
			.receipts
			.entry(room_id.to_owned())
			.or_default()
			.push(ReceiptEntry {
				receipt_type: receipt_type.to_owned(),
				user_id: user_id.to_owned(),
				event_id: event_id.try_into().expect("valid event id"),
				ts,
				position,
			});
	}

	pub fn add_account_change(&self, user_id: &UserId, room_id: Option<&RoomId>, kind: &str, position: u64) {
		let mut inner = self.inner.lock().expect("locked");
		inner.account_changes.push((user_id.to_owned(), AccountDataChange {
			room_id: room_id.map(ToOwned::to_owned),
			kind: kind.to_owned(),
			position,
		}));
	}

	fn membership_of(
		room: &FakeRoom,
		user_id: &UserId,
		at: Option<u64>,
	) -> Option<(MembershipState, u64)> {
		let history = room.memberships.get(user_id)?;
		history
			.iter()
			.filter(|(position, ..)| at.is_none_or(|at| *position <= at))
			.max_by_key(|(position, ..)| *position)
			.map(|(position, membership, _)| (membership.clone(), *position))
	}
}

#[async_trait]
impl EventStore for FakeStore {
	async fn memberships(&self, user_id: &UserId) -> Result<Vec<MembershipEntry>> {
		let inner = self.inner.lock().expect("locked");
		let mut out = Vec::new();
		for (room_id, room) in &inner.rooms {
			let Some(history) = room.memberships.get(user_id) else {
				continue;
			};

			let Some((_, membership, sender)) =
				history.iter().max_by_key(|(position, ..)| *position)
			else {
				continue;
			};

			out.push(MembershipEntry {
				room_id: room_id.clone(),
				membership: membership.clone(),
				sender: sender.clone(),
			});
		}

		Ok(out)
	}

	async fn membership_at(
		&self,
		room_id: &RoomId,
		user_id: &UserId,
		at: Option<u64>,
	) -> Result<Option<(MembershipState, u64)>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.rooms
			.get(room_id)
			.and_then(|room| Self::membership_of(room, user_id, at)))
	}

	async fn member_counts(&self, room_id: &RoomId, at: u64) -> Result<(u64, u64)> {
		let inner = self.inner.lock().expect("locked");
		let Some(room) = inner.rooms.get(room_id) else {
			return Ok((0, 0));
		};

		let mut joined = 0;
		let mut invited = 0;
		for user_id in room.memberships.keys() {
			match Self::membership_of(room, user_id, Some(at)) {
				| Some((MembershipState::Join, _)) => joined += 1,
				| Some((MembershipState::Invite, _)) => invited += 1,
				| _ => {},
			}
		}

		Ok((joined, invited))
	}

	async fn events_in_range(
		&self,
		room_id: &RoomId,
		from: u64,
		to: u64,
		limit: usize,
	) -> Result<TimelineChunk> {
		let inner = self.inner.lock().expect("locked");
		let Some(room) = inner.rooms.get(room_id) else {
			return Ok(TimelineChunk::default());
		};

		let mut events: Vec<StreamEvent> = room
			.timeline
			.iter()
			.filter(|event| event.position > from && event.position <= to)
			.cloned()
			.collect();

		events.sort_by_key(|event| event.position);

		let limited = events.len() > limit;
		if limited {
			events.drain(..events.len() - limit);
		}

		Ok(TimelineChunk { events, limited })
	}

	async fn rooms_with_events(
		&self,
		rooms: &[OwnedRoomId],
		from: u64,
		to: u64,
	) -> Result<BTreeSet<OwnedRoomId>> {
		let inner = self.inner.lock().expect("locked");
		Ok(rooms
			.iter()
			.filter(|room_id| {
				inner.rooms.get(*room_id).is_some_and(|room| {
					room.timeline
						.iter()
						.any(|event| event.position > from && event.position <= to)
				})
			})
			.cloned()
			.collect())
	}

	async fn rooms_with_invite_changes(
		&self,
		user_id: &UserId,
		from: u64,
		to: u64,
	) -> Result<BTreeSet<OwnedRoomId>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.invites
			.iter()
			.filter(|(owner, invite)| {
				owner == user_id && invite.position > from && invite.position <= to
			})
			.map(|(_, invite)| invite.room_id.clone())
			.collect())
	}

	async fn topology_position(
		&self,
		_room_id: &RoomId,
		event_id: &EventId,
	) -> Result<Option<TopologyToken>> {
		let inner = self.inner.lock().expect("locked");
		for room in inner.rooms.values() {
			if let Some(event) = room
				.timeline
				.iter()
				.find(|event| event.event_id == event_id)
			{
				return Ok(Some(TopologyToken {
					depth: event.position,
					stream: event.position,
				}));
			}
		}

		Ok(None)
	}

	async fn state_event(
		&self,
		room_id: &RoomId,
		event_type: &str,
		state_key: &str,
	) -> Result<Option<StreamEvent>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner.rooms.get(room_id).and_then(|room| {
			room.state
				.iter()
				.find(|event| {
					event.kind.to_string() == event_type
						&& event.state_key.as_deref() == Some(state_key)
				})
				.cloned()
		}))
	}

	async fn full_state(&self, room_id: &RoomId) -> Result<Vec<StreamEvent>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.rooms
			.get(room_id)
			.map(|room| room.state.clone())
			.unwrap_or_default())
	}

	async fn heroes(&self, room_id: &RoomId) -> Result<Vec<OwnedUserId>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.rooms
			.get(room_id)
			.map(|room| room.heroes.clone())
			.unwrap_or_default())
	}

	async fn room_position(&self, room_id: &RoomId) -> Result<u64> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.rooms
			.get(room_id)
			.and_then(|room| {
				room.timeline
					.iter()
					.map(|event| event.position)
					.max()
			})
			.unwrap_or(0))
	}

	async fn bump_position(
		&self,
		room_id: &RoomId,
		types: &[TimelineEventType],
	) -> Result<Option<u64>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner.rooms.get(room_id).and_then(|room| {
			room.timeline
				.iter()
				.filter(|event| types.contains(&event.kind))
				.map(|event| event.position)
				.max()
		}))
	}

	async fn invite(
		&self,
		user_id: &UserId,
		room_id: &RoomId,
		to: u64,
	) -> Result<Option<InviteEntry>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.invites
			.iter()
			.find(|(owner, invite)| {
				owner == user_id
					&& invite.room_id == room_id
					&& !invite.retired && invite.position <= to
			})
			.map(|(_, invite)| invite.clone()))
	}

	async fn invites(&self, user_id: &UserId, to: u64) -> Result<Vec<InviteEntry>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.invites
			.iter()
			.filter(|(owner, invite)| {
				owner == user_id && !invite.retired && invite.position <= to
			})
			.map(|(_, invite)| invite.clone())
			.collect())
	}

	async fn latest_receipts(&self, room_id: &RoomId, to: u64) -> Result<Vec<ReceiptEntry>> {
		let inner = self.inner.lock().expect("locked");
		let Some(entries) = inner.receipts.get(room_id) else {
			return Ok(Vec::new());
		};

		let mut latest: BTreeMap<(String, OwnedUserId), ReceiptEntry> = BTreeMap::new();
		for entry in entries {
			if entry.position > to {
				continue;
			}

			let key = (entry.receipt_type.clone(), entry.user_id.clone());
			match latest.get(&key) {
				| Some(existing) if existing.position >= entry.position => {},
				| _ => {
					latest.insert(key, entry.clone());
				},
			}
		}

		Ok(latest.into_values().collect())
	}

	async fn account_data_changes(
		&self,
		user_id: &UserId,
		from: u64,
		to: u64,
	) -> Result<Vec<AccountDataChange>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.account_changes
			.iter()
			.filter(|(owner, change)| {
				owner == user_id && change.position > from && change.position <= to
			})
			.map(|(_, change)| change.clone())
			.collect())
	}
}

//
// Fake user service
//

#[derive(Default)]
pub struct FakeUsers {
	inner: Mutex<UsersInner>,
}

#[derive(Default)]
struct UsersInner {
	otk: BTreeMap<String, u64>,
	fallback: Vec<String>,
	device_changes: Vec<(u64, OwnedUserId)>,
	device_left: Vec<(u64, OwnedUserId)>,
	account: BTreeMap<(OwnedUserId, Option<OwnedRoomId>, String), String>,
	to_device: BTreeMap<(OwnedUserId, OwnedDeviceId), Vec<(u64, String)>>,
	ignored: BTreeSet<OwnedUserId>,
	tags: BTreeMap<(OwnedUserId, OwnedRoomId), Vec<String>>,
}

impl FakeUsers {
	pub fn set_otk(&self, algorithm: &str, count: u64) {
		self.inner
			.lock()
			.expect("locked")
			.otk
			.insert(algorithm.to_owned(), count);
	}

	pub fn device_change(&self, position: u64, user_id: &UserId) {
		self.inner
			.lock()
			.expect("locked")
			.device_changes
			.push((position, user_id.to_owned()));
	}

	pub fn set_account_data(
		&self,
		user_id: &UserId,
		room_id: Option<&RoomId>,
		kind: &str,
		content: &str,
	) {
		self.inner.lock().expect("locked").account.insert(
			(user_id.to_owned(), room_id.map(ToOwned::to_owned), kind.to_owned()),
			content.to_owned(),
		);
	}

	pub fn queue_to_device(
		&self,
		user_id: &UserId,
		device_id: &DeviceId,
		position: u64,
		content: &str,
	) {
		self.inner
			.lock()
			.expect("locked")
			.to_device
			.entry((user_id.to_owned(), device_id.to_owned()))
			.or_default()
			.push((position, content.to_owned()));
	}

	pub fn pending_to_device(&self, user_id: &UserId, device_id: &DeviceId) -> usize {
		self.inner
			.lock()
			.expect("locked")
			.to_device
			.get(&(user_id.to_owned(), device_id.to_owned()))
			.map_or(0, Vec::len)
	}

	pub fn ignore(&self, user_id: &UserId) {
		self.inner
			.lock()
			.expect("locked")
			.ignored
			.insert(user_id.to_owned());
	}

	pub fn tag(&self, user_id: &UserId, room_id: &RoomId, tag: &str) {
		self.inner
			.lock()
			.expect("locked")
			.tags
			.entry((user_id.to_owned(), room_id.to_owned()))
			.or_default()
			.push(tag.to_owned());
	}
}

#[async_trait]
impl UserService for FakeUsers {
	async fn one_time_key_counts(
		&self,
		_user_id: &UserId,
		_device_id: &DeviceId,
	) -> Result<BTreeMap<String, u64>> {
		Ok(self.inner.lock().expect("locked").otk.clone())
	}

	async fn unused_fallback_key_types(
		&self,
		_user_id: &UserId,
		_device_id: &DeviceId,
	) -> Result<Vec<String>> {
		Ok(self.inner.lock().expect("locked").fallback.clone())
	}

	async fn device_list_changes(
		&self,
		_user_id: &UserId,
		from: u64,
		to: u64,
	) -> Result<DeviceListChanges> {
		let inner = self.inner.lock().expect("locked");
		Ok(DeviceListChanges {
			changed: inner
				.device_changes
				.iter()
				.filter(|(position, _)| *position > from && *position <= to)
				.map(|(_, user_id)| user_id.clone())
				.collect(),
			left: inner
				.device_left
				.iter()
				.filter(|(position, _)| *position > from && *position <= to)
				.map(|(_, user_id)| user_id.clone())
				.collect(),
		})
	}

	async fn account_data(
		&self,
		user_id: &UserId,
		room_id: Option<&RoomId>,
		kind: &str,
	) -> Result<Option<Box<RawJsonValue>>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.account
			.get(&(user_id.to_owned(), room_id.map(ToOwned::to_owned), kind.to_owned()))
			.map(|content| raw(content)))
	}

	async fn ack_to_device(&self, user_id: &UserId, device_id: &DeviceId, upto: u64) -> Result {
		let mut inner = self.inner.lock().expect("locked");
		if let Some(queue) = inner
			.to_device
			.get_mut(&(user_id.to_owned(), device_id.to_owned()))
		{
			queue.retain(|(position, _)| *position > upto);
		}

		Ok(())
	}

	async fn to_device_events(
		&self,
		user_id: &UserId,
		device_id: &DeviceId,
		from: u64,
		to: u64,
		limit: usize,
	) -> Result<(Vec<Box<RawJsonValue>>, u64)> {
		let inner = self.inner.lock().expect("locked");
		let Some(queue) = inner
			.to_device
			.get(&(user_id.to_owned(), device_id.to_owned()))
		else {
			return Ok((Vec::new(), from));
		};

		let mut qualifying: Vec<&(u64, String)> = queue
			.iter()
			.filter(|(position, _)| *position > from && *position <= to)
			.collect();

		qualifying.sort_by_key(|(position, _)| *position);
		qualifying.truncate(limit);

		let last = qualifying
			.last()
			.map_or(from, |(position, _)| *position);

		let events = qualifying
			.into_iter()
			.map(|(_, content)| raw(content))
			.collect();

		Ok((events, last))
	}

	async fn ignored_users(&self, _user_id: &UserId) -> Result<BTreeSet<OwnedUserId>> {
		Ok(self.inner.lock().expect("locked").ignored.clone())
	}

	async fn room_tags(&self, user_id: &UserId, room_id: &RoomId) -> Result<Vec<String>> {
		let inner = self.inner.lock().expect("locked");
		Ok(inner
			.tags
			.get(&(user_id.to_owned(), room_id.to_owned()))
			.cloned()
			.unwrap_or_default())
	}
}

//
// Fake room-server and typing cache
//

#[derive(Default)]
pub struct FakeRooms {
	pub partial_state: Mutex<BTreeSet<OwnedRoomId>>,
}

#[async_trait]
impl RoomServer for FakeRooms {
	async fn resolve_sender(
		&self,
		_room_id: &RoomId,
		sender: &str,
	) -> Result<Option<OwnedUserId>> {
		Ok(UserId::parse(sender).ok())
	}

	async fn is_partial_state(&self, room_id: &RoomId) -> Result<bool> {
		Ok(self
			.partial_state
			.lock()
			.expect("locked")
			.contains(room_id))
	}
}

#[derive(Default)]
pub struct FakeTyping {
	rooms: Mutex<BTreeMap<OwnedRoomId, (Vec<OwnedUserId>, u64)>>,
}

impl FakeTyping {
	pub fn set(&self, room_id: &RoomId, user_ids: Vec<OwnedUserId>, position: u64) {
		self.rooms
			.lock()
			.expect("locked")
			.insert(room_id.to_owned(), (user_ids, position));
	}
}

#[async_trait]
impl TypingCache for FakeTyping {
	async fn typing_users(&self, room_id: &RoomId) -> Result<(Vec<OwnedUserId>, u64)> {
		Ok(self
			.rooms
			.lock()
			.expect("locked")
			.get(room_id)
			.cloned()
			.unwrap_or((Vec::new(), 0)))
	}
}
