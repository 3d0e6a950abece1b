//! Per-room payload building: stream-state classification, timeline
//! fetching, required state, metadata, counts, heroes, and the stripped
//! branch for invites and knocks.

use std::collections::{BTreeMap, BTreeSet};

use luge_core::{
	Result, StreamToken, debug_error, trace,
	matrix::{
		event::{
			AvatarContent, BUMP_TYPES, MemberContent, NameContent, StreamEvent, StrippedEvent,
			TopicContent,
		},
		sliding::{Hero, RoomData},
	},
};
use luge_service::sync::RoomPersist;
use ruma::{
	OwnedRoomId, OwnedUserId, UserId,
	events::{StateEventType, room::member::MembershipState},
};
use serde::de::DeserializeOwned;

use super::{
	SyncContext,
	selector::{Window, WindowRoom},
};

/// A room's standing on the connection, resolved from the stored
/// stream-state row.
enum Classification {
	/// Never sent on this connection (or the record is unusable, or the
	/// user transitioned back into the room): deliver historically.
	Never,

	/// In the previous response; deliver incrementally from the stored
	/// token.
	Live(StreamToken),

	/// Sent before, dropped from recent responses; deliver incrementally.
	Previously(StreamToken),
}

/// Build every selected room. A failing room is logged and omitted; the
/// sync continues without it.
#[tracing::instrument(level = "debug", skip_all, fields(rooms = window.len()))]
pub(crate) async fn build_rooms(
	ctx: SyncContext<'_>,
	current: &StreamToken,
	window: &Window,
) -> (BTreeMap<OwnedRoomId, RoomData>, Vec<RoomPersist>) {
	let mut rooms = BTreeMap::new();
	let mut persists = Vec::new();

	for (room_id, room) in window {
		match build_room(ctx, current, room_id, room).await {
			| Ok(Some(data)) => {
				rooms.insert(room_id.clone(), data);
				persists.push(RoomPersist {
					room_id: room_id.clone(),
					timeline_limit: room.timeline_limit as u64,
					required_state: room.required_state.clone(),
				});
			},
			| Ok(None) => trace!(%room_id, "room dropped: nothing to send"),
			| Err(e) => debug_error!(%room_id, "failed to build room, omitting: {e}"),
		}
	}

	(rooms, persists)
}

async fn build_room(
	ctx: SyncContext<'_>,
	current: &StreamToken,
	room_id: &OwnedRoomId,
	room: &WindowRoom,
) -> Result<Option<RoomData>> {
	match room.membership {
		| MembershipState::Invite | MembershipState::Knock =>
			build_stripped(ctx, current, room_id, room).await.map(Some),
		| _ => build_joined(ctx, current, room_id, room).await,
	}
}

/// The invite/knock branch: no timeline, no required state; the embedded
/// stripped preview (or, for local rooms, a minimal projection of current
/// state) is surfaced instead.
async fn build_stripped(
	ctx: SyncContext<'_>,
	current: &StreamToken,
	room_id: &OwnedRoomId,
	room: &WindowRoom,
) -> Result<RoomData> {
	let mut stripped = room
		.invite
		.as_ref()
		.and_then(|invite| invite.event.invite_room_state())
		.unwrap_or_default();

	if stripped.is_empty() {
		// local invite or knock: no embedded preview travelled with it
		stripped = local_stripped_state(ctx, room_id).await?;
	}

	if let Some(invite) = &room.invite {
		if let Some(sender) = stripped_sender(ctx, room_id, &invite.event).await {
			stripped.push(invite.event.to_stripped(sender));
		}
	}

	let (name, avatar_url, topic) = stripped_meta(&stripped);

	let counts = ctx
		.services
		.events
		.member_counts(room_id, current.pdu.max(current.invite))
		.await
		.ok();

	Ok(RoomData {
		name,
		avatar_url,
		topic,
		heroes: None,
		initial: true,
		is_dm: ctx.dm_rooms.contains(room_id).then_some(true),
		invite_state: stripped.clone(),
		stripped_state: stripped,
		timeline: None,
		required_state: None,
		prev_batch: None,
		limited: false,
		joined_count: counts.map(|(joined, _)| joined),
		invited_count: counts.map(|(_, invited)| invited),
		num_live: 0,
		bump_stamp: room.bump,
		notification_count: 0,
		highlight_count: 0,
		expanded_timeline: false,
	})
}

async fn build_joined(
	ctx: SyncContext<'_>,
	current: &StreamToken,
	room_id: &OwnedRoomId,
	room: &WindowRoom,
) -> Result<Option<RoomData>> {
	let classification = classify(ctx, room_id).await;
	let initial = ctx.since.is_none() || matches!(classification, Classification::Never);
	let historical = initial || room.expanded;

	// The incremental lower bound is the room's own stored token, not the
	// outer request cursor: a room whose last delivery lags the connection
	// would under-fetch otherwise.
	let from = match (&classification, historical) {
		| (_, true) | (Classification::Never, _) => 0,
		| (
			Classification::Live(last) | Classification::Previously(last),
			false,
		) => last.pdu,
	};

	let chunk = ctx
		.services
		.events
		.events_in_range(room_id, from, current.pdu, room.timeline_limit)
		.await?;

	if !historical && chunk.events.is_empty() {
		return Ok(None);
	}

	let since_pdu = ctx.since.map_or(0, |since| since.pdu);
	let mut num_live: u64 = 0;
	if ctx.since.is_some() {
		for event in chunk.events.iter().rev() {
			if event.position <= since_pdu {
				break;
			}

			num_live = num_live.saturating_add(1);
		}
	}

	let prev_batch = match chunk.events.first() {
		| Some(earliest) if chunk.limited => ctx
			.services
			.events
			.topology_position(room_id, &earliest.event_id)
			.await?
			.map(|topology| topology.decrement().to_string()),
		| _ => None,
	};

	let mut timeline = Vec::with_capacity(chunk.events.len());
	let mut lazy_senders: BTreeSet<String> = BTreeSet::new();
	for event in &chunk.events {
		// unresolvable senders drop the event, ignored senders the content
		let Some(sender) = resolve_sender(ctx, room_id, &event.sender).await else {
			continue;
		};

		if ctx.ignored.contains(&sender) {
			continue;
		}

		lazy_senders.insert(sender.as_str().to_owned());
		timeline.push(event.to_client(sender));
	}

	let bump_stamp = match chunk.events.iter().rev().find(|event| event.is_bump()) {
		| Some(event) => event.position,
		| None => ctx
			.services
			.events
			.bump_position(room_id, BUMP_TYPES)
			.await
			.ok()
			.flatten()
			.unwrap_or(0),
	};

	let fetch_state = matches!(classification, Classification::Never)
		|| (!timeline.is_empty() && room.required_state.wants_lazy());

	let required_state = if fetch_state && !room.required_state.is_empty() {
		Some(fetch_required_state(ctx, room_id, room, &lazy_senders).await?)
	} else {
		None
	};

	let mut name = state_content::<NameContent>(ctx, room_id, "m.room.name")
		.await
		.and_then(|content| content.name);

	let mut avatar_url = state_content::<AvatarContent>(ctx, room_id, "m.room.avatar")
		.await
		.and_then(|content| content.url);

	let topic = state_content::<TopicContent>(ctx, room_id, "m.room.topic")
		.await
		.and_then(|content| content.topic);

	let counts = ctx
		.services
		.events
		.member_counts(room_id, current.pdu.max(current.invite))
		.await
		.ok();

	let heroes = heroes(ctx, room_id).await;

	// unnamed rooms fall back to a hero-composed display name, and to the
	// first hero's avatar
	if let Some(heroes) = &heroes {
		if name.is_none() {
			name = hero_name(heroes);
		}

		if avatar_url.is_none() {
			avatar_url = heroes.first().and_then(|hero| hero.avatar_url.clone());
		}
	}

	Ok(Some(RoomData {
		name,
		avatar_url,
		topic,
		heroes,
		initial,
		is_dm: ctx.dm_rooms.contains(room_id).then_some(true),
		invite_state: Vec::new(),
		stripped_state: Vec::new(),
		timeline: Some(timeline),
		required_state,
		prev_batch,
		limited: chunk.limited,
		joined_count: counts.map(|(joined, _)| joined),
		invited_count: counts.map(|(_, invited)| invited),
		num_live,
		bump_stamp,
		notification_count: 0,
		highlight_count: 0,
		expanded_timeline: room.expanded,
	}))
}

/// Resolve the room's standing on this connection. An unparseable stored
/// token is recovered locally as never-sent; a membership transition back
/// into the room forces never-sent so the client sees a fresh `initial`
/// payload with a historical timeline.
async fn classify(ctx: SyncContext<'_>, room_id: &OwnedRoomId) -> Classification {
	use MembershipState::Join;

	let Some(state) = ctx.conn.room_state(room_id) else {
		return Classification::Never;
	};

	let Ok(last) = state.last_token.parse::<StreamToken>() else {
		return Classification::Never;
	};

	let current_membership = ctx
		.services
		.events
		.membership_at(room_id, ctx.sender_user, None)
		.await
		.ok()
		.flatten();

	if let Some((Join, event_position)) = current_membership {
		if event_position > last.pdu {
			// the join event landed after the last delivery: either the
			// kicked-rejoin / left-rejoin / invite-join family, or a mere
			// profile edit on a continuous join
			let at_last = membership_only(ctx, room_id, Some(last.pdu)).await;
			let before_join =
				membership_only(ctx, room_id, Some(event_position.saturating_sub(1))).await;

			if at_last != Some(Join) || before_join != Some(Join) {
				return Classification::Never;
			}
		}
	}

	match state.status {
		| luge_service::sync::RoomStatus::Live => Classification::Live(last),
		| luge_service::sync::RoomStatus::Previously => Classification::Previously(last),
	}
}

async fn membership_only(
	ctx: SyncContext<'_>,
	room_id: &OwnedRoomId,
	at: Option<u64>,
) -> Option<MembershipState> {
	ctx.services
		.events
		.membership_at(room_id, ctx.sender_user, at)
		.await
		.ok()
		.flatten()
		.map(|(membership, _)| membership)
}

async fn fetch_required_state(
	ctx: SyncContext<'_>,
	room_id: &OwnedRoomId,
	room: &WindowRoom,
	lazy_senders: &BTreeSet<String>,
) -> Result<Vec<luge_core::ClientEvent>> {
	let full = ctx.services.events.full_state(room_id).await?;

	let mut out = Vec::new();
	for event in full {
		let event_type = event.kind.to_string();
		let state_key = event.state_key.clone().unwrap_or_default();
		if !room.required_state.matches(
			&event_type,
			state_key.as_str(),
			ctx.sender_user,
			lazy_senders,
		) {
			continue;
		}

		let Some(sender) = resolve_sender(ctx, room_id, &event.sender).await else {
			continue;
		};

		out.push(event.to_client(sender));
	}

	Ok(out)
}

async fn local_stripped_state(
	ctx: SyncContext<'_>,
	room_id: &OwnedRoomId,
) -> Result<Vec<StrippedEvent>> {
	const PREVIEW_TYPES: &[&str] = &[
		"m.room.create",
		"m.room.join_rules",
		"m.room.name",
		"m.room.avatar",
		"m.room.topic",
		"m.room.encryption",
	];

	let mut out = Vec::new();
	for event_type in PREVIEW_TYPES {
		let Some(event) = ctx
			.services
			.events
			.state_event(room_id, event_type, "")
			.await?
		else {
			continue;
		};

		if let Some(sender) = stripped_sender(ctx, room_id, &event).await {
			out.push(event.to_stripped(sender));
		}
	}

	if let Some(member) = ctx
		.services
		.events
		.state_event(room_id, "m.room.member", ctx.sender_user.as_str())
		.await?
	{
		if let Some(sender) = stripped_sender(ctx, room_id, &member).await {
			out.push(member.to_stripped(sender));
		}
	}

	Ok(out)
}

fn stripped_meta(
	stripped: &[StrippedEvent],
) -> (Option<String>, Option<ruma::OwnedMxcUri>, Option<String>) {
	let mut name = None;
	let mut avatar_url = None;
	let mut topic = None;

	for event in stripped {
		match event.kind {
			| StateEventType::RoomName => {
				name = serde_json::from_str::<NameContent>(event.content.get())
					.ok()
					.and_then(|content| content.name);
			},
			| StateEventType::RoomAvatar => {
				avatar_url = serde_json::from_str::<AvatarContent>(event.content.get())
					.ok()
					.and_then(|content| content.url);
			},
			| StateEventType::RoomTopic => {
				topic = serde_json::from_str::<TopicContent>(event.content.get())
					.ok()
					.and_then(|content| content.topic);
			},
			| _ => {},
		}
	}

	(name, avatar_url, topic)
}

async fn heroes(ctx: SyncContext<'_>, room_id: &OwnedRoomId) -> Option<Vec<Hero>> {
	let hero_ids = ctx
		.services
		.events
		.heroes(room_id)
		.await
		.unwrap_or_default();

	let mut heroes = Vec::with_capacity(hero_ids.len());
	for user_id in hero_ids {
		let content = ctx
			.services
			.events
			.state_event(room_id, "m.room.member", user_id.as_str())
			.await
			.ok()
			.flatten()
			.and_then(|event| event.get_content::<MemberContent>().ok());

		// an absent member event still yields the bare hero id
		heroes.push(Hero {
			user_id,
			displayname: content
				.as_ref()
				.and_then(|content| content.displayname.clone()),
			avatar_url: content.and_then(|content| content.avatar_url),
		});
	}

	(!heroes.is_empty()).then_some(heroes)
}

fn hero_name(heroes: &[Hero]) -> Option<String> {
	let mut names = heroes.iter().map(|hero| {
		hero.displayname
			.clone()
			.unwrap_or_else(|| hero.user_id.to_string())
	});

	let first = names.next()?;
	let rest: Vec<String> = names.collect();

	if rest.is_empty() {
		return Some(first);
	}

	let (last, firsts) = rest.split_last().expect("rest is non-empty");
	let mut name = first;
	for part in firsts {
		name.push_str(", ");
		name.push_str(part);
	}

	name.push_str(" and ");
	name.push_str(last);
	Some(name)
}

async fn state_content<T: DeserializeOwned>(
	ctx: SyncContext<'_>,
	room_id: &OwnedRoomId,
	event_type: &str,
) -> Option<T> {
	ctx.services
		.events
		.state_event(room_id, event_type, "")
		.await
		.ok()
		.flatten()?
		.get_content()
		.ok()
}

/// Strict sender resolution via the room-server; failure drops the event.
async fn resolve_sender(
	ctx: SyncContext<'_>,
	room_id: &OwnedRoomId,
	sender: &str,
) -> Option<OwnedUserId> {
	ctx.services
		.rooms
		.resolve_sender(room_id, sender)
		.await
		.ok()
		.flatten()
}

/// Sender resolution for stripped previews: federated invite events carry
/// plain user ids, so an unresolvable sender falls back to parsing.
async fn stripped_sender(
	ctx: SyncContext<'_>,
	room_id: &OwnedRoomId,
	event: &StreamEvent,
) -> Option<OwnedUserId> {
	match resolve_sender(ctx, room_id, &event.sender).await {
		| Some(sender) => Some(sender),
		| None => UserId::parse(event.sender.as_str()).ok(),
	}
}
