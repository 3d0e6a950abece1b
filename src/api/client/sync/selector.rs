//! Room selection: membership gathering, filtering, bump-stamp ordering,
//! windowing, list operations, and the incremental change filter.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use luge_core::{RequiredState, Result, StreamToken, debug_warn, trace};
use luge_core::matrix::sliding::{Filters, OpKind, ResponseList, SyncOp};
use luge_service::{events::InviteEntry, metadata::RoomMeta};
use ruma::{OwnedRoomId, OwnedUserId, events::room::member::MembershipState};

use super::SyncContext;

/// Timeline events per room when neither list nor subscription names a
/// limit.
const DEFAULT_TIMELINE_LIMIT: usize = 10;

/// One room selected for delivery, with its effective per-room config
/// merged across every list window and subscription that covers it.
#[derive(Clone, Debug)]
pub(crate) struct WindowRoom {
	pub(crate) membership: MembershipState,

	pub(crate) invite: Option<InviteEntry>,

	pub(crate) timeline_limit: usize,

	pub(crate) required_state: RequiredState,

	/// The timeline limit grew past the stored room-config; forces a
	/// historical refetch.
	pub(crate) expanded: bool,

	/// Decoration the room was sorted by.
	pub(crate) bump: u64,
}

pub(crate) type Window = BTreeMap<OwnedRoomId, WindowRoom>;

/// Everything the selector hands the rest of the pipeline.
pub struct Selection {
	pub(crate) window: Window,

	pub(crate) lists: BTreeMap<String, ResponseList>,

	/// Windowed room ids of every list, changed or not; extension scoping
	/// draws from these.
	pub(crate) list_windows: BTreeMap<String, Vec<OwnedRoomId>>,

	pub(crate) subscribed: BTreeSet<OwnedRoomId>,

	/// Lists whose windowed ordering differs from the persisted one.
	pub(crate) orderings: Vec<(String, Vec<OwnedRoomId>)>,
}

struct Candidate {
	room_id: OwnedRoomId,
	membership: MembershipState,
	invite: Option<InviteEntry>,
	meta: RoomMeta,
	bump: u64,
	is_dm: bool,
	tags: Vec<String>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub(crate) async fn select(ctx: SyncContext<'_>, current: &StreamToken) -> Result<Selection> {
	let candidates = gather(ctx, current).await?;

	let mut sorted: Vec<&Candidate> = candidates.values().collect();
	sorted.sort_by(|a, b| {
		b.bump
			.cmp(&a.bump)
			.then_with(|| a.room_id.cmp(&b.room_id))
	});

	let mut window = Window::new();
	let mut lists = BTreeMap::new();
	let mut list_windows = BTreeMap::new();
	let mut orderings = Vec::new();

	for (list_id, list) in &ctx.request.lists {
		let filtered: Vec<&Candidate> = sorted
			.iter()
			.copied()
			.filter(|candidate| matches_filters(list.filters.as_ref(), candidate))
			.collect();

		let count = filtered.len();
		let (start, end) = clamp_window(list.window(), count);
		let windowed: Vec<OwnedRoomId> = filtered
			.get(start..=end.min(count.saturating_sub(1)))
			.unwrap_or_default()
			.iter()
			.map(|candidate| candidate.room_id.clone())
			.collect();

		let stored = ctx
			.services
			.sync
			.list_ordering(ctx.conn.key, list_id)?;

		let changed = stored.as_ref() != Some(&windowed);
		let mut ops = Vec::new();
		if changed {
			if !windowed.is_empty() {
				ops.push(SyncOp {
					op: OpKind::Sync,
					range: Some((start as u64, end as u64)),
					index: None,
					room_ids: windowed.clone(),
				});
			}

			orderings.push((list_id.clone(), windowed.clone()));
		}

		for candidate in filtered
			.iter()
			.filter(|candidate| windowed.contains(&candidate.room_id))
		{
			let room = window
				.entry(candidate.room_id.clone())
				.or_insert_with(|| empty_window_room(candidate));

			let limit = list
				.timeline_limit
				.unwrap_or(DEFAULT_TIMELINE_LIMIT)
				.min(ctx.services.server.config.timeline_limit_max);

			room.timeline_limit = room.timeline_limit.max(limit);
			if let Some(required_state) = &list.required_state {
				room.required_state.merge(required_state);
			}
		}

		list_windows.insert(list_id.clone(), windowed);
		lists.insert(list_id.clone(), ResponseList { count: count as u64, ops });
	}

	let subscribed = subscriptions(ctx, &candidates, &mut window).await?;

	detect_expansion(ctx, &subscribed, &mut window);

	if let Some(since) = &ctx.since {
		narrow_to_changes(ctx, current, since, &mut window).await?;
	}

	trace!(
		window = window.len(),
		lists = lists.len(),
		subscribed = subscribed.len(),
		"selection complete",
	);

	Ok(Selection {
		window,
		lists,
		list_windows,
		subscribed,
		orderings,
	})
}

/// Gather and decorate every room the user could see: joins, invites from
/// the invite table, bans, kicks and knocks. Self-leaves are excluded from
/// the default sets.
async fn gather(
	ctx: SyncContext<'_>,
	current: &StreamToken,
) -> Result<BTreeMap<OwnedRoomId, Candidate>> {
	use MembershipState::{Ban, Invite, Join, Knock, Leave};

	let memberships = ctx
		.services
		.events
		.memberships(ctx.sender_user)
		.await?;

	struct Gathered {
		room_id: OwnedRoomId,
		membership: MembershipState,
		sender: OwnedUserId,
		invite: Option<InviteEntry>,
	}

	let mut rooms: BTreeMap<OwnedRoomId, Gathered> = BTreeMap::new();
	for entry in memberships {
		let keep = match &entry.membership {
			| Join | Ban | Knock => true,
			// a leave authored by someone else is a kick and stays visible
			| Leave => entry.is_kick(ctx.sender_user),
			// invite membership is authoritative only through the invite
			// table, handled below
			| Invite => false,
			| _ => false,
		};

		if !keep {
			continue;
		}

		rooms.insert(entry.room_id.clone(), Gathered {
			room_id: entry.room_id,
			membership: entry.membership,
			sender: entry.sender,
			invite: None,
		});
	}

	let invites = ctx
		.services
		.events
		.invites(ctx.sender_user, current.invite)
		.await?;

	for invite in invites {
		if invite.retired {
			continue;
		}

		// the requester ignores this inviter
		if ctx
			.ignored
			.iter()
			.any(|ignored| ignored.as_str() == invite.event.sender)
		{
			continue;
		}

		// dedup preference: join wins over invite
		if rooms
			.get(&invite.room_id)
			.is_some_and(|existing| existing.membership == Join)
		{
			continue;
		}

		let sender = OwnedUserId::try_from(invite.event.sender.clone())
			.unwrap_or_else(|_| ctx.sender_user.to_owned());

		rooms.insert(invite.room_id.clone(), Gathered {
			room_id: invite.room_id.clone(),
			membership: Invite,
			sender,
			invite: Some(invite),
		});
	}

	let want_tags = ctx.request.lists.values().any(|list| {
		list.filters
			.as_ref()
			.is_some_and(|filters| !filters.tags.is_empty() || !filters.not_tags.is_empty())
	});

	let decorated = join_all(rooms.into_values().map(|gathered| async move {
		let meta =
			room_meta(ctx, &gathered.room_id, &gathered.membership, &gathered.sender).await;
		let bump = gathered
			.invite
			.as_ref()
			.map_or(meta.bump_stamp, |invite| meta.bump_stamp.max(invite.position));

		let tags = if want_tags {
			ctx.services
				.users
				.room_tags(ctx.sender_user, &gathered.room_id)
				.await
				.unwrap_or_default()
		} else {
			Vec::new()
		};

		Candidate {
			is_dm: ctx.dm_rooms.contains(&gathered.room_id),
			room_id: gathered.room_id,
			membership: gathered.membership,
			invite: gathered.invite,
			meta,
			bump,
			tags,
		}
	}))
	.await;

	Ok(decorated
		.into_iter()
		.map(|candidate| (candidate.room_id.clone(), candidate))
		.collect())
}

async fn room_meta(
	ctx: SyncContext<'_>,
	room_id: &OwnedRoomId,
	membership: &MembershipState,
	sender: &OwnedUserId,
) -> RoomMeta {
	let result = if *membership == MembershipState::Join {
		ctx.services.metadata.room_meta(room_id).await
	} else {
		ctx.services
			.metadata
			.snapshot_meta(room_id, ctx.sender_user, membership, sender)
			.await
	};

	result.unwrap_or_else(|e| {
		debug_warn!(%room_id, "room decoration unavailable: {e}");
		RoomMeta::default()
	})
}

/// Merge explicit subscriptions into the window. Kicked and banned rooms
/// are fair game; self-left rooms never appear (excluded at gathering);
/// rooms still resolving partial state are skipped when the subscription
/// demands full state.
async fn subscriptions(
	ctx: SyncContext<'_>,
	candidates: &BTreeMap<OwnedRoomId, Candidate>,
	window: &mut Window,
) -> Result<BTreeSet<OwnedRoomId>> {
	let mut subscribed = BTreeSet::new();

	for (room_id, subscription) in &ctx.request.room_subscriptions {
		let Some(candidate) = candidates.get(room_id) else {
			continue;
		};

		let required_state = subscription.required_state.clone().unwrap_or_default();
		if required_state.demands_full_state()
			&& ctx
				.services
				.rooms
				.is_partial_state(room_id)
				.await
				.unwrap_or(false)
		{
			trace!(%room_id, "subscription skipped: partial state");
			continue;
		}

		subscribed.insert(room_id.clone());

		let room = window
			.entry(room_id.clone())
			.or_insert_with(|| empty_window_room(candidate));

		let limit = subscription
			.timeline_limit
			.unwrap_or(DEFAULT_TIMELINE_LIMIT)
			.min(ctx.services.server.config.timeline_limit_max);

		room.timeline_limit = room.timeline_limit.max(limit);
		room.required_state.merge(&required_state);
	}

	Ok(subscribed)
}

/// Timeline expansion: a room whose effective limit exceeds the stored
/// room-config, or a fresh subscription to a room previously delivered
/// through a list only.
fn detect_expansion(
	ctx: SyncContext<'_>,
	subscribed: &BTreeSet<OwnedRoomId>,
	window: &mut Window,
) {
	for (room_id, room) in window.iter_mut() {
		room.expanded = match ctx.conn.configs.get(room_id) {
			| Some(config) => (room.timeline_limit as u64) > config.timeline_limit,
			| None =>
				subscribed.contains(room_id) && ctx.conn.room_state(room_id).is_some(),
		};
	}
}

/// The incremental change filter: keep a room only when it has new events,
/// invite changes, was never sent on this connection, or had its timeline
/// expanded. Everything else is copied forward silently by the persister.
async fn narrow_to_changes(
	ctx: SyncContext<'_>,
	current: &StreamToken,
	since: &StreamToken,
	window: &mut Window,
) -> Result {
	let rooms: Vec<OwnedRoomId> = window.keys().cloned().collect();

	let with_events = ctx
		.services
		.events
		.rooms_with_events(&rooms, since.pdu, current.pdu)
		.await?;

	let with_invites = ctx
		.services
		.events
		.rooms_with_invite_changes(ctx.sender_user, since.invite, current.invite)
		.await?;

	window.retain(|room_id, room| {
		room.expanded
			|| with_events.contains(room_id)
			|| with_invites.contains(room_id)
			|| ctx.conn.room_state(room_id).is_none()
	});

	Ok(())
}

fn empty_window_room(candidate: &Candidate) -> WindowRoom {
	WindowRoom {
		membership: candidate.membership.clone(),
		invite: candidate.invite.clone(),
		timeline_limit: 0,
		required_state: RequiredState::default(),
		expanded: false,
		bump: candidate.bump,
	}
}

/// Clamp a requested `[start, end]` window against the filtered length:
/// negative start means zero, an end past the tail means the tail, a start
/// past the tail means empty. No window means everything.
fn clamp_window(range: Option<(i64, i64)>, count: usize) -> (usize, usize) {
	let Some((start, end)) = range else {
		return (0, count.saturating_sub(1));
	};

	let start = usize::try_from(start.max(0)).unwrap_or(0);
	let end = usize::try_from(end.max(0)).unwrap_or(0);

	(start, end.min(count.saturating_sub(1)))
}

fn matches_filters(filters: Option<&Filters>, candidate: &Candidate) -> bool {
	let Some(filters) = filters else {
		return true;
	};

	if let Some(is_dm) = filters.is_dm {
		if candidate.is_dm != is_dm {
			return false;
		}
	}

	if let Some(is_encrypted) = filters.is_encrypted {
		if candidate.meta.is_encrypted != is_encrypted {
			return false;
		}
	}

	if let Some(is_invite) = filters.is_invite {
		if (candidate.membership == MembershipState::Invite) != is_invite {
			return false;
		}
	}

	if let Some(needle) = &filters.room_name_like {
		let Some(name) = &candidate.meta.name else {
			return false;
		};

		if !name.to_lowercase().contains(&needle.to_lowercase()) {
			return false;
		}
	}

	if !filters.room_types.is_empty() && !filters.room_types.contains(&candidate.meta.room_type) {
		return false;
	}

	if !filters.not_room_types.is_empty()
		&& filters
			.not_room_types
			.contains(&candidate.meta.room_type)
	{
		return false;
	}

	if !filters.tags.is_empty()
		&& !filters
			.tags
			.iter()
			.any(|tag| candidate.tags.contains(tag))
	{
		return false;
	}

	if !filters.not_tags.is_empty()
		&& filters
			.not_tags
			.iter()
			.any(|tag| candidate.tags.contains(tag))
	{
		return false;
	}

	true
}
