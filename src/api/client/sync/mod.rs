//! The sliding-sync endpoint pipeline.
//!
//! A request flows: token parse → sticky-parameter merge → connection open
//! (ownership validation, position cascade) → the long-poll loop. Each loop
//! iteration builds a full response at the notifier's current position; a
//! response with no meaningful updates re-arms the wait until the timeout
//! lapses, which returns the empty response at the current position.

mod extensions;
mod room;
mod selector;

use std::{collections::BTreeSet, time::Duration};

use luge_core::{
	Err, Result, StreamToken, SyncToken, debug, error, trace,
	matrix::{
		event::DirectContent,
		sliding::{Extensions, Request, Response},
	},
};
use luge_service::{
	Services,
	sync::{Connection, PersistUpdate, into_connection_key},
};
use ruma::{DeviceId, OwnedRoomId, OwnedUserId, UserId};
use tokio::time::{Instant, timeout_at};

pub use self::selector::Selection;

/// Shared read-only context of one request.
#[derive(Clone, Copy)]
pub(crate) struct SyncContext<'a> {
	pub(crate) services: &'a Services,
	pub(crate) sender_user: &'a UserId,
	pub(crate) sender_device: &'a DeviceId,
	pub(crate) request: &'a Request,
	pub(crate) conn: &'a Connection,

	/// Stream half of the presented token; advances when a no-update build
	/// loops on the long poll.
	pub(crate) since: Option<StreamToken>,

	/// Rooms named by the requester's global `m.direct` account data.
	pub(crate) dm_rooms: &'a BTreeSet<OwnedRoomId>,

	pub(crate) ignored: &'a BTreeSet<OwnedUserId>,
}

/// `POST /_matrix/client/unstable/org.matrix.msc3575/sync`
///
/// Answer a windowed, delta-compressed synchronization request, long-polling
/// until something worth sending arrives or the timeout lapses.
#[tracing::instrument(
	name = "sync",
	level = "debug",
	skip_all,
	fields(
		user_id = %sender_user,
		device_id = %sender_device,
	)
)]
pub async fn sync_events(
	services: &Services,
	sender_user: &UserId,
	sender_device: &DeviceId,
	mut request: Request,
) -> Result<Response> {
	let conn_id = request
		.conn_id
		.clone()
		.unwrap_or_else(|| "default".to_owned());

	let token: Option<SyncToken> = request
		.pos
		.as_deref()
		.filter(|pos| !pos.is_empty())
		.map(str::parse)
		.transpose()?;

	let cache_key =
		into_connection_key(sender_user.to_owned(), sender_device.to_owned(), conn_id.clone());

	if token.is_none() {
		// restart: sticky parameters start over with this request
		services.sync.forget_connection(&cache_key);
	}

	services
		.sync
		.update_request_with_cache(&cache_key, &mut request);

	for (name, list) in &request.lists {
		if list
			.filters
			.as_ref()
			.is_some_and(|filters| !filters.spaces.is_empty())
		{
			return Err!(BadRequest(
				"List {name:?} requests spaces filtering, which is not supported."
			));
		}
	}

	let conn = services.sync.open_connection(
		sender_user,
		sender_device,
		&conn_id,
		token.map(|token| token.position),
	)?;

	let mut since = token.map(|token| token.streams);

	let timeout = request
		.timeout
		.unwrap_or(services.server.config.client_sync_timeout_default)
		.clamp(
			services.server.config.client_sync_timeout_min,
			services.server.config.client_sync_timeout_max,
		);

	let stop_at = Instant::now()
		.checked_add(Duration::from_millis(timeout))
		.expect("configuration limits the maximum timeout");

	let dm_rooms = dm_rooms(services, sender_user).await;
	let ignored = services
		.users
		.ignored_users(sender_user)
		.await
		.unwrap_or_default();

	loop {
		let current = services.notify.current();
		let ctx = SyncContext {
			services,
			sender_user,
			sender_device,
			request: &request,
			conn: &conn,
			since,
			dm_rooms: &dm_rooms,
			ignored: &ignored,
		};

		let (response, update) = build(ctx, &current).await?;

		if since.is_none() || response.has_updates() || Instant::now() >= stop_at {
			return finalize(services, &conn, token, response, update);
		}

		trace!(?current, "no updates; waiting");
		let wait = services.notify.wait(sender_user, current);
		let woke = tokio::select! {
			() = services.server.until_shutdown() => false,
			result = timeout_at(stop_at, wait) => result.is_ok(),
		};

		if !woke {
			// timeout or shutdown: the empty response at the current
			// position goes out as-is
			return finalize(services, &conn, token, response, update);
		}

		since = Some(current);
	}
}

/// One full response at the `current` positions.
async fn build(ctx: SyncContext<'_>, current: &StreamToken) -> Result<(Response, PersistUpdate)> {
	let (to_device, e2ee) = extensions::pre_process(ctx, current).await;

	let selection = selector::select(ctx, current).await?;

	let (rooms, room_persists) = room::build_rooms(ctx, current, &selection.window).await;

	let (account_data, receipts, typing, delivered) =
		extensions::post_process(ctx, current, &selection).await;

	let response = Response {
		pos: String::new(),
		lists: selection.lists,
		rooms,
		extensions: Extensions {
			to_device,
			e2ee,
			account_data,
			receipts,
			typing,
		},
	};

	let update = PersistUpdate {
		streams: *current,
		rooms: room_persists,
		lists: selection.orderings,
		receipts: delivered,
	};

	Ok((response, update))
}

/// Commit the response's state and stamp the position token. Post-commit
/// failures on an incremental sync are non-fatal: the presented token is
/// handed back so the client repeats from unchanged state.
fn finalize(
	services: &Services,
	conn: &Connection,
	presented: Option<SyncToken>,
	mut response: Response,
	update: PersistUpdate,
) -> Result<Response> {
	match services.sync.persist(conn, &update) {
		| Ok(position) => {
			response.pos = SyncToken { position, streams: update.streams }.to_string();
			debug!(pos = %response.pos, rooms = response.rooms.len(), "sync response ready");
			Ok(response)
		},
		| Err(e) => match presented {
			| Some(presented) => {
				error!("failed to persist sync response state: {e}");
				response.pos = presented.to_string();
				Ok(response)
			},
			| None => Err(e),
		},
	}
}

async fn dm_rooms(services: &Services, sender_user: &UserId) -> BTreeSet<OwnedRoomId> {
	let Ok(Some(content)) = services
		.users
		.account_data(sender_user, None, "m.direct")
		.await
	else {
		return BTreeSet::new();
	};

	serde_json::from_str::<DirectContent>(content.get())
		.map(|direct| direct.into_values().flatten().collect())
		.unwrap_or_default()
}
