//! Extension multiplexing: five substreams sharing the response envelope,
//! each with its own position tracking and filtering rules. To-device and
//! end-to-end-key data are independent of the room selection and run
//! before it; account data, receipts and typing scope themselves to the
//! lists and subscriptions of the response and run after.
//!
//! A failing extension degrades to its empty, schema-valid shape; the rest
//! of the response is unaffected.

use std::collections::BTreeSet;

use luge_core::{
	Result, StreamToken, debug_error,
	matrix::sliding::{AccountData, DeviceLists, E2ee, Receipts, ToDevice, Typing},
};
use luge_service::sync::ReceiptPersist;
use ruma::OwnedRoomId;
use serde_json::value::{RawValue as RawJsonValue, to_raw_value};

use super::{SyncContext, selector::Selection};

/// The one-time-key algorithm clients expect to always see a count for.
const OTK_ALGORITHM: &str = "signed_curve25519";

pub(crate) async fn pre_process(
	ctx: SyncContext<'_>,
	current: &StreamToken,
) -> (Option<ToDevice>, Option<E2ee>) {
	let to_device = if enabled(ctx.request.extensions.to_device.enabled) {
		Some(collect_to_device(ctx, current).await.unwrap_or_else(|e| {
			debug_error!("to-device extension failed: {e}");
			ToDevice::default()
		}))
	} else {
		None
	};

	let e2ee = if enabled(ctx.request.extensions.e2ee.enabled) {
		Some(collect_e2ee(ctx, current).await.unwrap_or_else(|e| {
			debug_error!("e2ee extension failed: {e}");
			E2ee::default()
		}))
	} else {
		None
	};

	(to_device, e2ee)
}

pub(crate) async fn post_process(
	ctx: SyncContext<'_>,
	current: &StreamToken,
	selection: &Selection,
) -> (AccountData, Receipts, Typing, Vec<ReceiptPersist>) {
	let account_data = if enabled(ctx.request.extensions.account_data.enabled) {
		collect_account_data(ctx, current, selection)
			.await
			.unwrap_or_else(|e| {
				debug_error!("account-data extension failed: {e}");
				AccountData::default()
			})
	} else {
		AccountData::default()
	};

	let (receipts, delivered) = if enabled(ctx.request.extensions.receipts.enabled) {
		collect_receipts(ctx, current, selection)
			.await
			.unwrap_or_else(|e| {
				debug_error!("receipts extension failed: {e}");
				(Receipts::default(), Vec::new())
			})
	} else {
		(Receipts::default(), Vec::new())
	};

	let typing = if enabled(ctx.request.extensions.typing.enabled) {
		collect_typing(ctx, selection).await.unwrap_or_else(|e| {
			debug_error!("typing extension failed: {e}");
			Typing::default()
		})
	} else {
		Typing::default()
	};

	(account_data, receipts, typing, delivered)
}

#[inline]
fn enabled(flag: Option<bool>) -> bool { flag.unwrap_or(false) }

/// Resolve an extension's effective room scope: rooms from matched list
/// windows united with rooms from matched subscriptions. An absent
/// parameter or a `"*"` entry is a wildcard; an empty list matches
/// nothing.
fn extension_rooms(
	selection: &Selection,
	lists: Option<&Vec<String>>,
	rooms: Option<&Vec<String>>,
) -> BTreeSet<OwnedRoomId> {
	let mut out = BTreeSet::new();

	match lists {
		| None => out.extend(selection.list_windows.values().flatten().cloned()),
		| Some(named) if named.iter().any(|name| name == "*") =>
			out.extend(selection.list_windows.values().flatten().cloned()),
		| Some(named) =>
			for name in named {
				if let Some(windowed) = selection.list_windows.get(name) {
					out.extend(windowed.iter().cloned());
				}
			},
	}

	match rooms {
		| None => out.extend(selection.subscribed.iter().cloned()),
		| Some(named) if named.iter().any(|room| room == "*") =>
			out.extend(selection.subscribed.iter().cloned()),
		| Some(named) =>
			for room in named {
				let Ok(room_id) = OwnedRoomId::try_from(room.as_str()) else {
					continue;
				};

				if selection.subscribed.contains(&room_id) {
					out.insert(room_id);
				}
			},
	}

	out
}

/// To-device messages ride their own cursor, carried in the extension
/// request rather than the sync token.
#[tracing::instrument(level = "trace", skip_all)]
async fn collect_to_device(ctx: SyncContext<'_>, current: &StreamToken) -> Result<ToDevice> {
	let config = &ctx.request.extensions.to_device;
	let since = config
		.since
		.as_deref()
		.and_then(|since| since.parse().ok())
		.unwrap_or(0);

	let limit = config
		.limit
		.unwrap_or(ctx.services.server.config.to_device_limit);

	// presenting the cursor acknowledges everything at or below it
	ctx.services
		.users
		.ack_to_device(ctx.sender_user, ctx.sender_device, since)
		.await?;

	let (events, last) = ctx
		.services
		.users
		.to_device_events(ctx.sender_user, ctx.sender_device, since, current.to_device, limit)
		.await?;

	Ok(ToDevice { next_batch: last.to_string(), events })
}

/// One-time-key counts and fallback key types are always reported; the
/// device-list delta only on incremental syncs whose device-list position
/// moved.
#[tracing::instrument(level = "trace", skip_all)]
async fn collect_e2ee(ctx: SyncContext<'_>, current: &StreamToken) -> Result<E2ee> {
	let mut device_one_time_keys_count = ctx
		.services
		.users
		.one_time_key_counts(ctx.sender_user, ctx.sender_device)
		.await?;

	// clients break on an absent count for this algorithm
	device_one_time_keys_count
		.entry(OTK_ALGORITHM.to_owned())
		.or_insert(0);

	let fallback = ctx
		.services
		.users
		.unused_fallback_key_types(ctx.sender_user, ctx.sender_device)
		.await
		.unwrap_or_default();

	let device_lists = match ctx.since {
		| None => None,
		| Some(since) if since.device_list == current.device_list => None,
		| Some(since) => {
			let changes = ctx
				.services
				.users
				.device_list_changes(ctx.sender_user, since.device_list, current.device_list)
				.await?;

			Some(DeviceLists {
				changed: changes.changed.into_iter().collect(),
				left: changes.left.into_iter().collect(),
			})
		},
	};

	Ok(E2ee {
		device_one_time_keys_count,
		device_unused_fallback_key_types: fallback.clone(),
		unstable_device_unused_fallback_key_types: fallback,
		device_lists,
	})
}

#[tracing::instrument(level = "trace", skip_all)]
async fn collect_account_data(
	ctx: SyncContext<'_>,
	current: &StreamToken,
	selection: &Selection,
) -> Result<AccountData> {
	let config = &ctx.request.extensions.account_data;
	let scope = extension_rooms(selection, config.lists.as_ref(), config.rooms.as_ref());
	let since = ctx.since.map_or(0, |since| since.account_data);

	let changes = ctx
		.services
		.events
		.account_data_changes(ctx.sender_user, since, current.account_data)
		.await?;

	let mut out = AccountData::default();
	for change in changes {
		let Some(content) = ctx
			.services
			.users
			.account_data(ctx.sender_user, change.room_id.as_deref(), &change.kind)
			.await?
		else {
			continue;
		};

		let event = account_data_event(&change.kind, &content)?;
		match change.room_id {
			| None => out.global.push(event),
			| Some(room_id) if scope.contains(&room_id) =>
				out.rooms.entry(room_id).or_default().push(event),
			| Some(_) => {},
		}
	}

	Ok(out)
}

/// Receipts deduplicate by event id per `(connection, room, type, user)`:
/// only receipts pointing at a different event than last delivered go out,
/// and the persister records the new event ids.
#[tracing::instrument(level = "trace", skip_all)]
async fn collect_receipts(
	ctx: SyncContext<'_>,
	current: &StreamToken,
	selection: &Selection,
) -> Result<(Receipts, Vec<ReceiptPersist>)> {
	let config = &ctx.request.extensions.receipts;
	let scope = extension_rooms(selection, config.lists.as_ref(), config.rooms.as_ref());

	let mut receipts = Receipts::default();
	let mut delivered_out = Vec::new();

	for room_id in scope {
		let entries = ctx
			.services
			.events
			.latest_receipts(&room_id, current.receipt)
			.await?;

		let delivered = ctx
			.services
			.sync
			.delivered_receipts(ctx.conn.key, &room_id)?;

		let fresh: Vec<_> = entries
			.iter()
			.filter(|entry| {
				// private receipts belong to their reader alone
				entry.receipt_type != "m.read.private" || entry.user_id == ctx.sender_user
			})
			.filter(|entry| {
				let key = (entry.receipt_type.clone(), entry.user_id.clone());
				delivered.get(&key) != Some(&entry.event_id)
			})
			.collect();

		if fresh.is_empty() {
			continue;
		}

		let mut content = serde_json::Value::Object(Default::default());
		for entry in &fresh {
			content[entry.event_id.as_str()][&entry.receipt_type][entry.user_id.as_str()] =
				serde_json::json!({ "ts": entry.ts });
		}

		let event = serde_json::json!({ "type": "m.receipt", "content": content });
		receipts
			.rooms
			.insert(room_id.clone(), to_raw_value(&event)?);

		for entry in fresh {
			delivered_out.push(ReceiptPersist {
				room_id: room_id.clone(),
				receipt_type: entry.receipt_type.clone(),
				user_id: entry.user_id.clone(),
				event_id: entry.event_id.clone(),
				ts: entry.ts,
			});
		}
	}

	Ok((receipts, delivered_out))
}

#[tracing::instrument(level = "trace", skip_all)]
async fn collect_typing(ctx: SyncContext<'_>, selection: &Selection) -> Result<Typing> {
	let config = &ctx.request.extensions.typing;
	let scope = extension_rooms(selection, config.lists.as_ref(), config.rooms.as_ref());
	let since = ctx.since.map_or(0, |since| since.typing);

	let mut typing = Typing::default();
	for room_id in scope {
		let (user_ids, position) = match ctx.services.typing.typing_users(&room_id).await {
			| Ok(state) => state,
			| Err(e) => {
				debug_error!(%room_id, "failed to read typing state: {e}");
				continue;
			},
		};

		if position <= since {
			continue;
		}

		// initial syncs only report rooms someone is actually typing in
		if ctx.since.is_none() && user_ids.is_empty() {
			continue;
		}

		let event = serde_json::json!({ "type": "m.typing", "content": { "user_ids": user_ids } });
		typing.rooms.insert(room_id, to_raw_value(&event)?);
	}

	Ok(typing)
}

fn account_data_event(kind: &str, content: &RawJsonValue) -> Result<Box<RawJsonValue>> {
	let event = format!(
		r#"{{"type":{},"content":{}}}"#,
		serde_json::to_string(kind)?,
		content.get(),
	);

	RawJsonValue::from_string(event).map_err(Into::into)
}
