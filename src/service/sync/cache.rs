//! Sticky request parameters. Clients send sparse incremental requests;
//! fields they omit keep the value last sent on the connection.

use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex},
};

use luge_core::matrix::sliding::{ExtensionsConfig, ListConfig, Request, RoomSubscription};
use ruma::{OwnedDeviceId, OwnedRoomId, OwnedUserId};

use super::Service;

pub type ConnectionKey = (OwnedUserId, OwnedDeviceId, String);

#[derive(Default)]
pub(super) struct StickyCache {
	lists: BTreeMap<String, ListConfig>,
	subscriptions: BTreeMap<OwnedRoomId, RoomSubscription>,
	extensions: ExtensionsConfig,
}

impl Service {
	/// Whether sticky state is remembered for this connection.
	pub fn connection_cached(&self, key: &ConnectionKey) -> bool {
		self.connections
			.lock()
			.expect("locked")
			.contains_key(key)
	}

	pub fn forget_connection(&self, key: &ConnectionKey) {
		self.connections.lock().expect("locked").remove(key);
	}

	/// Fill omitted request fields from the connection's sticky state, then
	/// remember the merged result for the next request.
	pub fn update_request_with_cache(&self, key: &ConnectionKey, request: &mut Request) {
		let mut cache = self.connections.lock().expect("locked");
		let cached = Arc::clone(cache.entry(key.clone()).or_default());
		let cached = &mut cached.lock().expect("locked");
		drop(cache);

		for (list_id, list) in &mut request.lists {
			if let Some(cached_list) = cached.lists.get(list_id) {
				some_or_sticky(&mut list.timeline_limit, cached_list.timeline_limit);
				some_or_sticky(
					&mut list.required_state,
					cached_list.required_state.clone(),
				);
				some_or_sticky(&mut list.range, cached_list.range);
				list_or_sticky(&mut list.ranges, &cached_list.ranges);

				match (&mut list.filters, cached_list.filters.clone()) {
					| (Some(filters), Some(cached_filters)) => {
						some_or_sticky(&mut filters.is_dm, cached_filters.is_dm);
						some_or_sticky(&mut filters.is_encrypted, cached_filters.is_encrypted);
						some_or_sticky(&mut filters.is_invite, cached_filters.is_invite);
						some_or_sticky(
							&mut filters.room_name_like,
							cached_filters.room_name_like,
						);
						list_or_sticky(&mut filters.room_types, &cached_filters.room_types);
						list_or_sticky(
							&mut filters.not_room_types,
							&cached_filters.not_room_types,
						);
						list_or_sticky(&mut filters.tags, &cached_filters.tags);
						list_or_sticky(&mut filters.not_tags, &cached_filters.not_tags);
					},
					| (_, Some(cached_filters)) => list.filters = Some(cached_filters),
					| (..) => {},
				}
			}

			cached.lists.insert(list_id.clone(), list.clone());
		}

		// lists omitted from this request keep serving with their last
		// config
		for (list_id, cached_list) in &cached.lists {
			request
				.lists
				.entry(list_id.clone())
				.or_insert_with(|| cached_list.clone());
		}

		cached
			.subscriptions
			.extend(request.room_subscriptions.clone());
		request
			.room_subscriptions
			.extend(cached.subscriptions.clone());

		let ext = &mut request.extensions;
		let cached_ext = &cached.extensions;

		some_or_sticky(&mut ext.to_device.enabled, cached_ext.to_device.enabled);
		some_or_sticky(&mut ext.e2ee.enabled, cached_ext.e2ee.enabled);

		some_or_sticky(&mut ext.account_data.enabled, cached_ext.account_data.enabled);
		some_or_sticky(
			&mut ext.account_data.lists,
			cached_ext.account_data.lists.clone(),
		);
		some_or_sticky(
			&mut ext.account_data.rooms,
			cached_ext.account_data.rooms.clone(),
		);

		some_or_sticky(&mut ext.receipts.enabled, cached_ext.receipts.enabled);
		some_or_sticky(&mut ext.receipts.lists, cached_ext.receipts.lists.clone());
		some_or_sticky(&mut ext.receipts.rooms, cached_ext.receipts.rooms.clone());

		some_or_sticky(&mut ext.typing.enabled, cached_ext.typing.enabled);
		some_or_sticky(&mut ext.typing.lists, cached_ext.typing.lists.clone());
		some_or_sticky(&mut ext.typing.rooms, cached_ext.typing.rooms.clone());

		cached.extensions = ext.clone();
	}
}

#[inline]
pub fn into_connection_key<U, D, C>(user_id: U, device_id: D, conn_id: C) -> ConnectionKey
where
	U: Into<OwnedUserId>,
	D: Into<OwnedDeviceId>,
	C: Into<String>,
{
	(user_id.into(), device_id.into(), conn_id.into())
}

/// Load params from cache if the body doesn't carry them; in some cases an
/// empty list is a real value the client means, but there is no way to tell
/// it apart from an omission in these shapes.
fn list_or_sticky<T: Clone>(target: &mut Vec<T>, cached: &Vec<T>) {
	if target.is_empty() {
		target.clone_from(cached);
	}
}

fn some_or_sticky<T>(target: &mut Option<T>, cached: Option<T>) {
	if target.is_none() {
		*target = cached;
	}
}
