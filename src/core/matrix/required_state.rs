//! Required-state pattern sets: which current-state events accompany a room.
//!
//! A pattern is a `[type, state_key]` pair. The type side matches exactly or
//! by `"*"`. The state-key side matches exactly, by `"*"`, by `"$ME"` (the
//! requesting user), or by `"$LAZY"` (senders present in the emitted
//! timeline).

use std::collections::BTreeSet;

use ruma::UserId;
use serde::{Deserialize, Deserializer, Serialize};

use crate::Result;

pub const WILDCARD: &str = "*";
pub const ME: &str = "$ME";
pub const LAZY: &str = "$LAZY";

pub type StatePattern = (String, String);

/// Accepted on the wire either as a bare include array or as an object with
/// include/exclude sides; always serialized (and persisted) in the object
/// form so equal configs deduplicate by content.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RequiredState {
	#[serde(default)]
	pub include: Vec<StatePattern>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub exclude: Vec<StatePattern>,

	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub lazy_members: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Shape {
	Config {
		#[serde(default)]
		include: Vec<StatePattern>,
		#[serde(default)]
		exclude: Vec<StatePattern>,
		#[serde(default)]
		lazy_members: bool,
	},
	Bare(Vec<StatePattern>),
}

impl<'de> Deserialize<'de> for RequiredState {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		Ok(match Shape::deserialize(deserializer)? {
			| Shape::Config { include, exclude, lazy_members } =>
				Self { include, exclude, lazy_members },
			| Shape::Bare(include) => Self { include, ..Default::default() },
		})
	}
}

impl RequiredState {
	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.include.is_empty() && self.exclude.is_empty() && !self.lazy_members
	}

	/// True when the config asks for lazy-loaded members, either through the
	/// flag or through a `$LAZY` state-key pattern.
	#[must_use]
	pub fn wants_lazy(&self) -> bool {
		self.lazy_members || self.include.iter().any(|(_, key)| key == LAZY)
	}

	/// True when satisfying the config requires the room's full state; rooms
	/// still resolving partial state cannot honor such a subscription.
	#[must_use]
	pub fn demands_full_state(&self) -> bool {
		self.lazy_members
			|| self
				.include
				.iter()
				.any(|(ty, key)| ty == WILDCARD || key == WILDCARD || key == LAZY)
	}

	/// Absorb another config; include/exclude sides union, duplicates folded.
	pub fn merge(&mut self, other: &Self) {
		for pattern in &other.include {
			if !self.include.contains(pattern) {
				self.include.push(pattern.clone());
			}
		}

		for pattern in &other.exclude {
			if !self.exclude.contains(pattern) {
				self.exclude.push(pattern.clone());
			}
		}

		self.lazy_members |= other.lazy_members;
	}

	/// Decide whether a state event `(event_type, state_key)` is shipped.
	/// Excludes veto before includes admit.
	#[must_use]
	pub fn matches(
		&self,
		event_type: &str,
		state_key: &str,
		user_id: &UserId,
		lazy_senders: &BTreeSet<String>,
	) -> bool {
		let matched = |(ty, key): &StatePattern| {
			pattern_matches(ty, key, event_type, state_key, user_id, lazy_senders)
		};

		if self.exclude.iter().any(|pattern| matched(pattern)) {
			return false;
		}

		if self.lazy_members
			&& event_type == "m.room.member"
			&& lazy_senders.contains(state_key)
		{
			return true;
		}

		self.include.iter().any(|pattern| matched(pattern))
	}

	/// Canonical serialized form; the connection store's dictionary key.
	pub fn canonical(&self) -> Result<String> {
		serde_json::to_string(self).map_err(Into::into)
	}
}

fn pattern_matches(
	pattern_type: &str,
	pattern_key: &str,
	event_type: &str,
	state_key: &str,
	user_id: &UserId,
	lazy_senders: &BTreeSet<String>,
) -> bool {
	if pattern_type != WILDCARD && pattern_type != event_type {
		return false;
	}

	match pattern_key {
		| WILDCARD => true,
		| ME => state_key == user_id.as_str(),
		| LAZY => lazy_senders.contains(state_key),
		| _ => pattern_key == state_key,
	}
}
