use std::{fmt, str::FromStr};

use crate::{Err, Error, Result, err};

/// Per-substream positions bundled into the stream half of a sync position
/// token. Every field is a monotonic stream ordinal owned by one substream
/// writer; `0` means "from the beginning".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StreamToken {
	pub pdu: u64,
	pub invite: u64,
	pub receipt: u64,
	pub account_data: u64,
	pub typing: u64,
	pub device_list: u64,
	pub to_device: u64,
	pub notification: u64,
	pub un_partial_stated: u64,
}

/// Names for the substreams of a [`StreamToken`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum StreamKind {
	Pdu,
	Invite,
	Receipt,
	AccountData,
	Typing,
	DeviceList,
	ToDevice,
	Notification,
	UnPartialStated,
}

/// The full position token presented by and returned to clients:
/// `"{connection_position}/{stream_token}"`. Opaque to clients.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SyncToken {
	pub position: u64,
	pub streams: StreamToken,
}

/// Topological position of an event, used for `prev_batch` pagination
/// handoff: `"t{depth}_{stream}"`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TopologyToken {
	pub depth: u64,
	pub stream: u64,
}

impl StreamToken {
	#[inline]
	#[must_use]
	pub fn get(&self, kind: StreamKind) -> u64 {
		match kind {
			| StreamKind::Pdu => self.pdu,
			| StreamKind::Invite => self.invite,
			| StreamKind::Receipt => self.receipt,
			| StreamKind::AccountData => self.account_data,
			| StreamKind::Typing => self.typing,
			| StreamKind::DeviceList => self.device_list,
			| StreamKind::ToDevice => self.to_device,
			| StreamKind::Notification => self.notification,
			| StreamKind::UnPartialStated => self.un_partial_stated,
		}
	}

	pub fn set(&mut self, kind: StreamKind, position: u64) {
		let field = match kind {
			| StreamKind::Pdu => &mut self.pdu,
			| StreamKind::Invite => &mut self.invite,
			| StreamKind::Receipt => &mut self.receipt,
			| StreamKind::AccountData => &mut self.account_data,
			| StreamKind::Typing => &mut self.typing,
			| StreamKind::DeviceList => &mut self.device_list,
			| StreamKind::ToDevice => &mut self.to_device,
			| StreamKind::Notification => &mut self.notification,
			| StreamKind::UnPartialStated => &mut self.un_partial_stated,
		};

		*field = position;
	}

	/// Advance a substream; positions never move backwards.
	pub fn advance(&mut self, kind: StreamKind, position: u64) {
		let current = self.get(kind);
		self.set(kind, current.max(position));
	}

	/// True when any substream of `self` is ahead of `since`. Drives the
	/// notifier's wake threshold.
	#[must_use]
	pub fn any_after(&self, since: &Self) -> bool {
		self.pdu > since.pdu
			|| self.invite > since.invite
			|| self.receipt > since.receipt
			|| self.account_data > since.account_data
			|| self.typing > since.typing
			|| self.device_list > since.device_list
			|| self.to_device > since.to_device
			|| self.notification > since.notification
			|| self.un_partial_stated > since.un_partial_stated
	}
}

impl fmt::Display for StreamToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"s{}_{}_{}_{}_{}_{}_{}_{}_{}",
			self.pdu,
			self.invite,
			self.receipt,
			self.account_data,
			self.typing,
			self.device_list,
			self.to_device,
			self.notification,
			self.un_partial_stated,
		)
	}
}

impl FromStr for StreamToken {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		let Some(fields) = s.strip_prefix('s') else {
			return Err!(BadToken("Stream token lacks its prefix: {s:?}"));
		};

		let mut parsed = [0_u64; crate::STREAM_FIELDS];
		let mut count = 0;
		for (i, field) in fields.split('_').enumerate() {
			if i >= parsed.len() {
				return Err!(BadToken("Stream token has too many fields: {s:?}"));
			}

			parsed[i] = field
				.parse()
				.map_err(|e| err!(BadToken("Stream token field {i} invalid: {e}")))?;

			count = i.saturating_add(1);
		}

		if count != parsed.len() {
			return Err!(BadToken("Stream token has too few fields: {s:?}"));
		}

		Ok(Self {
			pdu: parsed[0],
			invite: parsed[1],
			receipt: parsed[2],
			account_data: parsed[3],
			typing: parsed[4],
			device_list: parsed[5],
			to_device: parsed[6],
			notification: parsed[7],
			un_partial_stated: parsed[8],
		})
	}
}

impl fmt::Display for SyncToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.position, self.streams)
	}
}

impl FromStr for SyncToken {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		let Some((position, streams)) = s.split_once('/') else {
			return Err!(BadToken("Position token lacks its separator: {s:?}"));
		};

		let position = position
			.parse()
			.map_err(|e| err!(BadToken("Connection position invalid: {e}")))?;

		Ok(Self { position, streams: streams.parse()? })
	}
}

impl TopologyToken {
	/// One step backwards for pagination handoff; clamps at the root.
	#[must_use]
	pub fn decrement(&self) -> Self {
		Self {
			depth: self.depth.saturating_sub(1),
			stream: self.stream,
		}
	}
}

impl fmt::Display for TopologyToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "t{}_{}", self.depth, self.stream)
	}
}

impl FromStr for TopologyToken {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		let Some(fields) = s.strip_prefix('t') else {
			return Err!(BadToken("Topology token lacks its prefix: {s:?}"));
		};

		let Some((depth, stream)) = fields.split_once('_') else {
			return Err!(BadToken("Topology token lacks its separator: {s:?}"));
		};

		Ok(Self {
			depth: depth
				.parse()
				.map_err(|e| err!(BadToken("Topology depth invalid: {e}")))?,
			stream: stream
				.parse()
				.map_err(|e| err!(BadToken("Topology stream invalid: {e}")))?,
		})
	}
}
