//! Narrow interface onto the room-server.

use async_trait::async_trait;
use luge_core::Result;
use ruma::{OwnedUserId, RoomId};

#[async_trait]
pub trait RoomServer: Send + Sync {
	/// Map a stored sender identifier to a user id. `Ok(None)` drops the
	/// event from timelines rather than failing the room.
	async fn resolve_sender(&self, room_id: &RoomId, sender: &str) -> Result<Option<OwnedUserId>>;

	/// Whether the room is still resolving partial state over federation.
	async fn is_partial_state(&self, room_id: &RoomId) -> Result<bool>;
}
