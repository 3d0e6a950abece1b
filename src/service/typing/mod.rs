//! Narrow interface onto the in-memory typing cache.

use async_trait::async_trait;
use luge_core::Result;
use ruma::{OwnedUserId, RoomId};

#[async_trait]
pub trait TypingCache: Send + Sync {
	/// Users currently typing in the room, plus the typing-stream position
	/// of the last change.
	async fn typing_users(&self, room_id: &RoomId) -> Result<(Vec<OwnedUserId>, u64)>;
}
