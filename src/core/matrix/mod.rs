//! Core protocol fundamentals shared by the engine's crates.

pub mod event;
pub mod required_state;
pub mod sliding;
pub mod state_key;
pub mod token;

pub use self::{
	event::{
		AvatarContent, BUMP_TYPES, ClientEvent, CreateContent, DirectContent, EncryptionContent,
		MemberContent, NameContent, StreamEvent, StrippedEvent, TagContent, TombstoneContent,
		TopicContent,
	},
	required_state::RequiredState,
	state_key::StateKey,
	token::{StreamKind, StreamToken, SyncToken, TopologyToken},
};
