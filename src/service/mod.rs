#![allow(refining_impl_trait)]

mod manager;
mod service;
pub mod services;

pub mod events;
pub mod metadata;
pub mod notify;
pub mod rooms;
pub mod sync;
pub mod typing;
pub mod users;

pub(crate) use service::{Args, Service};

pub use crate::{
	events::EventStore,
	rooms::RoomServer,
	services::{Services, Sources},
	typing::TypingCache,
	users::UserService,
};
