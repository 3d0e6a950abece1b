pub mod config;
mod error;
pub mod log;
pub mod matrix;
pub mod server;
pub mod utils;

pub use ::figment;
pub use ::futures;
pub use ::ruma;
pub use ::serde;
pub use ::serde_json;
pub use ::tokio;
pub use ::tracing;

pub use self::{
	config::Config,
	error::Error,
	log::{debug, error, info, trace, warn},
	matrix::{
		ClientEvent, RequiredState, StateKey, StreamEvent, StreamKind, StreamToken,
		StrippedEvent, SyncToken, TopologyToken,
	},
	server::Server,
};

/// Crate-wide Result type; error type and Ok-type default to unit.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Number of substreams bundled into a [`StreamToken`].
pub const STREAM_FIELDS: usize = 9;
