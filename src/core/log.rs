//! Logging is emitted through `tracing`; installing a subscriber is the
//! embedding server's concern.

pub use tracing::{debug, error, info, trace, warn};

/// Log at error level in debug builds, debug level in release builds. For
/// conditions operators cannot act on but developers should see loudly.
#[macro_export]
macro_rules! debug_error {
	($($x:tt)+) => {
		if cfg!(debug_assertions) {
			::tracing::error!($($x)+);
		} else {
			::tracing::debug!($($x)+);
		}
	}
}

/// Log at warn level in debug builds, debug level in release builds.
#[macro_export]
macro_rules! debug_warn {
	($($x:tt)+) => {
		if cfg!(debug_assertions) {
			::tracing::warn!($($x)+);
		} else {
			::tracing::debug!($($x)+);
		}
	}
}
