use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
#[inline]
#[must_use]
pub fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("wall clock is set after the unix epoch")
		.as_millis()
		.try_into()
		.unwrap_or(u64::MAX)
}
