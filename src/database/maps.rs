//! Column families of the engine's own durable state.
//!
//! Composite keys use 0xFF-separated segments; fixed-width u64 segments are
//! big-endian and always lead the key.

pub(crate) const MAPS: &[&str] = &[
	// one global row per named monotonic counter
	"counters",
	// user \xFF device \xFF conn_id -> connection_key
	"userdeviceconnid_connkey",
	// connection_key -> last-seen timestamp (millis)
	"connkey_meta",
	// connection_key \xFF position -> ()
	"connkey_positions",
	// position -> connection_key; ownership checks for presented tokens
	"connpos_connkey",
	// position \xFF room \xFF stream -> status byte ++ last_token
	"posroomstream_state",
	// position \xFF room -> timeline_limit(u64be) ++ required_state_id(u64be)
	"posroom_config",
	// connection_key \xFF canonical-config -> required_state_id
	"connreqstate_id",
	// connection_key \xFF required_state_id -> canonical-config
	"connid_reqstate",
	// connection_key \xFF list-name -> JSON room-id array last sent
	"connlist_rooms",
	// connection_key \xFF room \xFF receipt-type \xFF user -> event_id \xFF ts
	"connroomtypeuser_receipt",
	// room -> cached list-decoration row
	"joined_rooms",
	// room \xFF user -> cached membership-snapshot row
	"membership_snapshots",
	// room -> (); durable feed of the metadata recalculation worker
	"rooms_to_recalculate",
];
