use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use luge_core::{Config, RequiredState, Server, StreamToken};
use luge_database::Database;
use ruma::{device_id, owned_room_id, owned_user_id, user_id};

use super::{
	PersistUpdate, ReceiptPersist, RoomPersist, RoomStatus, Service, into_connection_key,
};

static NONCE: AtomicUsize = AtomicUsize::new(0);

struct Fixture {
	service: Arc<Service>,
	_server: Arc<Server>,
	_db: Arc<Database>,
	path: std::path::PathBuf,
}

impl Drop for Fixture {
	fn drop(&mut self) {
		let _result = std::fs::remove_dir_all(&self.path);
	}
}

fn fixture() -> Fixture { fixture_with_ttl(60 * 60) }

fn fixture_with_ttl(ttl: u64) -> Fixture {
	let nonce = NONCE.fetch_add(1, Ordering::SeqCst);
	let path = std::env::temp_dir().join(format!(
		"luge-sync-store-test-{}-{nonce}",
		std::process::id()
	));

	let mut config = Config::default();
	config.database_path = path.clone();
	config.sync_connection_ttl = ttl;

	let server = Server::new(config);
	let db = Database::open(&server).expect("database opens");
	let service = Service::open(&server, &db).expect("service opens");

	Fixture { service, _server: server, _db: db, path }
}

fn streams(pdu: u64) -> StreamToken {
	StreamToken { pdu, ..Default::default() }
}

fn room_update(room: &str) -> RoomPersist {
	RoomPersist {
		room_id: room.try_into().expect("valid room id"),
		timeline_limit: 10,
		required_state: RequiredState::default(),
	}
}

#[test]
fn connection_key_is_stable() {
	let f = fixture();
	let a = f
		.service
		.open_connection(user_id!("@a:host"), device_id!("DEV"), "default", None)
		.unwrap();

	let b = f
		.service
		.open_connection(user_id!("@a:host"), device_id!("DEV"), "default", None)
		.unwrap();

	let other = f
		.service
		.open_connection(user_id!("@a:host"), device_id!("DEV"), "other", None)
		.unwrap();

	assert_eq!(a.key, b.key);
	assert_ne!(a.key, other.key);
}

#[test]
fn positions_progress_and_cascade() {
	let f = fixture();
	let user = user_id!("@a:host");
	let device = device_id!("DEV");

	let conn = f
		.service
		.open_connection(user, device, "default", None)
		.unwrap();

	let p1 = f
		.service
		.persist(&conn, &PersistUpdate {
			streams: streams(5),
			rooms: vec![room_update("!r:host")],
			..Default::default()
		})
		.unwrap();

	let conn = f
		.service
		.open_connection(user, device, "default", Some(p1))
		.unwrap();

	assert_eq!(conn.position, Some(p1));

	let p2 = f
		.service
		.persist(&conn, &PersistUpdate { streams: streams(6), ..Default::default() })
		.unwrap();

	assert!(p2 > p1, "positions are monotonic");

	// p1 was cascaded away by the response that minted p2
	let stale = f
		.service
		.open_connection(user, device, "default", Some(p1));
	assert!(stale.is_err_and(|e| e.is_unknown_pos()));

	// a position of someone else's connection is also unknown
	let conn_b = f
		.service
		.open_connection(user_id!("@b:host"), device, "default", None)
		.unwrap();
	assert_ne!(conn_b.key, conn.key);
	let foreign = f
		.service
		.open_connection(user_id!("@b:host"), device, "default", Some(p2));
	assert!(foreign.is_err_and(|e| e.is_unknown_pos()));
}

#[test]
fn stream_state_copies_forward() {
	let f = fixture();
	let user = user_id!("@a:host");
	let device = device_id!("DEV");
	let room = owned_room_id!("!r:host");

	let conn = f
		.service
		.open_connection(user, device, "default", None)
		.unwrap();

	let p1 = f
		.service
		.persist(&conn, &PersistUpdate {
			streams: streams(5),
			rooms: vec![room_update(room.as_str())],
			..Default::default()
		})
		.unwrap();

	let conn = f
		.service
		.open_connection(user, device, "default", Some(p1))
		.unwrap();

	let state = conn.room_state(&room).expect("room was recorded");
	assert_eq!(state.status, RoomStatus::Live);
	assert_eq!(state.last_token, streams(5).to_string());

	// response with no rooms: the record survives at the new position
	let p2 = f
		.service
		.persist(&conn, &PersistUpdate { streams: streams(9), ..Default::default() })
		.unwrap();

	let conn = f
		.service
		.open_connection(user, device, "default", Some(p2))
		.unwrap();

	let state = conn.room_state(&room).expect("copy-forward kept the room");
	assert_eq!(state.status, RoomStatus::Live);
	assert_eq!(state.last_token, streams(5).to_string(), "last token unchanged");

	// the room config copied forward too
	assert_eq!(conn.configs[&room].timeline_limit, 10);
}

#[test]
fn required_state_dictionary_deduplicates() {
	let f = fixture();
	let user = user_id!("@a:host");
	let device = device_id!("DEV");

	let config: RequiredState =
		serde_json::from_str(r#"[["m.room.name",""]]"#).expect("config parses");

	let conn = f
		.service
		.open_connection(user, device, "default", None)
		.unwrap();

	let mut update = PersistUpdate { streams: streams(5), ..Default::default() };
	update.rooms = vec![
		RoomPersist {
			room_id: owned_room_id!("!a:host"),
			timeline_limit: 5,
			required_state: config.clone(),
		},
		RoomPersist {
			room_id: owned_room_id!("!b:host"),
			timeline_limit: 5,
			required_state: config.clone(),
		},
	];

	let p1 = f.service.persist(&conn, &update).unwrap();
	let conn = f
		.service
		.open_connection(user, device, "default", Some(p1))
		.unwrap();

	let id_a = conn.configs[&owned_room_id!("!a:host")].required_state_id;
	let id_b = conn.configs[&owned_room_id!("!b:host")].required_state_id;
	assert_eq!(id_a, id_b, "equal configs share one dictionary id");

	// a second response with the same config reuses the stored id
	let mut update = PersistUpdate { streams: streams(6), ..Default::default() };
	update.rooms = vec![RoomPersist {
		room_id: owned_room_id!("!a:host"),
		timeline_limit: 5,
		required_state: config,
	}];

	let p2 = f.service.persist(&conn, &update).unwrap();
	let conn = f
		.service
		.open_connection(user, device, "default", Some(p2))
		.unwrap();

	assert_eq!(conn.configs[&owned_room_id!("!a:host")].required_state_id, id_a);
}

#[test]
fn receipts_and_lists_round_trip() {
	let f = fixture();
	let user = user_id!("@a:host");
	let device = device_id!("DEV");
	let room = owned_room_id!("!r:host");

	let conn = f
		.service
		.open_connection(user, device, "default", None)
		.unwrap();

	let update = PersistUpdate {
		streams: streams(5),
		rooms: vec![],
		lists: vec![("all".to_owned(), vec![room.clone()])],
		receipts: vec![ReceiptPersist {
			room_id: room.clone(),
			receipt_type: "m.read".to_owned(),
			user_id: owned_user_id!("@b:host"),
			event_id: "$e1:host".try_into().unwrap(),
			ts: 1234,
		}],
	};

	f.service.persist(&conn, &update).unwrap();

	let ordering = f
		.service
		.list_ordering(conn.key, "all")
		.unwrap()
		.expect("ordering stored");
	assert_eq!(ordering, vec![room.clone()]);

	assert!(
		f.service
			.list_ordering(conn.key, "missing")
			.unwrap()
			.is_none()
	);

	let delivered = f.service.delivered_receipts(conn.key, &room).unwrap();
	let key = ("m.read".to_owned(), owned_user_id!("@b:host"));
	assert_eq!(delivered[&key].as_str(), "$e1:host");
}

#[test]
fn ageing_sweeps_idle_connections() {
	let f = fixture_with_ttl(0);
	let user = user_id!("@a:host");
	let device = device_id!("DEV");

	let conn = f
		.service
		.open_connection(user, device, "default", None)
		.unwrap();

	let p1 = f
		.service
		.persist(&conn, &PersistUpdate {
			streams: streams(5),
			rooms: vec![room_update("!r:host")],
			..Default::default()
		})
		.unwrap();

	// sticky state present before the sweep
	let cache_key = into_connection_key(user.to_owned(), device.to_owned(), "default");
	let mut request = luge_core::matrix::sliding::Request::default();
	f.service
		.update_request_with_cache(&cache_key, &mut request);
	assert!(f.service.connection_cached(&cache_key));

	std::thread::sleep(std::time::Duration::from_millis(5));
	let aged = f.service.age_out().unwrap();
	assert_eq!(aged, 1);
	assert!(!f.service.connection_cached(&cache_key));

	let stale = f
		.service
		.open_connection(user, device, "default", Some(p1));
	assert!(stale.is_err_and(|e| e.is_unknown_pos()));
}
