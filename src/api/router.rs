//! The engine's single route. Authentication, rate limiting and the rest
//! of the client-server surface live in the embedding server, which
//! attaches the authenticated identity as a request extension before
//! delegating here.

use std::sync::Arc;

use axum::{
	Extension, Json, Router,
	extract::{Query, State},
	response::{IntoResponse, Response},
	routing::post,
};
use http::StatusCode;
use luge_core::{Error, matrix::sliding::Request, warn};
use luge_service::Services;
use ruma::{OwnedDeviceId, OwnedUserId};
use serde::Deserialize;
use serde_json::json;

use crate::client::sync::sync_events;

/// Authenticated requester identity, attached upstream.
#[derive(Clone, Debug)]
pub struct SyncAuth {
	pub user_id: OwnedUserId,
	pub device_id: OwnedDeviceId,
}

#[derive(Deserialize)]
struct SyncQuery {
	pos: Option<String>,
	timeout: Option<u64>,
}

/// Build the router serving the sliding-sync endpoint.
pub fn build(services: Arc<Services>) -> Router {
	Router::new()
		.route("/_matrix/client/unstable/org.matrix.msc3575/sync", post(sync_handler))
		.with_state(services)
}

async fn sync_handler(
	State(services): State<Arc<Services>>,
	Extension(auth): Extension<SyncAuth>,
	Query(query): Query<SyncQuery>,
	Json(mut request): Json<Request>,
) -> Response {
	// the URL form of pos and timeout wins over the body
	if let Some(pos) = query.pos {
		request.pos = Some(pos);
	}

	if let Some(timeout) = query.timeout {
		request.timeout = Some(timeout);
	}

	match sync_events(&services, &auth.user_id, &auth.device_id, request).await {
		| Ok(response) => Json(response).into_response(),
		| Err(e) => error_response(&e),
	}
}

/// Map the error taxonomy onto client-visible replies. A stale position
/// gets the code clients recognise as "restart this connection".
fn error_response(error: &Error) -> Response {
	let (status, errcode) = match error {
		| Error::UnknownPos(_) => (StatusCode::BAD_REQUEST, "M_UNKNOWN_POS"),
		| Error::BadToken(_) | Error::BadRequest(_) | Error::Json(_) =>
			(StatusCode::BAD_REQUEST, "M_INVALID_PARAM"),
		| Error::NotFound(_) => (StatusCode::NOT_FOUND, "M_NOT_FOUND"),
		| _ => {
			warn!("sync request failed: {error:?}");
			(StatusCode::INTERNAL_SERVER_ERROR, "M_UNKNOWN")
		},
	};

	let body = json!({
		"errcode": errcode,
		"error": error.to_string(),
	});

	(status, Json(body)).into_response()
}
