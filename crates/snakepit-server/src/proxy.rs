// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Forward battlesnake API calls to the owning container.
//!
//! The instance is activated first, the request is forwarded with its method,
//! body and content type, and the instance's status, headers and body are
//! copied back. Usage is recorded only once the instance's response body has
//! been read in full. The instance holds a request lease for the whole
//! exchange, so the lifecycle scheduler leaves it running meanwhile.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::AppState;

const NOT_FOUND_BODY: &str = "404 Battle-Snake Not Found";
const INTERNAL_ERROR_BODY: &str = "500 Internal Server Error";

/// Actions a battlesnake serves besides its root.
const ACTIONS: [&str; 3] = ["start", "move", "end"];

/// Headers that describe the upstream connection rather than the payload.
const HOP_BY_HOP: [header::HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
    header::UPGRADE,
];

/// `/bs/{id}` and `/bs/{id}/`: forward to the instance root.
pub async fn proxy_root(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward(&state, &id, "/", method, &headers, body).await
}

/// `/bs/{id}/{action}` and `/bs/{id}/{action}/`: forward to `/{action}/`.
pub async fn proxy_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !ACTIONS.contains(&action.as_str()) {
        return not_found();
    }
    let path = format!("/{action}/");
    forward(&state, &id, &path, method, &headers, body).await
}

async fn forward(
    state: &AppState,
    id: &str,
    path: &str,
    method: Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let container = format!("{}{}", state.container_prefix, id);

    let lease = match state.activator.begin_request(&container).await {
        Ok(lease) => lease,
        Err(e) if e.is_not_registered() => return not_found(),
        Err(e) => {
            error!(instance_id = %container, error = %e, "Could not start container");
            return internal_error();
        }
    };
    if lease.address().is_empty() {
        error!(instance_id = %container, "Instance is running but has no address");
        lease.release().await;
        return internal_error();
    }

    let port = state.instance_port;
    let url = format!("http://{}:{port}{path}", lease.address());
    debug!(instance_id = %container, url = %url, method = %method, "Forwarding request");

    let mut request = state.http.request(method, &url).body(body);
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        request = request.header(header::CONTENT_TYPE, content_type);
    }

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(instance_id = %container, error = %e, "Could not perform pass-through request");
            lease.release().await;
            return internal_error();
        }
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let payload = match upstream.bytes().await {
        Ok(payload) => payload,
        Err(e) => {
            error!(instance_id = %container, error = %e, "Could not read proxied response");
            lease.release().await;
            return internal_error();
        }
    };

    if let Err(e) = lease.complete().await {
        warn!(instance_id = %container, error = %e, "Failed to record instance usage");
    }

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    for (name, value) in upstream_headers.iter() {
        if !HOP_BY_HOP.contains(name) {
            response_headers.append(name.clone(), value.clone());
        }
    }
    response
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
}
