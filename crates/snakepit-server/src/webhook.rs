// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitHub push webhook.
//!
//! Checks run in a fixed order: sender, content type, payload, registration,
//! signature. Only after the signature verifies is the event or the ref looked
//! at, so an unsigned request learns nothing about what would have happened.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use snakepit_core::Error;
use snakepit_core::deploy::BuildRequestOutcome;
use tracing::{error, info, warn};

use crate::AppState;

const EVENT_HEADER: &str = "x-github-event";
const SIGNATURE_HEADER: &str = "x-hub-signature";
const SIGNATURE_256_HEADER: &str = "x-hub-signature-256";
const HOOKSHOT_AGENT_PREFIX: &str = "GitHub-Hookshot/";

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref", default)]
    git_ref: String,
    #[serde(default)]
    repository: RepositoryInfo,
}

#[derive(Debug, Default, Deserialize)]
struct RepositoryInfo {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    default_branch: String,
    #[serde(default)]
    private: bool,
}

/// What to do with a push to a ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefDecision {
    /// Push to the default branch: deploy.
    Deploy,
    /// Not of the form `refs/<kind>/<name>`.
    IgnoreMalformed,
    /// Push to a tag.
    IgnoreTag(String),
    /// Push to something other than a branch or tag.
    IgnoreOther,
    /// Push to a branch other than the default one.
    IgnoreBranch(String),
}

impl RefDecision {
    /// Response body explaining an ignored push.
    pub fn explain(&self, git_ref: &str, default_branch: &str) -> Option<String> {
        let target = match self {
            RefDecision::Deploy => return None,
            RefDecision::IgnoreMalformed | RefDecision::IgnoreOther => git_ref.to_string(),
            RefDecision::IgnoreTag(tag) => format!("tag {tag}"),
            RefDecision::IgnoreBranch(branch) => format!("branch {branch}"),
        };
        Some(format!(
            "Ignoring push to {target}\nOnly deploying from branch {default_branch}"
        ))
    }
}

/// Decide whether a push to `git_ref` should deploy.
///
/// The ref must have exactly three `/`-separated segments starting with
/// `refs` and a non-empty name, so branch names containing `/` are never
/// deployed and a payload missing its default branch cannot match.
pub fn classify_ref(git_ref: &str, default_branch: &str) -> RefDecision {
    let parts: Vec<&str> = git_ref.split('/').collect();
    let [prefix, kind, name] = parts.as_slice() else {
        return RefDecision::IgnoreMalformed;
    };
    if *prefix != "refs" || name.is_empty() {
        return RefDecision::IgnoreMalformed;
    }
    match *kind {
        "tags" => RefDecision::IgnoreTag(name.to_string()),
        "heads" if *name == default_branch => RefDecision::Deploy,
        "heads" => RefDecision::IgnoreBranch(name.to_string()),
        _ => RefDecision::IgnoreOther,
    }
}

/// `/deploy/`: verify a GitHub webhook and request a build.
pub async fn deploy_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let agent = header_str(&headers, header::USER_AGENT.as_str());
    if !agent.starts_with(HOOKSHOT_AGENT_PREFIX) {
        return (StatusCode::UNAUTHORIZED, "Access Denied").into_response();
    }

    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str());
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("application/json") {
        return (
            StatusCode::BAD_REQUEST,
            "Invalid Content-Type. Only json Supported",
        )
            .into_response();
    }

    let payload: PushPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Could not parse webhook payload");
            return (StatusCode::BAD_REQUEST, "Invalid Request").into_response();
        }
    };
    let repository = payload.repository.full_name.as_str();

    let signature = match header_str(&headers, SIGNATURE_256_HEADER) {
        "" => header_str(&headers, SIGNATURE_HEADER),
        sig256 => sig256,
    };
    match state
        .coordinator
        .verify_signature(repository, &body, signature)
        .await
    {
        Ok(()) => {}
        Err(Error::NotRegistered(_)) => {
            return (StatusCode::UNAUTHORIZED, "Access Denied: Not registered").into_response();
        }
        Err(Error::Signature(e)) => {
            warn!(repository = %repository, error = %e, "Rejected webhook signature");
            return (StatusCode::UNAUTHORIZED, format!("Access Denied: {e}")).into_response();
        }
        Err(e) => {
            error!(repository = %repository, error = %e, "Signature check failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error").into_response();
        }
    }

    match header_str(&headers, EVENT_HEADER) {
        "ping" => return (StatusCode::OK, "pong").into_response(),
        "push" => {}
        _ => return (StatusCode::FORBIDDEN, "Action Forbidden").into_response(),
    }

    if payload.repository.private {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Cannot Access Private Repos",
        )
            .into_response();
    }

    let default_branch = payload.repository.default_branch.as_str();
    let decision = classify_ref(&payload.git_ref, default_branch);
    if let Some(explanation) = decision.explain(&payload.git_ref, default_branch) {
        info!(repository = %repository, git_ref = %payload.git_ref, "Ignoring push");
        return (StatusCode::OK, explanation).into_response();
    }

    match state.coordinator.request_build(repository).await {
        Ok(BuildRequestOutcome::Started) => {
            (StatusCode::OK, format!("Deploying {repository}...")).into_response()
        }
        Ok(BuildRequestOutcome::Queued) => (
            StatusCode::OK,
            "There is already a job deploying\nAdding the build job to the queue",
        )
            .into_response(),
        Err(e) if e.is_not_registered() => {
            (StatusCode::UNAUTHORIZED, "Access Denied: Not registered").into_response()
        }
        Err(e) => {
            error!(repository = %repository, error = %e, "Could not request build");
            (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error").into_response()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}
