use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};

use crate::error::{AccountError, AccountResult, AuthFailure};
use crate::ratelimit::{RateLimitStatus, RateScope};
use crate::session::extract_bearer;
use crate::state::AppState;
use crate::types::*;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/challenge", post(challenge))
        .route("/verify", post(verify))
        .route("/agent/:address", get(get_agent))
        .route("/account/:address", delete(delete_account))
        .with_state(state)
}

// ============ Request Helpers ============

/// Rate-limit key for unauthenticated, address-less requests: first
/// `X-Forwarded-For` hop, else the socket peer.
fn client_key(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".into())
}

fn rate_headers(status: Option<RateLimitStatus>) -> HeaderMap {
    status.map(|s| s.headers()).unwrap_or_default()
}

/// Challenge and verify buckets are per client and address, so one
/// client cannot spend another's login budget. Case variants of an
/// address share a bucket.
fn login_key(client: &str, address: &str) -> String {
    format!("{}|{}", client, address.trim().to_ascii_lowercase())
}

// ============ Health ============

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(state.health()))
}

// ============ Auth Flow ============

async fn register(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> AccountResult<impl IntoResponse> {
    let quota = state.rate_limit(RateScope::Register, &client_key(&headers, peer.as_ref()))?;

    let resp = state
        .accounts
        .register(&req.name, &req.public_key_hex, req.telos)?;
    state.mark_dirty();

    Ok((
        StatusCode::CREATED,
        rate_headers(quota),
        Json(ApiResponse::success(resp)),
    ))
}

async fn challenge(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<ChallengeRequest>,
) -> AccountResult<impl IntoResponse> {
    let key = login_key(&client_key(&headers, peer.as_ref()), &req.address);
    let quota = state.rate_limit(RateScope::Challenge, &key)?;
    let resp = state.accounts.request_challenge(&req.address)?;
    Ok((rate_headers(quota), Json(ApiResponse::success(resp))))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> AccountResult<impl IntoResponse> {
    let key = login_key(&client_key(&headers, peer.as_ref()), &req.address);
    let quota = state.rate_limit(RateScope::Verify, &key)?;

    let result = state.accounts.verify(&req.address, &req.signature_hex);
    // Both success (last_seen) and failure (witness entry) change state
    state.mark_dirty();

    Ok((rate_headers(quota), Json(ApiResponse::success(result?))))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(address): Path<String>,
) -> AccountResult<impl IntoResponse> {
    let quota = state.rate_limit(RateScope::Profile, &client_key(&headers, peer.as_ref()))?;
    let profile = state.accounts.get_profile(&address)?;
    Ok((rate_headers(quota), Json(ApiResponse::success(profile))))
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(address): Path<String>,
    Query(query): Query<DeleteAccountQuery>,
) -> AccountResult<impl IntoResponse> {
    let token = extract_bearer(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    )
    .ok_or(AccountError::Unauthorized(AuthFailure::MissingToken))?;

    // Only the authorized owner spends the delete quota
    let address = state.accounts.authorize_deletion(
        &address,
        token,
        query.confirmed.unwrap_or(false),
    )?;
    let quota = state.rate_limit(RateScope::Delete, address.as_str())?;

    let export = state
        .accounts
        .delete_authorized(&address, chrono::Utc::now())?;
    state.mark_dirty();

    Ok((
        rate_headers(quota),
        Json(ApiResponse::success(DeleteAccountResponse {
            status: "deleted".into(),
            export_data: export,
        })),
    ))
}
