//! Token API endpoints
//!
//! Provides REST API endpoints for session credentials:
//! - POST /tokens - Issue an access token and refresh credential
//! - POST /tokens/refresh - Exchange a refresh credential for a new access token
//! - GET /tokens/introspect - Inspect the caller's access token
//!
//! The client address is the IP of the socket peer; the port is ignored so a
//! new connection from the same host does not count as an address change.
//! Internal failures are logged where they happen, responses only carry a
//! fixed message.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::core::auth::{
    AuthError, AuthService, IssueRequest, IssuedCredentials, RefreshRequest, RefreshedCredentials,
};

/// Token API state containing the auth service
#[derive(Clone)]
pub struct AuthApiState {
    pub auth_service: AuthService,
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Convert AuthError to API response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AuthError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::new(msg.clone(), "INVALID_INPUT"),
            ),
            AuthError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("Unauthorized", "UNAUTHORIZED"),
            ),
            AuthError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("Internal server error", "INTERNAL_ERROR"),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Malformed or incomplete request bodies answer like any other bad input
impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::InvalidInput(rejection.body_text())
    }
}

/// Response for token introspection
#[derive(Debug, Serialize, Deserialize)]
pub struct IntrospectResponse {
    pub subject: String,
    pub bound_address: String,
    pub expires_at: i64,
}

/// Create the token API router
pub fn auth_api_router(state: AuthApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/tokens", post(issue_handler))
        .route("/tokens/refresh", post(refresh_handler))
        .route("/tokens/introspect", get(introspect_handler))
        .with_state(state)
}

/// POST /tokens
/// Issue an access token and refresh credential
async fn issue_handler(
    State(state): State<Arc<AuthApiState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<IssueRequest>, JsonRejection>,
) -> Result<Json<IssuedCredentials>, AuthError> {
    let Json(request) = payload?;
    let issued = state
        .auth_service
        .issue(&request.user_id, peer.ip())
        .await?;

    Ok(Json(issued))
}

/// POST /tokens/refresh
/// Refresh access token using refresh credential
async fn refresh_handler(
    State(state): State<Arc<AuthApiState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshedCredentials>, AuthError> {
    tracing::debug!("Token refresh request");
    let Json(request) = payload?;

    let refreshed = state.auth_service.refresh(request, peer.ip()).await?;

    Ok(Json(refreshed))
}

/// GET /tokens/introspect
/// Validate the bearer token and return its claims
async fn introspect_handler(
    State(state): State<Arc<AuthApiState>>,
    headers: HeaderMap,
) -> Result<Json<IntrospectResponse>, AuthError> {
    let token = extract_bearer_token(&headers)?;

    let claims = state.auth_service.verify_access_token(&token)?;

    Ok(Json(IntrospectResponse {
        subject: claims.sub,
        bound_address: claims.ip,
        expires_at: claims.exp,
    }))
}

/// Extract Bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::Unauthorized)?;

    if token.is_empty() {
        return Err(AuthError::Unauthorized);
    }

    Ok(token.to_string())
}
