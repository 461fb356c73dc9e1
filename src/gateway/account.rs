//! `/auth/*` handlers: registration, login, logout, session checks.

use super::{failure, user_json, ApiResponse, AppState};
use crate::auth::store::iso_timestamp;
use crate::auth::guard::{bearer_token, unauthenticated_response};
use crate::auth::{AccountError, AuthError, Authenticated, MaybeAuthenticated};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct RegisterBody {
    #[serde(default, rename = "fullName")]
    full_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordBody {
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordBody {
    #[serde(default, rename = "currentPassword")]
    current_password: String,
    #[serde(default, rename = "newPassword")]
    new_password: String,
}

fn invalid_body(e: &JsonRejection) -> ApiResponse {
    failure(StatusCode::BAD_REQUEST, &format!("Invalid request: {e}"))
}

/// POST /auth/register: create a new user account.
pub async fn handle_register(
    State(state): State<AppState>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> ApiResponse {
    if !state.allow_registration {
        return failure(StatusCode::FORBIDDEN, "Registration is disabled");
    }

    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return invalid_body(&e),
    };

    match state
        .users
        .register(&body.full_name, &body.email, &body.password)
    {
        Ok(user) => {
            tracing::info!(uid = %user.id, "New user registered");
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "success": true,
                    "message": "Registration successful",
                })),
            )
        }
        Err(AccountError::Validation(msg)) => failure(StatusCode::BAD_REQUEST, &msg),
        Err(AccountError::EmailTaken) => failure(StatusCode::CONFLICT, "Email already in use"),
        Err(e) => {
            tracing::error!("Registration failed: {e:#}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Registration failed")
        }
    }
}

/// POST /auth/login: check credentials and issue a bearer token.
pub async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return invalid_body(&e),
    };

    if body.email.trim().is_empty() || body.password.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Email and password are required");
    }

    let user = match state.users.authenticate(&body.email, &body.password) {
        Ok(user) => user,
        Err(AccountError::InvalidCredentials) => {
            tracing::debug!("Login rejected: bad credentials");
            return failure(StatusCode::UNAUTHORIZED, "Invalid email or password");
        }
        Err(e) => {
            tracing::error!("Login failed: {e:#}");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "Login failed");
        }
    };

    match state.sessions.issue(&user.id) {
        Ok(issued) => {
            tracing::info!(uid = %user.id, "User logged in");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "token": issued.token,
                    "expiresAt": iso_timestamp(issued.expires_at),
                    "user": user_json(&user),
                })),
            )
        }
        Err(e) => {
            tracing::error!("Session creation failed: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Login failed")
        }
    }
}

/// POST /auth/logout: revoke the presented token.
///
/// Mounted outside the guard. Any token with a good signature is accepted,
/// so an expired or already-revoked token still logs out with 200.
pub async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(rejection) => {
            tracing::debug!(reason = rejection.label(), "Logout without usable bearer");
            return unauthenticated_response();
        }
    };

    match state.sessions.revoke_session(token) {
        Ok(claims) => {
            tracing::info!(uid = %claims.sub, jti = %claims.jti, "User logged out");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "message": "Logged out successfully",
                })),
            )
                .into_response()
        }
        Err(e) if e.is_invalid_token() => {
            tracing::debug!("Logout with unverifiable token: {e}");
            unauthenticated_response()
        }
        Err(AuthError::Store(e)) => {
            tracing::warn!("Logout could not record revocation: {e:#}");
            failure(StatusCode::SERVICE_UNAVAILABLE, "Logout failed").into_response()
        }
        Err(e) => {
            tracing::error!("Logout failed: {e}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Logout failed").into_response()
        }
    }
}

/// GET /auth/verify: confirm the token and return the caller.
pub async fn handle_verify(Authenticated(ctx): Authenticated) -> ApiResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "user": user_json(&ctx.principal),
        })),
    )
}

/// GET /auth/session: who is calling, if anyone.
pub async fn handle_session(MaybeAuthenticated(ctx): MaybeAuthenticated) -> ApiResponse {
    let user = ctx
        .as_ref()
        .map_or(serde_json::Value::Null, |c| user_json(&c.principal));
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "authenticated": ctx.is_some(),
            "user": user,
        })),
    )
}

/// POST /auth/reset-password: same answer whether or not the account exists.
pub async fn handle_reset_password(
    State(state): State<AppState>,
    body: Result<Json<ResetPasswordBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return invalid_body(&e),
    };

    let email = body.email.trim().to_lowercase();
    if email.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Email is required");
    }

    match state.users.find_by_email(&email) {
        Ok(Some(user)) => tracing::info!(uid = %user.id, "Password reset requested"),
        Ok(None) => tracing::debug!("Password reset requested for unknown email"),
        Err(e) => tracing::warn!("Password reset lookup failed: {e:#}"),
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": "If the email exists, a reset link has been sent",
        })),
    )
}

/// PUT /auth/change-password: requires the current password.
pub async fn handle_change_password(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<ChangePasswordBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return invalid_body(&e),
    };

    match state.users.change_password(
        &ctx.principal.id,
        &body.current_password,
        &body.new_password,
    ) {
        Ok(()) => {
            tracing::info!(uid = %ctx.principal.id, "Password changed");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "message": "Password changed successfully",
                })),
            )
        }
        Err(AccountError::Validation(msg)) => failure(StatusCode::BAD_REQUEST, &msg),
        Err(AccountError::InvalidCredentials) => {
            failure(StatusCode::UNAUTHORIZED, "Current password is incorrect")
        }
        Err(AccountError::NotFound) => failure(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => {
            tracing::error!("Change password failed: {e:#}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to change password")
        }
    }
}
