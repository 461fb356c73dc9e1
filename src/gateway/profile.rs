//! `/user/*` handlers. All of them run behind the required guard.

use super::{failure, user_json, ApiResponse, AppState};
use crate::auth::{AccountError, Authenticated, ProfileUpdate};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct ProfileBody {
    #[serde(rename = "fullName")]
    full_name: Option<String>,
    #[serde(rename = "selectedCountry")]
    selected_country: Option<String>,
}

#[derive(Deserialize)]
pub struct CountryBody {
    #[serde(default, rename = "selectedCountry")]
    selected_country: String,
}

/// GET /user/profile
pub async fn handle_get_profile(Authenticated(ctx): Authenticated) -> ApiResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "user": user_json(&ctx.principal),
        })),
    )
}

/// PUT /user/profile: `fullName` and/or `selectedCountry`.
pub async fn handle_update_profile(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<ProfileBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return failure(StatusCode::BAD_REQUEST, &format!("Invalid request: {e}")),
    };

    let update = ProfileUpdate {
        full_name: body.full_name,
        selected_country: body.selected_country,
    };
    apply_update(&state, &ctx.principal.id, &update, "Profile updated successfully")
}

/// PUT /user/country
pub async fn handle_update_country(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<CountryBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return failure(StatusCode::BAD_REQUEST, &format!("Invalid request: {e}")),
    };

    if body.selected_country.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Selected country is required");
    }
    let update = ProfileUpdate {
        full_name: None,
        selected_country: Some(body.selected_country),
    };
    apply_update(&state, &ctx.principal.id, &update, "Country updated successfully")
}

fn apply_update(state: &AppState, uid: &str, update: &ProfileUpdate, ok_message: &str) -> ApiResponse {
    match state.users.update_profile(uid, update) {
        Ok(user) => {
            tracing::info!(uid, "Profile updated");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "message": ok_message,
                    "user": user_json(&user),
                })),
            )
        }
        Err(AccountError::Validation(msg)) => failure(StatusCode::BAD_REQUEST, &msg),
        Err(AccountError::NotFound) => failure(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => {
            tracing::error!("Update profile failed: {e:#}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update profile")
        }
    }
}
