use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, PublicUser, RegisterRequest},
        extractors::AuthUser,
        jwt::JwtKeys,
        services::{REASON_REQUIRED, REASON_UNAVAILABLE},
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> (StatusCode, Json<LoginResponse>) {
    let outcome = state
        .auth
        .authenticate(&payload.username, &payload.password)
        .await;

    let user = match (outcome.success, outcome.user) {
        (true, Some(user)) => user,
        _ => {
            let status = match outcome.reason {
                Some(REASON_REQUIRED) => StatusCode::BAD_REQUEST,
                Some(REASON_UNAVAILABLE) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::UNAUTHORIZED,
            };
            return (
                status,
                Json(LoginResponse {
                    success: false,
                    reason: outcome.reason,
                    access_token: None,
                    expires_in: None,
                    user: None,
                }),
            );
        }
    };

    let keys = JwtKeys::from_ref(&state);
    let access_token = match keys.sign(user.id) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "session token signing failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LoginResponse {
                    success: false,
                    reason: Some(REASON_UNAVAILABLE),
                    access_token: None,
                    expires_in: None,
                    user: None,
                }),
            );
        }
    };

    (
        StatusCode::OK,
        Json(LoginResponse {
            success: true,
            reason: None,
            access_token: Some(access_token),
            expires_in: Some(keys.ttl().as_secs()),
            user: Some(user.into()),
        }),
    )
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AppError> {
    if !state.config.allow_registration {
        warn!("registration attempted while disabled");
        return Err(AppError::Forbidden("Registration is disabled".into()));
    }

    let user = state
        .auth
        .store()
        .create(
            payload.username.trim(),
            &payload.password,
            payload.email.as_deref(),
            false,
        )
        .await?;

    info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let user = state
        .auth
        .store()
        .find_by_id(user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| {
            warn!(%user_id, "token for unknown or inactive user");
            AppError::Unauthorized("User not found".into())
        })?;

    Ok(Json(user.into()))
}
