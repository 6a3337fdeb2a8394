use crate::state::AppState;
use axum::{middleware, Router};

pub mod bedrock;
pub mod completion;
pub mod conversation;
pub mod dto;
pub mod handlers;
pub mod orchestrator;

pub fn router(state: AppState) -> Router<AppState> {
    handlers::chat_routes().route_layer(middleware::from_fn_with_state(
        state,
        crate::auth::extractors::require_auth,
    ))
}
