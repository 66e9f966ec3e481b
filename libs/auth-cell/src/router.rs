use axum::{routing::post, Router};

use shared_database::AppState;

use crate::handlers;

pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/login", post(handlers::login))
        .route("/validate", post(handlers::validate_token))
        .route("/verify", post(handlers::verify_token))
        .with_state(state)
}
